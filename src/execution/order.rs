//! Order lifecycle state machine
//!
//! `Pending -> Submitted -> {Filled, Cancelled, Failed}`, with
//! `Filled -> Closed` as the only transition out of a terminal fill.
//! Illegal transitions are rejected, never silently applied.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::core::types::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    Entry,
    StopLoss,
    TakeProfit,
}

impl std::fmt::Display for OrderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderKind::Entry => write!(f, "ENTRY"),
            OrderKind::StopLoss => write!(f, "STOP_LOSS"),
            OrderKind::TakeProfit => write!(f, "TAKE_PROFIT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Created, not yet submitted
    Pending,
    /// Acknowledged by the venue, an order id exists
    Submitted,
    /// Fill confirmed
    Filled,
    /// Cancelled before fill
    Cancelled,
    /// Submission exhausted its retry budget
    Failed,
    /// Filled entry whose position has since been closed
    Closed,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Cancelled | OrderStatus::Failed | OrderStatus::Closed
        )
    }

    /// The legal transition table
    pub fn can_transition(&self, to: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, to),
            (Pending, Submitted)
                | (Pending, Failed)
                | (Submitted, Filled)
                | (Submitted, Cancelled)
                | (Submitted, Failed)
                | (Filled, Closed)
        )
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStatus::Pending => write!(f, "PENDING"),
            OrderStatus::Submitted => write!(f, "SUBMITTED"),
            OrderStatus::Filled => write!(f, "FILLED"),
            OrderStatus::Cancelled => write!(f, "CANCELLED"),
            OrderStatus::Failed => write!(f, "FAILED"),
            OrderStatus::Closed => write!(f, "CLOSED"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("illegal order transition {from} -> {to}")]
pub struct IllegalTransition {
    pub from: OrderStatus,
    pub to: OrderStatus,
}

/// One order through its lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Internal client id
    pub id: String,
    /// Venue-assigned id, set on submission
    pub exchange_id: Option<String>,
    pub symbol: String,
    pub side: Side,
    pub kind: OrderKind,
    /// Requested price. None for market orders.
    pub price: Option<Decimal>,
    pub quantity: Decimal,
    pub status: OrderStatus,
    /// Recorded fill price; falls back to the requested price when the
    /// venue omits it
    pub fill_price: Option<Decimal>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    fn new(symbol: &str, side: Side, kind: OrderKind, quantity: Decimal, price: Option<Decimal>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            exchange_id: None,
            symbol: symbol.to_string(),
            side,
            kind,
            price,
            quantity,
            status: OrderStatus::Pending,
            fill_price: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn entry_limit(symbol: &str, side: Side, quantity: Decimal, price: Decimal) -> Self {
        Self::new(symbol, side, OrderKind::Entry, quantity, Some(price))
    }

    pub fn entry_market(symbol: &str, side: Side, quantity: Decimal) -> Self {
        Self::new(symbol, side, OrderKind::Entry, quantity, None)
    }

    pub fn stop_loss(symbol: &str, side: Side, quantity: Decimal, trigger: Decimal) -> Self {
        Self::new(symbol, side, OrderKind::StopLoss, quantity, Some(trigger))
    }

    pub fn take_profit(symbol: &str, side: Side, quantity: Decimal, target: Decimal) -> Self {
        Self::new(symbol, side, OrderKind::TakeProfit, quantity, Some(target))
    }

    pub fn is_market(&self) -> bool {
        self.price.is_none()
    }

    fn transition(&mut self, to: OrderStatus) -> Result<(), IllegalTransition> {
        if !self.status.can_transition(to) {
            return Err(IllegalTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn mark_submitted(&mut self, exchange_id: &str) -> Result<(), IllegalTransition> {
        self.transition(OrderStatus::Submitted)?;
        self.exchange_id = Some(exchange_id.to_string());
        Ok(())
    }

    /// Record the confirmed fill. A missing venue price falls back to
    /// the requested price.
    pub fn mark_filled(&mut self, venue_price: Option<Decimal>) -> Result<(), IllegalTransition> {
        self.transition(OrderStatus::Filled)?;
        self.fill_price = venue_price.or(self.price);
        Ok(())
    }

    pub fn mark_cancelled(&mut self) -> Result<(), IllegalTransition> {
        self.transition(OrderStatus::Cancelled)
    }

    pub fn mark_failed(&mut self, error: &str) -> Result<(), IllegalTransition> {
        self.transition(OrderStatus::Failed)?;
        self.last_error = Some(error.to_string());
        Ok(())
    }

    /// A filled entry whose position has been closed out
    pub fn mark_closed(&mut self) -> Result<(), IllegalTransition> {
        self.transition(OrderStatus::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_happy_path() {
        let mut order = Order::entry_limit("BTC/USDT", Side::Buy, dec!(0.01), dec!(50000));
        assert_eq!(order.status, OrderStatus::Pending);

        order.mark_submitted("EX-1").unwrap();
        assert_eq!(order.status, OrderStatus::Submitted);
        assert_eq!(order.exchange_id.as_deref(), Some("EX-1"));

        order.mark_filled(Some(dec!(49999))).unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.fill_price, Some(dec!(49999)));

        order.mark_closed().unwrap();
        assert_eq!(order.status, OrderStatus::Closed);
    }

    #[test]
    fn test_fill_price_falls_back_to_requested() {
        let mut order = Order::entry_limit("BTC/USDT", Side::Buy, dec!(0.01), dec!(50000));
        order.mark_submitted("EX-1").unwrap();
        order.mark_filled(None).unwrap();
        assert_eq!(order.fill_price, Some(dec!(50000)));
    }

    #[test]
    fn test_no_transition_out_of_terminal_states() {
        let mut order = Order::entry_market("BTC/USDT", Side::Buy, dec!(0.01));
        order.mark_submitted("EX-2").unwrap();
        order.mark_cancelled().unwrap();

        assert!(order.mark_filled(None).is_err());
        assert!(order.mark_submitted("EX-3").is_err());
        assert!(order.mark_closed().is_err());
        assert_eq!(order.status, OrderStatus::Cancelled);
    }

    #[test]
    fn test_filled_only_moves_to_closed() {
        let mut order = Order::entry_market("BTC/USDT", Side::Sell, dec!(1));
        order.mark_submitted("EX-4").unwrap();
        order.mark_filled(Some(dec!(100))).unwrap();

        assert!(order.mark_cancelled().is_err());
        assert!(order.mark_failed("nope").is_err());
        assert!(order.mark_closed().is_ok());
    }

    #[test]
    fn test_cannot_fill_before_submission() {
        let mut order = Order::entry_market("BTC/USDT", Side::Buy, dec!(1));
        let err = order.mark_filled(None).unwrap_err();
        assert_eq!(err.from, OrderStatus::Pending);
        assert_eq!(err.to, OrderStatus::Filled);
    }

    #[test]
    fn test_pending_can_fail() {
        // Submission that never got an ack after retries
        let mut order = Order::entry_market("BTC/USDT", Side::Buy, dec!(1));
        order.mark_failed("exhausted retries").unwrap();
        assert_eq!(order.status, OrderStatus::Failed);
        assert!(order.status.is_terminal());
    }
}
