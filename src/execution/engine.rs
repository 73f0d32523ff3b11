//! Execution Engine
//!
//! Drives orders through the venue: entry submission with a bounded
//! retry budget and linear backoff, limit-to-market fallback when an
//! entry sits unfilled past its timeout, bracket placement after fill
//! confirmation, and reduce-only closes.
//!
//! A `Position` only exists after the entry fill is confirmed. Bracket
//! legs are independent: a failed leg is logged and leaves the position
//! open but unprotected - degraded, not fatal - and gets retried by the
//! monitor.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::core::types::{Position, PositionStatus, Side, Signal, SizingDecision};
use crate::error::CoreError;
use crate::exchange::{Exchange, OrderRequest, VenueOrderStatus};
use crate::execution::order::{Order, OrderKind};

#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// How long a limit entry may sit unfilled before market fallback
    pub entry_fill_timeout: Duration,
    /// Order status polling cadence
    pub poll_interval: Duration,
    /// 1-based submission attempt budget
    pub retry_attempts: u32,
    /// Linear backoff step between attempts
    pub retry_backoff: Duration,
    pub leverage: Decimal,
    pub stop_loss_pct: Decimal,
    pub take_profit_pct: Decimal,
    /// ATR-derived bracket offsets are clamped into this percent band
    pub min_bracket_pct: Decimal,
    pub max_bracket_pct: Decimal,
}

impl ExecutionConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            entry_fill_timeout: Duration::from_secs(settings.engine.entry_fill_timeout_secs),
            poll_interval: Duration::from_millis(250),
            retry_attempts: settings.engine.order_retry_attempts.max(1),
            retry_backoff: Duration::from_millis(settings.engine.retry_backoff_ms),
            leverage: settings.trading.leverage,
            stop_loss_pct: settings.trading.stop_loss_pct,
            take_profit_pct: settings.trading.take_profit_pct,
            min_bracket_pct: settings.trading.min_bracket_pct,
            max_bracket_pct: settings.trading.max_bracket_pct,
        }
    }
}

/// What happened to an order while waiting on fill confirmation
enum FillOutcome {
    Filled,
    TimedOut,
    CancelledByVenue,
}

pub struct ExecutionEngine {
    exchange: Arc<dyn Exchange>,
    config: ExecutionConfig,
}

impl ExecutionEngine {
    pub fn new(exchange: Arc<dyn Exchange>, config: ExecutionConfig) -> Self {
        Self { exchange, config }
    }

    /// Submit an entry and its bracket, returning the open position.
    ///
    /// The entry goes out as a limit at the signal price; unfilled past
    /// the timeout it is cancelled and resubmitted as a market order for
    /// the identical side/quantity, exactly once.
    pub async fn open_position(
        &self,
        signal: &Signal,
        sizing: &SizingDecision,
        atr: Option<Decimal>,
    ) -> Result<Position, CoreError> {
        let mut entry = Order::entry_limit(&signal.symbol, signal.side, sizing.quantity, signal.price);
        self.submit_with_retry(&mut entry, false).await?;

        match self.await_fill(&mut entry).await? {
            FillOutcome::Filled => {}
            FillOutcome::TimedOut => {
                warn!(
                    "{} entry {} unfilled after {:?}, falling back to market",
                    signal.symbol, entry.id, self.config.entry_fill_timeout
                );
                match self.cancel(&mut entry).await {
                    Ok(()) => entry = self.market_fallback(signal, sizing.quantity).await?,
                    Err(cancel_err) => {
                        // The fill can land between the last status poll
                        // and the cancel request; confirm before treating
                        // the failed cancel as fatal.
                        if !self.confirm_filled(&mut entry).await? {
                            return Err(cancel_err);
                        }
                        info!(
                            "{} entry {} filled while cancelling, keeping it",
                            signal.symbol, entry.id
                        );
                    }
                }
            }
            FillOutcome::CancelledByVenue => {
                warn!("{} entry {} cancelled by venue, falling back to market", signal.symbol, entry.id);
                entry = self.market_fallback(signal, sizing.quantity).await?;
            }
        }

        // Venue omitted the fill price: the requested price stands in
        let fill_price = entry.fill_price.unwrap_or(signal.price);
        info!(
            "{} {} entry filled: qty={} price={}",
            signal.symbol, signal.side, sizing.quantity, fill_price
        );

        let (stop_price, target_price) = self.bracket_prices(signal.side, fill_price, atr);

        let mut position = Position {
            symbol: signal.symbol.clone(),
            side: signal.side,
            size: sizing.quantity,
            entry_price: fill_price,
            current_price: fill_price,
            leverage: sizing.leverage,
            entry_order_id: entry.id.clone(),
            stop_order_id: None,
            profit_order_id: None,
            stop_price: Some(stop_price),
            target_price: Some(target_price),
            close_order_id: None,
            opened_at: entry.updated_at,
            status: PositionStatus::Open,
        };

        self.place_brackets(&mut position).await;
        Ok(position)
    }

    /// Place whichever bracket legs the position is missing. Failures
    /// are logged, never escalated: the position stays open.
    pub async fn place_brackets(&self, position: &mut Position) {
        let exit_side = position.side.opposite();

        if position.stop_order_id.is_none() {
            if let Some(stop) = position.stop_price {
                let mut order = Order::stop_loss(&position.symbol, exit_side, position.size, stop);
                match self.submit_with_retry(&mut order, true).await {
                    Ok(()) => {
                        info!("{} stop-loss placed at {}", position.symbol, stop);
                        position.stop_order_id = order.exchange_id.clone();
                    }
                    Err(err) => {
                        let leg = CoreError::BracketLegFailed {
                            symbol: position.symbol.clone(),
                            kind: OrderKind::StopLoss,
                        };
                        error!("{leg}: {err}; position open without stop protection");
                    }
                }
            }
        }

        if position.profit_order_id.is_none() {
            if let Some(target) = position.target_price {
                let mut order = Order::take_profit(&position.symbol, exit_side, position.size, target);
                match self.submit_with_retry(&mut order, true).await {
                    Ok(()) => {
                        info!("{} take-profit placed at {}", position.symbol, target);
                        position.profit_order_id = order.exchange_id.clone();
                    }
                    Err(err) => {
                        let leg = CoreError::BracketLegFailed {
                            symbol: position.symbol.clone(),
                            kind: OrderKind::TakeProfit,
                        };
                        error!("{leg}: {err}; position open without target");
                    }
                }
            }
        }
    }

    /// Reduce-only market close. The position is marked `Closed` only
    /// after the closing fill is confirmed, never optimistically.
    ///
    /// A close that timed out on an earlier sweep is resumed by its
    /// recorded order id rather than resubmitted, so one position never
    /// accumulates stacked reduce-only orders.
    pub async fn close_position(&self, position: &mut Position) -> Result<Decimal, CoreError> {
        if let Some(close_id) = position.close_order_id.clone() {
            let snapshot = self
                .exchange
                .fetch_order(&position.symbol, &close_id)
                .await
                .map_err(|e| CoreError::ExchangeUnavailable(e.to_string()))?;
            match snapshot.status {
                VenueOrderStatus::Filled => {
                    return Ok(self.finalize_close(position, snapshot.fill_price));
                }
                VenueOrderStatus::Open => {
                    return Err(CoreError::OrderSubmissionFailed {
                        symbol: position.symbol.clone(),
                        source: anyhow::anyhow!("close order {close_id} still working"),
                    });
                }
                VenueOrderStatus::Cancelled => position.close_order_id = None,
            }
        }

        // Pull remaining bracket orders off the book first; best effort
        for order_id in [position.stop_order_id.take(), position.profit_order_id.take()]
            .into_iter()
            .flatten()
        {
            if let Err(e) = self.exchange.cancel_order(&position.symbol, &order_id).await {
                warn!("{}: bracket cancel failed for {}: {}", position.symbol, order_id, e);
            }
        }

        let mut close = Order::entry_market(&position.symbol, position.side.opposite(), position.size);
        self.submit_with_retry(&mut close, true).await?;
        position.close_order_id = close.exchange_id.clone();

        match self.await_fill(&mut close).await? {
            FillOutcome::Filled => {}
            FillOutcome::CancelledByVenue => {
                position.close_order_id = None;
                return Err(CoreError::OrderSubmissionFailed {
                    symbol: position.symbol.clone(),
                    source: anyhow::anyhow!("close order {} cancelled by venue", close.id),
                });
            }
            FillOutcome::TimedOut => {
                // The order id stays on the position; the next sweep
                // resumes polling it
                return Err(CoreError::OrderSubmissionFailed {
                    symbol: position.symbol.clone(),
                    source: anyhow::anyhow!("close order {} not filled yet", close.id),
                });
            }
        }

        Ok(self.finalize_close(position, close.fill_price))
    }

    fn finalize_close(&self, position: &mut Position, fill_price: Option<Decimal>) -> Decimal {
        let close_price = fill_price.unwrap_or(position.current_price);
        position.current_price = close_price;
        position.close_order_id = None;
        position.status = PositionStatus::Closed;
        info!(
            "{} {} closed: qty={} price={} pnl={}",
            position.symbol,
            position.side,
            position.size,
            close_price,
            position.unrealized_pnl().round_dp(4)
        );
        close_price
    }

    /// Stop-loss and take-profit levels, direction-aware.
    ///
    /// With an ATR available the offsets derive from it (clamped to the
    /// configured percent band); otherwise the fixed percentages apply.
    /// Long: SL below, TP above. Short: inverted.
    pub fn bracket_prices(
        &self,
        side: Side,
        fill_price: Decimal,
        atr: Option<Decimal>,
    ) -> (Decimal, Decimal) {
        let (sl_pct, tp_pct) = match atr {
            Some(atr) if atr > Decimal::ZERO && fill_price > Decimal::ZERO => {
                let atr_pct = atr / fill_price * dec!(100);
                (
                    clamp(atr_pct * dec!(1.5), self.config.min_bracket_pct, self.config.max_bracket_pct),
                    clamp(atr_pct * dec!(2.5), self.config.min_bracket_pct, self.config.max_bracket_pct),
                )
            }
            _ => (self.config.stop_loss_pct, self.config.take_profit_pct),
        };

        let sl_offset = fill_price * sl_pct / dec!(100);
        let tp_offset = fill_price * tp_pct / dec!(100);

        match side {
            Side::Buy => (fill_price - sl_offset, fill_price + tp_offset),
            Side::Sell => (fill_price + sl_offset, fill_price - tp_offset),
        }
    }

    /// Submit with the configured attempt budget and linear backoff.
    /// Marks the order `Submitted` on acknowledgement, `Failed` once the
    /// budget is exhausted.
    async fn submit_with_retry(
        &self,
        order: &mut Order,
        reduce_only: bool,
    ) -> Result<(), CoreError> {
        let request = OrderRequest {
            symbol: order.symbol.clone(),
            side: order.side,
            kind: order.kind,
            quantity: order.quantity,
            price: order.price,
            reduce_only,
        };

        let mut last_error = None;
        for attempt in 1..=self.config.retry_attempts {
            match self.exchange.submit_order(&request).await {
                Ok(ack) => {
                    order.mark_submitted(&ack.order_id)?;
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "{} {} submit attempt {}/{} failed: {}",
                        order.symbol, order.kind, attempt, self.config.retry_attempts, e
                    );
                    last_error = Some(e);
                    if attempt < self.config.retry_attempts {
                        sleep(self.config.retry_backoff * attempt).await;
                    }
                }
            }
        }

        let source = last_error.unwrap_or_else(|| anyhow::anyhow!("no attempts made"));
        order.mark_failed(&source.to_string())?;
        Err(CoreError::OrderSubmissionFailed {
            symbol: order.symbol.clone(),
            source,
        })
    }

    /// Poll order status until fill, venue-side cancel, or timeout.
    async fn await_fill(&self, order: &mut Order) -> Result<FillOutcome, CoreError> {
        let order_id = order
            .exchange_id
            .clone()
            .ok_or_else(|| CoreError::ExchangeUnavailable("order has no venue id".to_string()))?;
        let deadline = Instant::now() + self.config.entry_fill_timeout;

        loop {
            let snapshot = self
                .exchange
                .fetch_order(&order.symbol, &order_id)
                .await
                .map_err(|e| CoreError::ExchangeUnavailable(e.to_string()))?;

            match snapshot.status {
                VenueOrderStatus::Filled => {
                    order.mark_filled(snapshot.fill_price)?;
                    return Ok(FillOutcome::Filled);
                }
                VenueOrderStatus::Cancelled => {
                    order.mark_cancelled()?;
                    return Ok(FillOutcome::CancelledByVenue);
                }
                VenueOrderStatus::Open => {
                    if Instant::now() >= deadline {
                        return Ok(FillOutcome::TimedOut);
                    }
                    sleep(self.config.poll_interval).await;
                }
            }
        }
    }

    /// One status re-check after a failed cancel. Records the fill and
    /// returns true when the order turns out to be filled at the venue.
    async fn confirm_filled(&self, order: &mut Order) -> Result<bool, CoreError> {
        let order_id = order
            .exchange_id
            .clone()
            .ok_or_else(|| CoreError::ExchangeUnavailable("order has no venue id".to_string()))?;
        let snapshot = self
            .exchange
            .fetch_order(&order.symbol, &order_id)
            .await
            .map_err(|e| CoreError::ExchangeUnavailable(e.to_string()))?;
        if snapshot.status == VenueOrderStatus::Filled {
            order.mark_filled(snapshot.fill_price)?;
            return Ok(true);
        }
        Ok(false)
    }

    async fn cancel(&self, order: &mut Order) -> Result<(), CoreError> {
        if let Some(ref order_id) = order.exchange_id {
            self.exchange
                .cancel_order(&order.symbol, order_id)
                .await
                .map_err(|e| CoreError::ExchangeUnavailable(e.to_string()))?;
        }
        order.mark_cancelled()?;
        Ok(())
    }

    /// One market resubmission for the identical side/quantity. Never
    /// falls back a second time: an unfilled market order is a failure.
    async fn market_fallback(
        &self,
        signal: &Signal,
        quantity: Decimal,
    ) -> Result<Order, CoreError> {
        let mut order = Order::entry_market(&signal.symbol, signal.side, quantity);
        self.submit_with_retry(&mut order, false).await?;
        match self.await_fill(&mut order).await? {
            FillOutcome::Filled => Ok(order),
            _ => Err(CoreError::OrderSubmissionFailed {
                symbol: signal.symbol.clone(),
                source: anyhow::anyhow!("market fallback {} not filled", order.id),
            }),
        }
    }
}

fn clamp(value: Decimal, min: Decimal, max: Decimal) -> Decimal {
    value.max(min).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{AccountState, ComponentScores};
    use crate::exchange::paper::PaperExchange;
    use chrono::Utc;

    fn signal(symbol: &str, side: Side, price: Decimal) -> Signal {
        Signal {
            symbol: symbol.to_string(),
            side,
            price,
            confidence: 80.0,
            components: ComponentScores::default(),
            timestamp: Utc::now(),
        }
    }

    fn sizing(quantity: Decimal) -> SizingDecision {
        SizingDecision {
            quantity,
            notional: dec!(500),
            required_margin: dec!(20),
            leverage: dec!(25),
            rejected: false,
            reason: None,
        }
    }

    fn config() -> ExecutionConfig {
        ExecutionConfig {
            entry_fill_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(250),
            retry_attempts: 3,
            retry_backoff: Duration::from_millis(1000),
            leverage: dec!(25),
            stop_loss_pct: dec!(1.25),
            take_profit_pct: dec!(1.5),
            min_bracket_pct: dec!(0.5),
            max_bracket_pct: dec!(3.0),
        }
    }

    fn engine_with(venue: Arc<PaperExchange>) -> ExecutionEngine {
        ExecutionEngine::new(venue, config())
    }

    #[test]
    fn test_bracket_prices_fixed_pct() {
        // Long at 50000 with SL 1.25% / TP 1.5%
        let venue = Arc::new(PaperExchange::new());
        let engine = engine_with(venue);
        let (sl, tp) = engine.bracket_prices(Side::Buy, dec!(50000), None);
        assert_eq!(sl, dec!(49375.0000));
        assert_eq!(tp, dec!(50750.000));
    }

    #[test]
    fn test_bracket_prices_short_inverted() {
        let venue = Arc::new(PaperExchange::new());
        let engine = engine_with(venue);
        let (sl, tp) = engine.bracket_prices(Side::Sell, dec!(50000), None);
        assert_eq!(sl, dec!(50625.0000));
        assert_eq!(tp, dec!(49250.000));
    }

    #[test]
    fn test_bracket_prices_atr_clamped() {
        let venue = Arc::new(PaperExchange::new());
        let engine = engine_with(venue);
        // ATR of 5000 on 50000 is 10%; both offsets clamp at 3%
        let (sl, tp) = engine.bracket_prices(Side::Buy, dec!(50000), Some(dec!(5000)));
        assert_eq!(sl, dec!(48500.000));
        assert_eq!(tp, dec!(51500.000));

        // Tiny ATR clamps up to the 0.5% floor
        let (sl, _tp) = engine.bracket_prices(Side::Buy, dec!(50000), Some(dec!(1)));
        assert_eq!(sl, dec!(49750.000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_position_limit_fill() {
        let venue = Arc::new(PaperExchange::new());
        venue.set_mark_price("BTC/USDT", dec!(50000));
        let engine = engine_with(venue.clone());

        let position = engine
            .open_position(&signal("BTC/USDT", Side::Buy, dec!(50000)), &sizing(dec!(0.01)), None)
            .await
            .unwrap();

        assert_eq!(position.entry_price, dec!(50000));
        assert_eq!(position.status, PositionStatus::Open);
        assert!(position.stop_order_id.is_some());
        assert!(position.profit_order_id.is_some());
        assert!(!position.is_unprotected());
        assert_eq!(position.stop_price, Some(dec!(49375.0000)));
        assert_eq!(position.target_price, Some(dec!(50750.000)));
        // Limit filled: no market order went out
        assert_eq!(venue.market_order_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unfilled_limit_falls_back_to_market_once() {
        let venue = Arc::new(PaperExchange::new().with_limit_fills(false));
        venue.set_mark_price("BTC/USDT", dec!(50000));
        let engine = engine_with(venue.clone());

        let position = engine
            .open_position(&signal("BTC/USDT", Side::Buy, dec!(50000)), &sizing(dec!(0.01)), None)
            .await
            .unwrap();

        assert_eq!(position.status, PositionStatus::Open);
        // Exactly one market resubmission for the identical quantity
        assert_eq!(venue.market_order_count(), 1);
        assert_eq!(position.size, dec!(0.01));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_retried_within_budget() {
        let venue = Arc::new(PaperExchange::new());
        venue.set_mark_price("BTC/USDT", dec!(50000));
        venue.inject_submit_failures(2);
        let engine = engine_with(venue.clone());

        let position = engine
            .open_position(&signal("BTC/USDT", Side::Buy, dec!(50000)), &sizing(dec!(0.01)), None)
            .await
            .unwrap();
        assert_eq!(position.status, PositionStatus::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_surface_failure() {
        let venue = Arc::new(PaperExchange::new());
        venue.set_mark_price("BTC/USDT", dec!(50000));
        venue.inject_submit_failures(10);
        let engine = engine_with(venue.clone());

        let err = engine
            .open_position(&signal("BTC/USDT", Side::Buy, dec!(50000)), &sizing(dec!(0.01)), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::OrderSubmissionFailed { .. }));
        // Never reached bracket placement
        assert_eq!(venue.accepted_count(OrderKind::StopLoss), 0);
        assert_eq!(venue.accepted_count(OrderKind::TakeProfit), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_stop_leg_leaves_position_open() {
        let venue = Arc::new(PaperExchange::new());
        venue.set_mark_price("BTC/USDT", dec!(50000));
        venue.fail_kind(Some(OrderKind::StopLoss));
        let engine = engine_with(venue.clone());

        let position = engine
            .open_position(&signal("BTC/USDT", Side::Buy, dec!(50000)), &sizing(dec!(0.01)), None)
            .await
            .unwrap();

        // Degraded but open: entry stands, stop leg missing
        assert_eq!(position.status, PositionStatus::Open);
        assert!(position.stop_order_id.is_none());
        assert!(position.profit_order_id.is_some());
        assert!(position.is_unprotected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_bracket_retried_later() {
        let venue = Arc::new(PaperExchange::new());
        venue.set_mark_price("BTC/USDT", dec!(50000));
        venue.fail_kind(Some(OrderKind::StopLoss));
        let engine = engine_with(venue.clone());

        let mut position = engine
            .open_position(&signal("BTC/USDT", Side::Buy, dec!(50000)), &sizing(dec!(0.01)), None)
            .await
            .unwrap();
        assert!(position.is_unprotected());

        // Venue recovers; the monitor's retry path completes the bracket
        venue.fail_kind(None);
        engine.place_brackets(&mut position).await;
        assert!(!position.is_unprotected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fill_landing_during_cancel_keeps_entry() {
        // The entry fills at the venue between the last status poll and
        // the cancel request: the cancel is rejected, and the filled
        // entry must become a tracked position instead of an error.
        let venue = Arc::new(PaperExchange::new().with_limit_fills(false));
        venue.set_mark_price("BTC/USDT", dec!(50000));
        venue.race_fill_on_cancel();
        let engine = engine_with(venue.clone());

        let position = engine
            .open_position(&signal("BTC/USDT", Side::Buy, dec!(50000)), &sizing(dec!(0.01)), None)
            .await
            .unwrap();

        assert_eq!(position.status, PositionStatus::Open);
        assert_eq!(position.entry_price, dec!(50000));
        // The limit fill stood; no market fallback went out
        assert_eq!(venue.market_order_count(), 0);
        assert!(!position.is_unprotected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resumed_close_does_not_resubmit() {
        // A close from an earlier sweep is still working at the venue.
        // The next close attempt must poll that order, not stack a
        // second reduce-only order on top of it.
        let venue = Arc::new(PaperExchange::new().with_limit_fills(false));
        venue.set_mark_price("BTC/USDT", dec!(50000));
        let engine = engine_with(venue.clone());

        let resting = OrderRequest {
            symbol: "BTC/USDT".to_string(),
            side: Side::Sell,
            kind: OrderKind::Entry,
            quantity: dec!(0.01),
            price: Some(dec!(50100)),
            reduce_only: true,
        };
        let ack = venue.submit_order(&resting).await.unwrap();

        let mut position = Position {
            symbol: "BTC/USDT".to_string(),
            side: Side::Buy,
            size: dec!(0.01),
            entry_price: dec!(50000),
            current_price: dec!(50000),
            leverage: dec!(25),
            entry_order_id: "e1".to_string(),
            stop_order_id: None,
            profit_order_id: None,
            stop_price: None,
            target_price: None,
            close_order_id: Some(ack.order_id.clone()),
            opened_at: Utc::now(),
            status: PositionStatus::Open,
        };

        let err = engine.close_position(&mut position).await.unwrap_err();
        assert!(matches!(err, CoreError::OrderSubmissionFailed { .. }));
        assert_eq!(position.status, PositionStatus::Open);
        assert_eq!(position.close_order_id.as_deref(), Some(ack.order_id.as_str()));
        // Nothing new went out while the old close was working
        assert_eq!(venue.market_order_count(), 0);

        // Venue cancels the stale close; the next attempt submits fresh
        venue.cancel_order("BTC/USDT", &ack.order_id).await.unwrap();
        engine.close_position(&mut position).await.unwrap();
        assert_eq!(position.status, PositionStatus::Closed);
        assert_eq!(venue.market_order_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_confirms_before_marking_closed() {
        let venue = Arc::new(PaperExchange::new());
        venue.set_mark_price("BTC/USDT", dec!(51000));
        venue.set_account(AccountState {
            equity: dec!(1000),
            free_margin: dec!(900),
        });
        let engine = engine_with(venue.clone());

        let mut position = engine
            .open_position(&signal("BTC/USDT", Side::Buy, dec!(51000)), &sizing(dec!(0.01)), None)
            .await
            .unwrap();

        let close_price = engine.close_position(&mut position).await.unwrap();
        assert_eq!(position.status, PositionStatus::Closed);
        assert!(close_price > Decimal::ZERO);
        assert!(position.stop_order_id.is_none());
        assert!(position.profit_order_id.is_none());
    }
}
