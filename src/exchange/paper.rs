//! Paper Exchange
//!
//! In-process simulated venue for dry runs and tests. Market orders fill
//! immediately at the mark price with a little slippage jitter; limit
//! orders fill only when configured to, which is how the fallback path
//! gets exercised.
//!
//! Failure injection knobs let tests drive the retry and bracket-leg
//! error paths without a network.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use rand::Rng;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use crate::core::types::{AccountState, Candle, Position, Side};
use crate::exchange::{Exchange, OrderAck, OrderRequest, OrderSnapshot, VenueOrderStatus};
use crate::execution::order::OrderKind;

#[derive(Debug, Clone)]
struct PaperOrder {
    request: OrderRequest,
    status: VenueOrderStatus,
    fill_price: Option<Decimal>,
}

#[derive(Default)]
struct PaperState {
    candles: HashMap<String, Vec<Candle>>,
    mark_prices: HashMap<String, Decimal>,
    orders: HashMap<String, PaperOrder>,
    positions: Vec<Position>,
    account: Option<AccountState>,
}

pub struct PaperExchange {
    state: Mutex<PaperState>,
    /// When false, limit orders sit open forever (fallback-path testing)
    fill_limit_orders: bool,
    /// Slippage applied to market fills, basis points
    slippage_bps: u32,
    /// Fail the next N submissions before succeeding
    submit_failures: AtomicU32,
    /// Fail every submission of this kind
    failing_kind: Mutex<Option<OrderKind>>,
    /// Fail the next N mark-price fetches
    mark_price_failures: AtomicU32,
    /// Cancelling an open entry fills it instead - a fill landing
    /// between the last status poll and the cancel request
    fill_race_on_cancel: AtomicBool,
}

impl PaperExchange {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PaperState::default()),
            fill_limit_orders: true,
            slippage_bps: 2,
            submit_failures: AtomicU32::new(0),
            failing_kind: Mutex::new(None),
            mark_price_failures: AtomicU32::new(0),
            fill_race_on_cancel: AtomicBool::new(false),
        }
    }

    pub fn with_limit_fills(mut self, fill: bool) -> Self {
        self.fill_limit_orders = fill;
        self
    }

    pub fn set_account(&self, account: AccountState) {
        self.state.lock().unwrap().account = Some(account);
    }

    pub fn set_candles(&self, symbol: &str, candles: Vec<Candle>) {
        let mut state = self.state.lock().unwrap();
        if let Some(last) = candles.last() {
            state.mark_prices.insert(symbol.to_string(), last.close);
        }
        state.candles.insert(symbol.to_string(), candles);
    }

    pub fn set_mark_price(&self, symbol: &str, price: Decimal) {
        self.state
            .lock()
            .unwrap()
            .mark_prices
            .insert(symbol.to_string(), price);
    }

    pub fn seed_position(&self, position: Position) {
        self.state.lock().unwrap().positions.push(position);
    }

    /// Fail the next `n` submissions with a transient error
    pub fn inject_submit_failures(&self, n: u32) {
        self.submit_failures.store(n, Ordering::SeqCst);
    }

    /// Fail every submission of one order kind
    pub fn fail_kind(&self, kind: Option<OrderKind>) {
        *self.failing_kind.lock().unwrap() = kind;
    }

    /// Fail the next `n` mark-price fetches
    pub fn inject_mark_price_failures(&self, n: u32) {
        self.mark_price_failures.store(n, Ordering::SeqCst);
    }

    /// Make the next cancel of an open entry race against a fill: the
    /// order fills and the cancel is rejected.
    pub fn race_fill_on_cancel(&self) {
        self.fill_race_on_cancel.store(true, Ordering::SeqCst);
    }

    /// Count of submissions the venue accepted, by kind
    pub fn accepted_count(&self, kind: OrderKind) -> usize {
        self.state
            .lock()
            .unwrap()
            .orders
            .values()
            .filter(|o| o.request.kind == kind)
            .count()
    }

    /// Count of accepted market orders (no price attached)
    pub fn market_order_count(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .orders
            .values()
            .filter(|o| o.request.price.is_none())
            .count()
    }

    fn slipped(&self, price: Decimal, side: Side) -> Decimal {
        let bps = rand::thread_rng().gen_range(0..=self.slippage_bps);
        let slip = price * Decimal::from(bps) / dec!(10000);
        match side {
            Side::Buy => price + slip,
            Side::Sell => price - slip,
        }
    }
}

impl Default for PaperExchange {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Exchange for PaperExchange {
    async fn fetch_candles(
        &self,
        symbol: &str,
        _timeframe: &str,
        lookback: usize,
    ) -> Result<Vec<Candle>> {
        let state = self.state.lock().unwrap();
        let candles = state
            .candles
            .get(symbol)
            .ok_or_else(|| anyhow!("no candles seeded for {symbol}"))?;
        let skip = candles.len().saturating_sub(lookback);
        Ok(candles[skip..].to_vec())
    }

    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderAck> {
        if self
            .submit_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            bail!("venue rejected submission (injected)");
        }
        if *self.failing_kind.lock().unwrap() == Some(request.kind) {
            bail!("venue rejected {} order (injected)", request.kind);
        }

        let mut state = self.state.lock().unwrap();
        let mark = state
            .mark_prices
            .get(&request.symbol)
            .copied()
            .or(request.price)
            .ok_or_else(|| anyhow!("no mark price for {}", request.symbol))?;

        let order_id = Uuid::new_v4().to_string();
        let fills_now = match request.kind {
            // Brackets rest on the book until triggered
            OrderKind::StopLoss | OrderKind::TakeProfit => false,
            OrderKind::Entry => request.price.is_none() || self.fill_limit_orders,
        };

        let (status, fill_price) = if fills_now {
            let price = match request.price {
                Some(limit) => limit,
                None => self.slipped(mark, request.side),
            };
            (VenueOrderStatus::Filled, Some(price))
        } else {
            (VenueOrderStatus::Open, None)
        };

        state.orders.insert(
            order_id.clone(),
            PaperOrder {
                request: request.clone(),
                status,
                fill_price,
            },
        );
        Ok(OrderAck { order_id })
    }

    async fn fetch_order(&self, _symbol: &str, order_id: &str) -> Result<OrderSnapshot> {
        let state = self.state.lock().unwrap();
        let order = state
            .orders
            .get(order_id)
            .ok_or_else(|| anyhow!("unknown order {order_id}"))?;
        Ok(OrderSnapshot {
            order_id: order_id.to_string(),
            status: order.status,
            fill_price: order.fill_price,
        })
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()> {
        let race = self.fill_race_on_cancel.swap(false, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        let mark = state.mark_prices.get(symbol).copied();
        let order = state
            .orders
            .get_mut(order_id)
            .ok_or_else(|| anyhow!("unknown order {order_id}"))?;
        if order.status == VenueOrderStatus::Filled {
            bail!("order {order_id} already filled");
        }
        if race && order.status == VenueOrderStatus::Open {
            order.status = VenueOrderStatus::Filled;
            order.fill_price = order.request.price.or(mark);
            bail!("order {order_id} already filled");
        }
        order.status = VenueOrderStatus::Cancelled;
        Ok(())
    }

    async fn fetch_account(&self) -> Result<AccountState> {
        self.state
            .lock()
            .unwrap()
            .account
            .ok_or_else(|| anyhow!("account not seeded"))
    }

    async fn fetch_positions(&self) -> Result<Vec<Position>> {
        Ok(self.state.lock().unwrap().positions.clone())
    }

    async fn fetch_mark_price(&self, symbol: &str) -> Result<Decimal> {
        if self
            .mark_price_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            bail!("mark price unavailable (injected)");
        }
        self.state
            .lock()
            .unwrap()
            .mark_prices
            .get(symbol)
            .copied()
            .ok_or_else(|| anyhow!("no mark price for {symbol}"))
    }
}

/// Build a synthetic candle series for paper runs
pub fn synthetic_candles(base_price: f64, count: usize) -> Vec<Candle> {
    let mut rng = rand::thread_rng();
    let start = chrono::Utc::now() - chrono::Duration::minutes(count as i64);
    let mut price = base_price;
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let drift: f64 = rng.gen_range(-0.004..0.005);
        let open = price;
        price *= 1.0 + drift;
        let close = price;
        let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.002));
        let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.002));
        let volume = rng.gen_range(800.0..1200.0);
        out.push(Candle::new(
            start + chrono::Duration::minutes(i as i64),
            dec_from(open),
            dec_from(high),
            dec_from(low),
            dec_from(close),
            dec_from(volume),
        ));
    }
    out
}

fn dec_from(v: f64) -> Decimal {
    Decimal::from_f64(v).unwrap_or(Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_market(symbol: &str) -> OrderRequest {
        OrderRequest {
            symbol: symbol.to_string(),
            side: Side::Buy,
            kind: OrderKind::Entry,
            quantity: dec!(0.01),
            price: None,
            reduce_only: false,
        }
    }

    #[tokio::test]
    async fn test_market_order_fills_immediately() {
        let venue = PaperExchange::new();
        venue.set_mark_price("BTC/USDT", dec!(50000));

        let ack = venue.submit_order(&entry_market("BTC/USDT")).await.unwrap();
        let snap = venue.fetch_order("BTC/USDT", &ack.order_id).await.unwrap();
        assert_eq!(snap.status, VenueOrderStatus::Filled);
        assert!(snap.fill_price.unwrap() >= dec!(50000));
    }

    #[tokio::test]
    async fn test_limit_order_can_sit_open() {
        let venue = PaperExchange::new().with_limit_fills(false);
        venue.set_mark_price("BTC/USDT", dec!(50000));

        let request = OrderRequest {
            price: Some(dec!(49000)),
            ..entry_market("BTC/USDT")
        };
        let ack = venue.submit_order(&request).await.unwrap();
        let snap = venue.fetch_order("BTC/USDT", &ack.order_id).await.unwrap();
        assert_eq!(snap.status, VenueOrderStatus::Open);

        venue.cancel_order("BTC/USDT", &ack.order_id).await.unwrap();
        let snap = venue.fetch_order("BTC/USDT", &ack.order_id).await.unwrap();
        assert_eq!(snap.status, VenueOrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_injected_failures_are_transient() {
        let venue = PaperExchange::new();
        venue.set_mark_price("BTC/USDT", dec!(50000));
        venue.inject_submit_failures(2);

        assert!(venue.submit_order(&entry_market("BTC/USDT")).await.is_err());
        assert!(venue.submit_order(&entry_market("BTC/USDT")).await.is_err());
        assert!(venue.submit_order(&entry_market("BTC/USDT")).await.is_ok());
    }

    #[test]
    fn test_synthetic_candles_ordered() {
        let candles = synthetic_candles(100.0, 50);
        assert_eq!(candles.len(), 50);
        for pair in candles.windows(2) {
            assert!(pair[0].timestamp < pair[1].timestamp);
            assert!(pair[1].high >= pair[1].low);
        }
    }
}
