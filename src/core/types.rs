//! Core type definitions for the trading pipeline

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// A single OHLCV candle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    /// Timestamp of the candle open
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Candle {
    pub fn new(
        timestamp: DateTime<Utc>,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
    ) -> Self {
        Self { timestamp, open, high, low, close, volume }
    }

    /// Typical price (HLC/3), used by money-flow calculations
    pub fn typical_price(&self) -> Decimal {
        (self.high + self.low + self.close) / Decimal::from(3)
    }

    /// True range against the previous close
    pub fn true_range(&self, prev_close: Decimal) -> Decimal {
        let hl = self.high - self.low;
        let hc = (self.high - prev_close).abs();
        let lc = (self.low - prev_close).abs();
        hl.max(hc).max(lc)
    }

    pub fn close_f64(&self) -> f64 {
        self.close.to_f64().unwrap_or(0.0)
    }

    pub fn volume_f64(&self) -> f64 {
        self.volume.to_f64().unwrap_or(0.0)
    }
}

/// Ordered, append-only candle window with a fixed lookback.
///
/// Oldest candles are evicted once the window exceeds its capacity.
#[derive(Debug, Clone)]
pub struct CandleWindow {
    candles: VecDeque<Candle>,
    capacity: usize,
}

/// Minimum lookback retained per symbol
pub const MIN_LOOKBACK: usize = 200;

impl CandleWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            candles: VecDeque::with_capacity(capacity.max(MIN_LOOKBACK)),
            capacity: capacity.max(MIN_LOOKBACK),
        }
    }

    /// Append a candle, evicting the oldest past capacity. Out-of-order
    /// candles (timestamp not after the latest) are dropped.
    pub fn push(&mut self, candle: Candle) {
        if let Some(last) = self.candles.back() {
            if candle.timestamp <= last.timestamp {
                return;
            }
        }
        if self.candles.len() == self.capacity {
            self.candles.pop_front();
        }
        self.candles.push_back(candle);
    }

    pub fn replace_all(&mut self, candles: Vec<Candle>) {
        self.candles.clear();
        for candle in candles {
            self.push(candle);
        }
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn latest(&self) -> Option<&Candle> {
        self.candles.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candle> {
        self.candles.iter()
    }

    /// Last `n` candles, oldest first. Returns fewer when the window is short.
    pub fn tail(&self, n: usize) -> Vec<&Candle> {
        let skip = self.candles.len().saturating_sub(n);
        self.candles.iter().skip(skip).collect()
    }
}

/// Direction of a signal or position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Per-component contribution to a signal's confidence
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentScores {
    pub volume: f64,
    pub trend: f64,
    pub oscillator: f64,
    pub volatility_band: f64,
    pub timeframe_alignment: f64,
}

impl ComponentScores {
    pub fn total(&self) -> f64 {
        self.volume + self.trend + self.oscillator + self.volatility_band + self.timeframe_alignment
    }
}

/// Scored directional signal. Immutable once emitted; the scorer never
/// emits below the configured confidence threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub side: Side,
    pub price: Decimal,
    /// Confidence in [0, 95]
    pub confidence: f64,
    pub components: ComponentScores,
    pub timestamp: DateTime<Utc>,
}

/// Account equity and free margin, fetched fresh each cycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AccountState {
    pub equity: Decimal,
    pub free_margin: Decimal,
}

/// Output of the position sizer. Not persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingDecision {
    pub quantity: Decimal,
    pub notional: Decimal,
    pub required_margin: Decimal,
    pub leverage: Decimal,
    pub rejected: bool,
    pub reason: Option<String>,
}

impl SizingDecision {
    pub fn rejected(reason: &str) -> Self {
        Self {
            quantity: Decimal::ZERO,
            notional: Decimal::ZERO,
            required_margin: Decimal::ZERO,
            leverage: Decimal::ZERO,
            rejected: true,
            reason: Some(reason.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    Closed,
}

/// An open position with its linked bracket orders.
///
/// Created only after the entry order's fill is confirmed. Bracket ids
/// are nullable: a failed leg leaves the position open but unprotected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: Side,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub leverage: Decimal,
    pub entry_order_id: String,
    pub stop_order_id: Option<String>,
    pub profit_order_id: Option<String>,
    pub stop_price: Option<Decimal>,
    pub target_price: Option<Decimal>,
    /// A reduce-only close submitted but not yet confirmed filled.
    /// Resumed on the next sweep instead of resubmitting.
    pub close_order_id: Option<String>,
    pub opened_at: DateTime<Utc>,
    pub status: PositionStatus,
}

impl Position {
    /// Margin actually committed, not notional
    pub fn margin(&self) -> Decimal {
        if self.leverage.is_zero() {
            return Decimal::ZERO;
        }
        self.size * self.entry_price / self.leverage
    }

    pub fn notional(&self) -> Decimal {
        self.size * self.entry_price
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        let diff = self.current_price - self.entry_price;
        match self.side {
            Side::Buy => diff * self.size,
            Side::Sell => -diff * self.size,
        }
    }

    /// True when a bracket leg is missing and needs re-placement
    pub fn is_unprotected(&self) -> bool {
        self.stop_order_id.is_none() || self.profit_order_id.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candle(ts_offset: i64, close: Decimal) -> Candle {
        Candle::new(
            Utc::now() + chrono::Duration::seconds(ts_offset),
            close,
            close + dec!(1),
            close - dec!(1),
            close,
            dec!(1000),
        )
    }

    #[test]
    fn test_true_range_uses_prev_close() {
        let c = Candle::new(Utc::now(), dec!(100), dec!(105), dec!(99), dec!(104), dec!(10));
        // Gap down from 110: |high - prev_close| = 5, |low - prev_close| = 11
        assert_eq!(c.true_range(dec!(110)), dec!(11));
        // No gap: plain high - low
        assert_eq!(c.true_range(dec!(100)), dec!(6));
    }

    #[test]
    fn test_window_evicts_oldest() {
        let mut window = CandleWindow::new(200);
        for i in 0..250 {
            window.push(candle(i, dec!(100)));
        }
        assert_eq!(window.len(), 200);
    }

    #[test]
    fn test_window_rejects_out_of_order() {
        let mut window = CandleWindow::new(200);
        window.push(candle(10, dec!(100)));
        window.push(candle(5, dec!(200)));
        assert_eq!(window.len(), 1);
        assert_eq!(window.latest().unwrap().close, dec!(100));
    }

    #[test]
    fn test_position_margin_is_notional_over_leverage() {
        let pos = Position {
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
            close_order_id: None,
            opened_at: Utc::now(),
            status: PositionStatus::Open,
        };
        assert_eq!(pos.notional(), dec!(500));
        assert_eq!(pos.margin(), dec!(20));
        assert!(pos.is_unprotected());
    }

    #[test]
    fn test_short_pnl_inverts() {
        let mut pos = Position {
            symbol: "ETH/USDT".to_string(),
            side: Side::Sell,
            size: dec!(1),
            entry_price: dec!(2000),
            current_price: dec!(1900),
            leverage: dec!(10),
            entry_order_id: "e2".to_string(),
            stop_order_id: Some("s".to_string()),
            profit_order_id: Some("t".to_string()),
            stop_price: None,
            target_price: None,
            close_order_id: None,
            opened_at: Utc::now(),
            status: PositionStatus::Open,
        };
        assert_eq!(pos.unrealized_pnl(), dec!(100));
        pos.current_price = dec!(2100);
        assert_eq!(pos.unrealized_pnl(), dec!(-100));
        assert!(!pos.is_unprotected());
    }
}
