//! Indicator Engine
//!
//! Derives trend, momentum, volatility and volume features from a candle
//! window. Money values stay in `Decimal` at the edges; the math itself
//! runs in `f64`.
//!
//! Only the trend indicator has a hard minimum-length requirement. Every
//! other sub-indicator degrades to a neutral default when the window is
//! shorter than its period, so one thin window never fails the whole
//! engine.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core::types::CandleWindow;
use crate::error::CoreError;

/// Hard minimum candles for the trend indicator
pub const MIN_CANDLES: usize = 20;

/// Direction of the running trend band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendDirection {
    Bullish,
    Bearish,
}

impl TrendDirection {
    /// +1 for bullish, -1 for bearish
    pub fn sign(&self) -> i8 {
        match self {
            TrendDirection::Bullish => 1,
            TrendDirection::Bearish => -1,
        }
    }
}

impl std::fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrendDirection::Bullish => write!(f, "BULLISH"),
            TrendDirection::Bearish => write!(f, "BEARISH"),
        }
    }
}

/// Derived per-candle features for the latest candle in a window.
/// Recomputed each cycle; stateless beyond the window itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSet {
    pub close: f64,
    /// SuperTrend direction for the latest candle
    pub trend_direction: TrendDirection,
    /// Normalized distance between price and the trend band, percent
    pub trend_strength_pct: f64,
    /// The active trend band level
    pub trend_band: f64,
    /// First difference of the volume-weighted hull average
    pub momentum: f64,
    /// Money-flow oscillator in [0, 100]
    pub money_flow: f64,
    pub oversold: bool,
    pub overbought: bool,
    /// Close position within the volatility bands, [0, 1]
    pub band_position: f64,
    pub band_squeeze: bool,
    pub band_expansion: bool,
    /// Current volume over rolling mean volume
    pub volume_ratio: f64,
    pub volume_anomaly: bool,
    /// Short moving average of closes, for the direction gate
    pub short_ma: f64,
    /// Latest average true range
    pub atr: f64,
    /// Mean ATR over the window, the volatility baseline for sizing
    pub atr_baseline: f64,
}

/// Tunables for the indicator stack
#[derive(Debug, Clone)]
pub struct IndicatorConfig {
    /// ATR period for the trend band (6-14 works; 10 default)
    pub atr_period: usize,
    pub trend_multiplier: f64,
    pub hull_period: usize,
    pub money_flow_period: usize,
    pub oversold_level: f64,
    pub overbought_level: f64,
    pub band_period: usize,
    pub band_stddev_mult: f64,
    pub volume_lookback: usize,
    /// Volume counts as anomalous above mean + this many sigmas
    pub volume_anomaly_sigma: f64,
    pub short_ma_period: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            atr_period: 10,
            trend_multiplier: 3.0,
            hull_period: 21,
            money_flow_period: 14,
            oversold_level: 20.0,
            overbought_level: 80.0,
            band_period: 20,
            band_stddev_mult: 2.0,
            volume_lookback: 20,
            volume_anomaly_sigma: 3.0,
            short_ma_period: 9,
        }
    }
}

pub struct IndicatorEngine {
    config: IndicatorConfig,
}

impl IndicatorEngine {
    pub fn new(config: IndicatorConfig) -> Self {
        Self { config }
    }

    /// Compute the full indicator set for the latest candle.
    ///
    /// Fails only when the window is too short for the trend indicator.
    pub fn compute(&self, window: &CandleWindow) -> Result<IndicatorSet, CoreError> {
        if window.len() < MIN_CANDLES {
            return Err(CoreError::InsufficientData {
                got: window.len(),
                need: MIN_CANDLES,
            });
        }

        let highs: Vec<f64> = window.iter().map(|c| dec_f64(c.high)).collect();
        let lows: Vec<f64> = window.iter().map(|c| dec_f64(c.low)).collect();
        let closes: Vec<f64> = window.iter().map(|c| dec_f64(c.close)).collect();
        let volumes: Vec<f64> = window.iter().map(|c| dec_f64(c.volume)).collect();
        let typicals: Vec<f64> = window.iter().map(|c| dec_f64(c.typical_price())).collect();

        let close = *closes.last().unwrap_or(&0.0);

        let atr_series = atr_series(&highs, &lows, &closes, self.config.atr_period);
        let atr = *atr_series.last().unwrap_or(&0.0);
        let atr_baseline = mean(&atr_series);

        let (trend_direction, trend_band) = self.supertrend(&highs, &lows, &closes, &atr_series);
        let trend_strength_pct = if close > 0.0 {
            ((close - trend_band).abs() / close) * 100.0
        } else {
            0.0
        };

        let momentum = self.hull_momentum(&typicals, &volumes);
        let money_flow = self.money_flow(&typicals, &volumes);
        let (band_position, band_squeeze, band_expansion) = self.volatility_bands(&closes);
        let (volume_ratio, volume_anomaly) = self.volume_ratio(&volumes);
        let short_ma = sma_last(&closes, self.config.short_ma_period).unwrap_or(close);

        Ok(IndicatorSet {
            close,
            trend_direction,
            trend_strength_pct,
            trend_band,
            momentum,
            money_flow,
            oversold: money_flow < self.config.oversold_level,
            overbought: money_flow > self.config.overbought_level,
            band_position,
            band_squeeze,
            band_expansion,
            volume_ratio,
            volume_anomaly,
            short_ma,
            atr,
            atr_baseline,
        })
    }

    /// SuperTrend-style running band.
    ///
    /// Basic bands sit at median price +/- multiplier * ATR. Final bands
    /// ratchet: an upper band only moves down while price stays below it,
    /// a lower band only moves up while price stays above. Direction flips
    /// when the close crosses the opposite band. The first candle seeds
    /// bearish with no prior direction.
    fn supertrend(
        &self,
        highs: &[f64],
        lows: &[f64],
        closes: &[f64],
        atr: &[f64],
    ) -> (TrendDirection, f64) {
        let n = closes.len();
        let mut direction = TrendDirection::Bearish;
        let mut upper = f64::MAX;
        let mut lower = f64::MIN;

        for i in 0..n {
            let median = (highs[i] + lows[i]) / 2.0;
            let basic_upper = median + self.config.trend_multiplier * atr[i];
            let basic_lower = median - self.config.trend_multiplier * atr[i];

            if i == 0 {
                upper = basic_upper;
                lower = basic_lower;
                continue;
            }

            upper = if basic_upper < upper || closes[i - 1] > upper {
                basic_upper
            } else {
                upper
            };
            lower = if basic_lower > lower || closes[i - 1] < lower {
                basic_lower
            } else {
                lower
            };

            direction = match direction {
                TrendDirection::Bearish if closes[i] > upper => TrendDirection::Bullish,
                TrendDirection::Bullish if closes[i] < lower => TrendDirection::Bearish,
                d => d,
            };
        }

        let band = match direction {
            TrendDirection::Bullish => lower,
            TrendDirection::Bearish => upper,
        };
        (direction, band)
    }

    /// Momentum as the first difference of a hull-style average of the
    /// volume-weighted price. Neutral 0.0 when the window is too short.
    fn hull_momentum(&self, typicals: &[f64], volumes: &[f64]) -> f64 {
        let period = self.config.hull_period;
        if typicals.len() < period + 1 {
            return 0.0;
        }

        let vwp = volume_weighted_price(typicals, volumes, period);
        let current = hull_ma(&vwp, period);
        let previous = hull_ma(&vwp[..vwp.len() - 1], period);

        match (current, previous) {
            (Some(now), Some(prev)) => now - prev,
            _ => 0.0,
        }
    }

    /// Money-flow oscillator: positive/negative flow ratio over the
    /// configured period, bounded to [0, 100]. Neutral 50.0 when short.
    fn money_flow(&self, typicals: &[f64], volumes: &[f64]) -> f64 {
        let period = self.config.money_flow_period;
        if typicals.len() < period + 1 {
            return 50.0;
        }

        let start = typicals.len() - period;
        let mut positive = 0.0;
        let mut negative = 0.0;
        for i in start..typicals.len() {
            let raw_flow = typicals[i] * volumes[i];
            if typicals[i] > typicals[i - 1] {
                positive += raw_flow;
            } else if typicals[i] < typicals[i - 1] {
                negative += raw_flow;
            }
        }

        if negative == 0.0 {
            return if positive > 0.0 { 100.0 } else { 50.0 };
        }
        let ratio = positive / negative;
        (100.0 - 100.0 / (1.0 + ratio)).clamp(0.0, 100.0)
    }

    /// Moving average +/- 2 sigma bands. Returns (position in [0,1],
    /// squeeze, expansion). Neutral (0.5, false, false) when short.
    fn volatility_bands(&self, closes: &[f64]) -> (f64, bool, bool) {
        let period = self.config.band_period;
        if closes.len() < period {
            return (0.5, false, false);
        }

        let width_at = |end: usize| -> Option<f64> {
            if end < period {
                return None;
            }
            let slice = &closes[end - period..end];
            let mid = mean(slice);
            let sd = stddev(slice, mid);
            Some(2.0 * self.config.band_stddev_mult * sd / mid.max(f64::EPSILON))
        };

        let slice = &closes[closes.len() - period..];
        let mid = mean(slice);
        let sd = stddev(slice, mid);
        let upper = mid + self.config.band_stddev_mult * sd;
        let lower = mid - self.config.band_stddev_mult * sd;
        let close = *closes.last().unwrap_or(&mid);

        let position = if upper > lower {
            ((close - lower) / (upper - lower)).clamp(0.0, 1.0)
        } else {
            0.5
        };

        // Current relative width against its rolling average
        let mut widths = Vec::new();
        for end in period..=closes.len() {
            if let Some(w) = width_at(end) {
                widths.push(w);
            }
        }
        let avg_width = mean(&widths);
        let current_width = widths.last().copied().unwrap_or(0.0);
        let squeeze = avg_width > 0.0 && current_width < avg_width * 0.8;
        let expansion = avg_width > 0.0 && current_width > avg_width * 1.2;

        (position, squeeze, expansion)
    }

    /// Current volume over rolling mean, plus the anomaly flag when the
    /// spike clears the configured sigma multiple. Neutral (1.0, false)
    /// when short.
    fn volume_ratio(&self, volumes: &[f64]) -> (f64, bool) {
        let lookback = self.config.volume_lookback;
        if volumes.len() < lookback + 1 {
            return (1.0, false);
        }

        let current = *volumes.last().unwrap_or(&0.0);
        let history = &volumes[volumes.len() - 1 - lookback..volumes.len() - 1];
        let avg = mean(history);
        if avg <= 0.0 {
            return (1.0, false);
        }

        let ratio = current / avg;
        let sd = stddev(history, avg);
        let anomaly = sd > 0.0 && current > avg + self.config.volume_anomaly_sigma * sd;
        (ratio, anomaly)
    }
}

impl Default for IndicatorEngine {
    fn default() -> Self {
        Self::new(IndicatorConfig::default())
    }
}

fn dec_f64(d: Decimal) -> f64 {
    d.to_f64().unwrap_or(0.0)
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn stddev(values: &[f64], mean: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Wilder-smoothed ATR series, one value per candle. The first candle's
/// true range is its own high-low.
fn atr_series(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Vec<f64> {
    let n = closes.len();
    let mut out = Vec::with_capacity(n);
    let mut atr = 0.0;
    for i in 0..n {
        let tr = if i == 0 {
            highs[0] - lows[0]
        } else {
            let hl = highs[i] - lows[i];
            let hc = (highs[i] - closes[i - 1]).abs();
            let lc = (lows[i] - closes[i - 1]).abs();
            hl.max(hc).max(lc)
        };
        atr = if i == 0 {
            tr
        } else {
            (atr * (period as f64 - 1.0) + tr) / period as f64
        };
        out.push(atr);
    }
    out
}

/// Rolling volume-weighted price series: sum(price*vol)/sum(vol) over the
/// trailing `period` for each point past warmup.
fn volume_weighted_price(typicals: &[f64], volumes: &[f64], period: usize) -> Vec<f64> {
    let n = typicals.len();
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let start = (i + 1).saturating_sub(period);
        let mut pv = 0.0;
        let mut v = 0.0;
        for j in start..=i {
            pv += typicals[j] * volumes[j];
            v += volumes[j];
        }
        out.push(if v > 0.0 { pv / v } else { typicals[i] });
    }
    out
}

/// Linearly weighted moving average of the last `period` values
fn wma_last(values: &[f64], period: usize) -> Option<f64> {
    if values.len() < period || period == 0 {
        return None;
    }
    let slice = &values[values.len() - period..];
    let denom = (period * (period + 1)) as f64 / 2.0;
    let weighted: f64 = slice
        .iter()
        .enumerate()
        .map(|(i, v)| v * (i + 1) as f64)
        .sum();
    Some(weighted / denom)
}

fn sma_last(values: &[f64], period: usize) -> Option<f64> {
    if values.len() < period || period == 0 {
        return None;
    }
    Some(mean(&values[values.len() - period..]))
}

/// Hull moving average: WMA(2*WMA(n/2) - WMA(n), sqrt(n))
fn hull_ma(values: &[f64], period: usize) -> Option<f64> {
    let half = (period / 2).max(1);
    let sqrt_period = (period as f64).sqrt().round().max(1.0) as usize;
    if values.len() < period + sqrt_period {
        return None;
    }

    let mut raw = Vec::with_capacity(sqrt_period);
    for back in (0..sqrt_period).rev() {
        let end = values.len() - back;
        let slice = &values[..end];
        let fast = wma_last(slice, half)?;
        let slow = wma_last(slice, period)?;
        raw.push(2.0 * fast - slow);
    }
    wma_last(&raw, sqrt_period)
}
