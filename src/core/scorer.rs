//! Signal Scorer
//!
//! Combines an indicator set into a directional signal with a 0-95
//! confidence score. Pure function of its inputs: no hidden state, so
//! identical indicator sets always score identically.
//!
//! Three gates, in order:
//! 1. Volume: ratio must clear the spike multiple.
//! 2. Direction: trend, short MA and trend band must all agree.
//! 3. Confidence: the weighted sum must clear the minimum threshold.
//!
//! A signal that fails any gate is never emitted.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::core::indicators::{IndicatorSet, TrendDirection};
use crate::core::types::{ComponentScores, Side, Signal};

/// Headroom below 100: never report false certainty
pub const MAX_CONFIDENCE: f64 = 95.0;

/// Direction scored on one higher/lower timeframe, fed in for the
/// optional alignment bonus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeframeScore {
    /// Timeframe label, e.g. "5m"
    pub timeframe: String,
    pub side: Side,
}

/// Weight of each timeframe in the alignment bonus. Unknown labels get a
/// small default so a misconfigured feed cannot dominate the score.
fn timeframe_weight(timeframe: &str) -> f64 {
    match timeframe {
        "1m" => 3.0,
        "3m" => 5.0,
        "5m" => 8.0,
        "10m" => 6.0,
        "15m" => 4.0,
        _ => 2.0,
    }
}

#[derive(Debug, Clone)]
pub struct ScorerConfig {
    /// Gate 1: minimum volume spike multiple
    pub min_volume_ratio: f64,
    /// Gate 3: minimum final confidence
    pub min_confidence: f64,
    /// Cap on the volume-strength term
    pub volume_cap: f64,
    /// Trend strength percent at which the tier reads STRONG
    pub strong_trend_pct: f64,
    /// Trend strength percent at which the tier reads MODERATE
    pub moderate_trend_pct: f64,
    /// Extra confidence when at least this many timeframes agree
    pub alignment_quorum: usize,
    pub alignment_bonus: f64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            min_volume_ratio: 1.3,
            min_confidence: 72.0,
            volume_cap: 30.0,
            strong_trend_pct: 2.0,
            moderate_trend_pct: 1.0,
            alignment_quorum: 3,
            alignment_bonus: 10.0,
        }
    }
}

pub struct SignalScorer {
    config: ScorerConfig,
}

impl SignalScorer {
    pub fn new(config: ScorerConfig) -> Self {
        Self { config }
    }

    /// Score an indicator set into a signal, or nothing when any gate
    /// rejects it.
    pub fn score(
        &self,
        symbol: &str,
        price: Decimal,
        set: &IndicatorSet,
        higher_timeframes: &[TimeframeScore],
        timestamp: DateTime<Utc>,
    ) -> Option<Signal> {
        // Gate 1: no volume, no trade
        if set.volume_ratio < self.config.min_volume_ratio {
            return None;
        }

        // Gate 2: direction requires full agreement
        let side = self.direction(set)?;

        let components = self.components(side, set, higher_timeframes);
        let confidence = components.total().clamp(0.0, MAX_CONFIDENCE);

        // Gate 3: below threshold the signal is discarded, never emitted
        if confidence < self.config.min_confidence {
            return None;
        }

        Some(Signal {
            symbol: symbol.to_string(),
            side,
            price,
            confidence,
            components,
            timestamp,
        })
    }

    /// Buy wants a bullish band with price above both the short MA and
    /// the band itself; sell is the mirror. Anything mixed is no trade.
    /// Public so higher-timeframe windows can vote without full scoring.
    pub fn direction(&self, set: &IndicatorSet) -> Option<Side> {
        match set.trend_direction {
            TrendDirection::Bullish
                if set.close > set.short_ma && set.close > set.trend_band =>
            {
                Some(Side::Buy)
            }
            TrendDirection::Bearish
                if set.close < set.short_ma && set.close < set.trend_band =>
            {
                Some(Side::Sell)
            }
            _ => None,
        }
    }

    fn components(
        &self,
        side: Side,
        set: &IndicatorSet,
        higher_timeframes: &[TimeframeScore],
    ) -> ComponentScores {
        // Volume-strength term, capped so one absurd print cannot carry
        // the whole score
        let volume = ((set.volume_ratio - 1.0) * 20.0).clamp(0.0, self.config.volume_cap);

        // Trend term scaled by quality tier
        let trend = if set.trend_strength_pct >= self.config.strong_trend_pct {
            35.0 // STRONG
        } else if set.trend_strength_pct >= self.config.moderate_trend_pct {
            25.0 // MODERATE
        } else {
            15.0 // WEAK
        };

        // Oscillator confluence: only when it agrees with direction
        let oscillator = match side {
            Side::Buy if set.oversold => 5.0,
            Side::Buy if set.money_flow > 50.0 && !set.overbought => 3.0,
            Side::Sell if set.overbought => 5.0,
            Side::Sell if set.money_flow < 50.0 && !set.oversold => 3.0,
            _ => 0.0,
        };

        // Band confluence: entries near the favorable band edge
        let volatility_band = match side {
            Side::Buy if set.band_position <= 0.3 => 5.0,
            Side::Sell if set.band_position >= 0.7 => 5.0,
            _ => 0.0,
        };

        let timeframe_alignment = self.alignment_bonus(side, higher_timeframes);

        ComponentScores {
            volume,
            trend,
            oscillator,
            volatility_band,
            timeframe_alignment,
        }
    }

    /// Sum of per-timeframe weights for agreeing timeframes, plus a flat
    /// bonus once the quorum agrees.
    fn alignment_bonus(&self, side: Side, scores: &[TimeframeScore]) -> f64 {
        let agreeing: Vec<&TimeframeScore> =
            scores.iter().filter(|s| s.side == side).collect();

        let mut bonus: f64 = agreeing
            .iter()
            .map(|s| timeframe_weight(&s.timeframe))
            .sum();
        if agreeing.len() >= self.config.alignment_quorum {
            bonus += self.config.alignment_bonus;
        }
        bonus
    }
}

impl Default for SignalScorer {
    fn default() -> Self {
        Self::new(ScorerConfig::default())
    }
}
