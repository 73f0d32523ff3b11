//! Configuration loader
//!
//! One immutable `Settings` struct built at startup and passed by
//! reference into every component constructor. No module-level state.
//!
//! Strategy thresholds (confidence, volume spike multiple) are tunables
//! here, not separate code paths.

use anyhow::{bail, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::fs;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub system: SystemConfig,
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub capital: CapitalConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    pub symbols: Vec<SymbolConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfig {
    pub name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    /// Percent of equity committed per position before clamps.
    pub position_size_pct: Decimal,
    /// Percent of equity risked when sizing from a stop distance.
    pub risk_per_trade_pct: Decimal,
    /// Leverage applied to every position.
    pub leverage: Decimal,
    /// Absolute notional floor in USD. Wins over the percentage math.
    pub min_order_usd: Decimal,
    /// Absolute notional ceiling in USD. Wins over the percentage math.
    pub max_position_usd: Decimal,
    /// Multiplier applied when independent timeframes agree.
    pub confluence_boost: Decimal,
    /// Minimum confidence a signal needs to survive the final gate.
    pub min_confidence: f64,
    /// Minimum volume spike multiple for the first gate.
    pub min_volume_ratio: f64,
    /// Stop-loss offset from fill price, percent.
    pub stop_loss_pct: Decimal,
    /// Take-profit offset from fill price, percent.
    pub take_profit_pct: Decimal,
    /// Bracket offsets derived from ATR are clamped into this band.
    pub min_bracket_pct: Decimal,
    pub max_bracket_pct: Decimal,
    /// Hard cap on simultaneous open positions.
    pub max_positions: usize,
    /// Close any position held longer than this.
    pub max_hold_hours: i64,
    /// Seconds to wait after closing a symbol before re-entering it.
    pub reentry_cooldown_secs: i64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            position_size_pct: dec!(11),
            risk_per_trade_pct: dec!(2),
            leverage: dec!(25),
            min_order_usd: dec!(5),
            max_position_usd: dec!(1000),
            confluence_boost: dec!(1.15),
            min_confidence: 72.0,
            min_volume_ratio: 1.3,
            stop_loss_pct: dec!(1.25),
            take_profit_pct: dec!(1.5),
            min_bracket_pct: dec!(0.5),
            max_bracket_pct: dec!(3.0),
            max_positions: 5,
            max_hold_hours: 8,
            reentry_cooldown_secs: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CapitalConfig {
    /// Above this margin-in-play percent, entries still pass but carry a warning.
    pub warning_pct: Decimal,
    /// Above this, new entries are denied while existing positions run.
    pub reduction_pct: Decimal,
    /// Above this, everything halts and the emergency flag is raised.
    pub emergency_pct: Decimal,
    /// Daily loss (percent of start-of-day equity) that trips the emergency stop.
    pub daily_loss_limit_pct: Decimal,
}

impl Default for CapitalConfig {
    fn default() -> Self {
        Self {
            warning_pct: dec!(65),
            reduction_pct: dec!(75),
            emergency_pct: dec!(85),
            daily_loss_limit_pct: dec!(5),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Seconds between scan cycles.
    pub poll_interval_secs: u64,
    /// Bounded worker pool for per-symbol evaluation.
    pub max_concurrent_scans: usize,
    /// How long a limit entry may sit unfilled before market fallback.
    pub entry_fill_timeout_secs: u64,
    /// 1-based submission attempt budget.
    pub order_retry_attempts: u32,
    /// Linear backoff step between attempts.
    pub retry_backoff_ms: u64,
    /// Candles fetched per window. Must cover the slowest indicator.
    pub candle_lookback: usize,
    /// Timeframes scanned per symbol. The first is the primary signal
    /// timeframe; the rest feed the alignment bonus.
    pub timeframes: Vec<String>,
    /// When set, a JSON snapshot is written here every cycle for the
    /// out-of-process dashboard.
    pub snapshot_path: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 15,
            max_concurrent_scans: 5,
            entry_fill_timeout_secs: 10,
            order_retry_attempts: 3,
            retry_backoff_ms: 1000,
            candle_lookback: 200,
            timeframes: vec!["5m".to_string()],
            snapshot_path: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SymbolConfig {
    pub name: String,
    /// Exchange-imposed minimum tradable quantity.
    #[serde(default)]
    pub min_quantity: Decimal,
}

impl Settings {
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&contents)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject configurations the capital state machine cannot order.
    pub fn validate(&self) -> Result<()> {
        let c = &self.capital;
        if !(c.warning_pct < c.reduction_pct && c.reduction_pct < c.emergency_pct) {
            bail!(
                "capital thresholds must be ordered: warning {} < reduction {} < emergency {}",
                c.warning_pct,
                c.reduction_pct,
                c.emergency_pct
            );
        }
        if self.trading.min_order_usd > self.trading.max_position_usd {
            bail!("min_order_usd exceeds max_position_usd");
        }
        if self.trading.leverage <= Decimal::ZERO {
            bail!("leverage must be positive");
        }
        if self.symbols.is_empty() {
            bail!("at least one symbol required");
        }
        if self.engine.timeframes.is_empty() {
            bail!("at least one timeframe required");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_settings() -> Settings {
        Settings {
            system: SystemConfig {
                name: "crestline".to_string(),
                log_level: default_log_level(),
            },
            trading: TradingConfig::default(),
            capital: CapitalConfig::default(),
            engine: EngineConfig::default(),
            symbols: vec![SymbolConfig {
                name: "BTC/USDT".to_string(),
                min_quantity: dec!(0.0001),
            }],
        }
    }

    #[test]
    fn test_defaults_validate() {
        assert!(base_settings().validate().is_ok());
    }

    #[test]
    fn test_unordered_thresholds_rejected() {
        let mut settings = base_settings();
        settings.capital.warning_pct = dec!(90);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_empty_symbols_rejected() {
        let mut settings = base_settings();
        settings.symbols.clear();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml = r#"
            [system]
            name = "crestline"

            [[symbols]]
            name = "ETH/USDT"
        "#;
        let settings: Settings = toml::from_str(toml).unwrap();
        assert_eq!(settings.symbols[0].name, "ETH/USDT");
        assert_eq!(settings.trading.min_confidence, 72.0);
        assert_eq!(settings.capital.emergency_pct, dec!(85));
    }
}
