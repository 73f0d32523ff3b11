//! Position Sizer
//!
//! Converts a scored signal plus account state into an order quantity
//! under leverage and absolute USD bounds. Two paths:
//!
//! - Flat-percentage: a percent of equity, boosted on confluence and
//!   shrunk when recent volatility runs above its baseline.
//! - Stop-distance: when a volatility-derived stop is supplied it takes
//!   precedence, risking a fixed percent of equity against the stop
//!   distance.
//!
//! Both paths end at the same clamps: the absolute floor always wins
//! over the percentage math for small accounts, the ceiling for large
//! ones, and margin must fit the available balance.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use crate::config::TradingConfig;
use crate::core::types::{AccountState, Signal, SizingDecision};

#[derive(Debug, Clone)]
pub struct SizerConfig {
    pub position_size_pct: Decimal,
    pub risk_per_trade_pct: Decimal,
    pub leverage: Decimal,
    pub min_order_usd: Decimal,
    pub max_position_usd: Decimal,
    pub confluence_boost: Decimal,
    /// Volatility shrink factor is capped here
    pub max_risk_adjustment: Decimal,
}

impl SizerConfig {
    pub fn from_trading(cfg: &TradingConfig) -> Self {
        Self {
            position_size_pct: cfg.position_size_pct,
            risk_per_trade_pct: cfg.risk_per_trade_pct,
            leverage: cfg.leverage,
            min_order_usd: cfg.min_order_usd,
            max_position_usd: cfg.max_position_usd,
            confluence_boost: cfg.confluence_boost,
            max_risk_adjustment: dec!(2),
        }
    }
}

pub struct PositionSizer {
    config: SizerConfig,
}

impl PositionSizer {
    pub fn new(config: SizerConfig) -> Self {
        Self { config }
    }

    /// Size a signal into an order quantity. `stop_price`, when present,
    /// drives sizing directly and takes precedence over the percentage
    /// path. `min_quantity` is the exchange-imposed minimum tradable size.
    #[allow(clippy::too_many_arguments)]
    pub fn size(
        &self,
        signal: &Signal,
        account: &AccountState,
        stop_price: Option<Decimal>,
        min_quantity: Decimal,
        is_confluence: bool,
        atr: f64,
        atr_baseline: f64,
    ) -> SizingDecision {
        if signal.price <= Decimal::ZERO {
            return SizingDecision::rejected("non-positive entry price");
        }
        if account.equity <= Decimal::ZERO {
            return SizingDecision::rejected("non-positive equity");
        }

        let raw_notional = match stop_price {
            Some(stop) => self.stop_distance_notional(signal, account, stop),
            None => self.percentage_notional(account, is_confluence, atr, atr_baseline),
        };

        let notional = match raw_notional {
            Ok(n) => n,
            Err(reason) => return SizingDecision::rejected(&reason),
        };

        // Absolute bounds win over the percentage formula in both
        // directions
        let notional = notional
            .max(self.config.min_order_usd)
            .min(self.config.max_position_usd);

        let required_margin = notional / self.config.leverage;
        if required_margin > account.free_margin {
            return SizingDecision::rejected(&format!(
                "required margin {} exceeds available {}",
                required_margin.round_dp(4),
                account.free_margin
            ));
        }

        let mut quantity = notional / signal.price;
        let mut notional = notional;
        let mut required_margin = required_margin;

        if quantity < min_quantity {
            // Try funding the exchange minimum within the margin budget
            let min_notional = min_quantity * signal.price;
            let min_margin = min_notional / self.config.leverage;
            if min_notional <= self.config.max_position_usd && min_margin <= account.free_margin {
                debug!(
                    "bumping quantity {} to exchange minimum {}",
                    quantity, min_quantity
                );
                quantity = min_quantity;
                notional = min_notional;
                required_margin = min_margin;
            } else {
                return SizingDecision::rejected(&format!(
                    "quantity {} below exchange minimum {} and minimum cannot be funded",
                    quantity.round_dp(8),
                    min_quantity
                ));
            }
        }

        SizingDecision {
            quantity,
            notional,
            required_margin,
            leverage: self.config.leverage,
            rejected: false,
            reason: None,
        }
    }

    fn percentage_notional(
        &self,
        account: &AccountState,
        is_confluence: bool,
        atr: f64,
        atr_baseline: f64,
    ) -> Result<Decimal, String> {
        let mut notional = account.equity * self.config.position_size_pct / dec!(100);

        if is_confluence {
            notional *= self.config.confluence_boost;
        }

        // Higher recent volatility means smaller size
        notional /= self.risk_adjustment(atr, atr_baseline);
        Ok(notional)
    }

    fn stop_distance_notional(
        &self,
        signal: &Signal,
        account: &AccountState,
        stop: Decimal,
    ) -> Result<Decimal, String> {
        let distance = (signal.price - stop).abs();
        if distance.is_zero() {
            return Err("stop distance is zero".to_string());
        }
        let risk_amount = account.equity * self.config.risk_per_trade_pct / dec!(100);
        let quantity = risk_amount / distance;
        Ok(quantity * signal.price)
    }

    /// Recent ATR relative to its baseline, floored at 1 (never size up
    /// on quiet markets) and capped so a volatility print cannot zero
    /// the size.
    fn risk_adjustment(&self, atr: f64, atr_baseline: f64) -> Decimal {
        if atr_baseline <= 0.0 || atr <= 0.0 {
            return Decimal::ONE;
        }
        let factor = (atr / atr_baseline).max(1.0);
        Decimal::from_f64(factor)
            .unwrap_or(Decimal::ONE)
            .min(self.config.max_risk_adjustment)
    }
}
