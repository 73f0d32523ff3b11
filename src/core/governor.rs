//! Capital Governor
//!
//! Tracks aggregate margin committed across open positions and gates new
//! risk. Capital-in-play is margin actually committed, not notional:
//! sum of (size * entry_price) / leverage over open positions, as a
//! percent of equity. It is recomputed on every check - positions and
//! equity change continuously, so a cached value is a financial-risk bug.
//!
//! Also owns the daily loss limit: once breached, the emergency flag
//! stays up until the next trading day.

use chrono::{NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::CapitalConfig;
use crate::core::types::Position;

/// Outcome of a capital check for one prospective entry
#[derive(Debug, Clone, PartialEq)]
pub enum CapitalVerdict {
    Allow,
    /// Entry passes but exposure is elevated; surfaced to the caller,
    /// no size change here.
    AllowWithWarning { capital_in_play_pct: Decimal },
    Deny {
        reason: String,
        /// When set, the caller is expected to halt the scan loop
        emergency: bool,
    },
}

impl CapitalVerdict {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, CapitalVerdict::Deny { .. })
    }

    pub fn is_emergency(&self) -> bool {
        matches!(self, CapitalVerdict::Deny { emergency: true, .. })
    }
}

/// Read-only capital snapshot for the status surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapitalStatus {
    pub equity: Decimal,
    pub capital_in_play_pct: Decimal,
    pub open_positions: usize,
    pub daily_pnl_pct: Decimal,
    pub emergency: bool,
}

pub struct CapitalGovernor {
    config: CapitalConfig,
    max_positions: usize,
    /// Start-of-day equity baseline for the daily loss limit
    day_start_equity: Option<Decimal>,
    current_day: NaiveDate,
    emergency_latched: bool,
}

impl CapitalGovernor {
    pub fn new(config: CapitalConfig, max_positions: usize) -> Self {
        Self {
            config,
            max_positions,
            day_start_equity: None,
            current_day: Utc::now().date_naive(),
            emergency_latched: false,
        }
    }

    /// Margin committed across open positions as a percent of equity
    pub fn capital_in_play_pct(equity: Decimal, positions: &[Position]) -> Decimal {
        if equity <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let committed: Decimal = positions.iter().map(|p| p.margin()).sum();
        committed / equity * Decimal::from(100)
    }

    /// Gate one prospective entry. Never touches existing positions.
    pub fn check(&mut self, equity: Decimal, positions: &[Position]) -> CapitalVerdict {
        self.roll_day(equity);

        if self.update_daily_loss(equity) {
            return CapitalVerdict::Deny {
                reason: "emergency".to_string(),
                emergency: true,
            };
        }

        let p = Self::capital_in_play_pct(equity, positions);

        if p >= self.config.emergency_pct {
            self.emergency_latched = true;
            warn!(
                "capital emergency: {:.2}% in play >= {}% threshold",
                p.to_f64().unwrap_or(0.0),
                self.config.emergency_pct
            );
            return CapitalVerdict::Deny {
                reason: "emergency".to_string(),
                emergency: true,
            };
        }

        if positions.len() >= self.max_positions {
            return CapitalVerdict::Deny {
                reason: format!(
                    "max positions reached ({}/{})",
                    positions.len(),
                    self.max_positions
                ),
                emergency: false,
            };
        }

        if p >= self.config.reduction_pct {
            return CapitalVerdict::Deny {
                reason: "position-size-reduction-active".to_string(),
                emergency: false,
            };
        }

        if p >= self.config.warning_pct {
            return CapitalVerdict::AllowWithWarning {
                capital_in_play_pct: p,
            };
        }

        CapitalVerdict::Allow
    }

    /// True while the emergency flag is raised
    pub fn emergency_active(&self) -> bool {
        self.emergency_latched
    }

    pub fn status(&self, equity: Decimal, positions: &[Position]) -> CapitalStatus {
        CapitalStatus {
            equity,
            capital_in_play_pct: Self::capital_in_play_pct(equity, positions),
            open_positions: positions.len(),
            daily_pnl_pct: self.daily_pnl_pct(equity),
            emergency: self.emergency_latched,
        }
    }

    fn daily_pnl_pct(&self, equity: Decimal) -> Decimal {
        match self.day_start_equity {
            Some(start) if start > Decimal::ZERO => {
                (equity - start) / start * Decimal::from(100)
            }
            _ => Decimal::ZERO,
        }
    }

    /// Returns true when the daily loss limit is breached; latches the
    /// emergency flag.
    fn update_daily_loss(&mut self, equity: Decimal) -> bool {
        if self.emergency_latched {
            return true;
        }
        let pnl = self.daily_pnl_pct(equity);
        if pnl < -self.config.daily_loss_limit_pct {
            warn!(
                "daily loss limit breached: {:.2}% < -{}%",
                pnl.to_f64().unwrap_or(0.0),
                self.config.daily_loss_limit_pct
            );
            self.emergency_latched = true;
            return true;
        }
        false
    }

    fn roll_day(&mut self, equity: Decimal) {
        let today = Utc::now().date_naive();
        if self.day_start_equity.is_none() || today != self.current_day {
            self.current_day = today;
            self.day_start_equity = Some(equity);
            self.emergency_latched = false;
        }
    }
}
