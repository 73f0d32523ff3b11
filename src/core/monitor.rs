//! Position Monitor
//!
//! Polls open positions every cycle, retries missing bracket legs, and
//! decides which positions to close. Closes go out reduce-only through
//! the execution engine, and a position is only marked closed after the
//! closing fill is confirmed - never optimistically.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::types::{Position, PositionStatus, Side};
use crate::exchange::Exchange;
use crate::execution::engine::ExecutionEngine;

/// Why a position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    StopLoss,
    TakeProfit,
    MaxHoldExceeded,
    EmergencyStop,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::StopLoss => write!(f, "stop-loss breach"),
            CloseReason::TakeProfit => write!(f, "take-profit reached"),
            CloseReason::MaxHoldExceeded => write!(f, "max hold duration exceeded"),
            CloseReason::EmergencyStop => write!(f, "emergency stop"),
        }
    }
}

pub struct PositionMonitor {
    max_hold: Duration,
}

impl PositionMonitor {
    pub fn new(max_hold_hours: i64) -> Self {
        Self {
            max_hold: Duration::hours(max_hold_hours),
        }
    }

    /// Exit rules for one position, evaluated against the latest price.
    /// `emergency` is the external stop flag (daily loss limit or
    /// capital governor) and beats every other rule.
    pub fn should_close(
        &self,
        position: &Position,
        current_price: Decimal,
        now: DateTime<Utc>,
        emergency: bool,
    ) -> Option<CloseReason> {
        if emergency {
            return Some(CloseReason::EmergencyStop);
        }

        if let Some(stop) = position.stop_price {
            let breached = match position.side {
                Side::Buy => current_price <= stop,
                Side::Sell => current_price >= stop,
            };
            if breached {
                return Some(CloseReason::StopLoss);
            }
        }

        if let Some(target) = position.target_price {
            let reached = match position.side {
                Side::Buy => current_price >= target,
                Side::Sell => current_price <= target,
            };
            if reached {
                return Some(CloseReason::TakeProfit);
            }
        }

        if now - position.opened_at >= self.max_hold {
            return Some(CloseReason::MaxHoldExceeded);
        }

        None
    }

    /// One monitoring sweep: refresh prices, repair missing bracket
    /// legs, close triggered positions. Closed positions are drained
    /// from the list; per-position failures leave the position in place
    /// for the next sweep.
    pub async fn sweep(
        &self,
        positions: &mut Vec<Position>,
        exchange: &dyn Exchange,
        engine: &ExecutionEngine,
        emergency: bool,
    ) -> Vec<(Position, CloseReason)> {
        let mut closed = Vec::new();

        for position in positions.iter_mut() {
            match exchange.fetch_mark_price(&position.symbol).await {
                Ok(price) => position.current_price = price,
                // An emergency close goes out as a market order and
                // needs no fresh mark; anything else waits a sweep.
                Err(e) if !emergency => {
                    warn!("{}: price refresh failed, skipping: {}", position.symbol, e);
                    continue;
                }
                Err(e) => {
                    warn!(
                        "{}: price refresh failed, closing on stale mark: {}",
                        position.symbol, e
                    );
                }
            }

            // A leg lost to BracketLegFailed gets retried here
            if position.is_unprotected() {
                engine.place_brackets(position).await;
            }

            if let Some(reason) =
                self.should_close(position, position.current_price, Utc::now(), emergency)
            {
                info!("{}: closing position ({})", position.symbol, reason);
                match engine.close_position(position).await {
                    Ok(_) => closed.push((position.clone(), reason)),
                    Err(e) => {
                        // Stays open; next sweep tries again
                        warn!("{}: close failed: {}", position.symbol, e);
                    }
                }
            }
        }

        positions.retain(|p| p.status == PositionStatus::Open);
        closed
    }
}
