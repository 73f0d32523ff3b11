//! Core decision pipeline
//!
//! Candle window -> indicators -> scored signal -> capital gate -> sizing.
//! Everything here is exchange-agnostic; execution lives one module over.

pub mod governor;
pub mod indicators;
pub mod monitor;
pub mod scorer;
pub mod sizer;
pub mod types;

pub use governor::{CapitalGovernor, CapitalStatus, CapitalVerdict};
pub use indicators::{IndicatorEngine, IndicatorSet, TrendDirection};
pub use monitor::{CloseReason, PositionMonitor};
pub use scorer::{ScorerConfig, SignalScorer, TimeframeScore};
pub use sizer::{PositionSizer, SizerConfig};
pub use types::{AccountState, Candle, CandleWindow, Position, PositionStatus, Side, Signal, SizingDecision};
