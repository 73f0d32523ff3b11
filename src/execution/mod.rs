//! Order execution
//!
//! The order lifecycle state machine and the engine that drives it
//! against the exchange: entry submission with retry and market
//! fallback, bracket placement, and reduce-only closes.

pub mod engine;
pub mod order;

pub use engine::{ExecutionConfig, ExecutionEngine};
pub use order::{Order, OrderKind, OrderStatus};
