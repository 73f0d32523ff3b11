//! Crestline Library
//!
//! A bounded-risk autonomous trading core for perpetual futures.
//!
//! # Pipeline
//!
//! - Candle window -> indicator features -> scored directional signal
//! - Capital governor gates every new entry against margin-in-play
//! - Position sizer converts signal + account state into an order
//! - Execution engine places entry + stop-loss/take-profit bracket
//! - Position monitor polls open positions and requests closes

pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod execution;
