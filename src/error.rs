//! Error taxonomy for the trading core
//!
//! Rejections that are expected outcomes of gating (a signal below the
//! confidence threshold) are not errors - those paths return `Option`.
//! Everything here is either recoverable per-symbol or escalates to
//! pausing new entries, never to touching positions already open.

use thiserror::Error;

use crate::execution::order::{IllegalTransition, OrderKind};

#[derive(Debug, Error)]
pub enum CoreError {
    /// Candle window too short for the trend indicator. Skip the symbol
    /// this cycle.
    #[error("insufficient data: {got} candles, need {need}")]
    InsufficientData { got: usize, need: usize },

    /// Capital governor refused a new entry.
    #[error("capital denied: {0}")]
    CapitalDenied(String),

    /// Sizer could not produce a tradable quantity.
    #[error("sizing rejected: {0}")]
    SizingRejected(String),

    /// Order submission failed after exhausting the retry budget.
    #[error("order submission failed for {symbol}: {source}")]
    OrderSubmissionFailed {
        symbol: String,
        #[source]
        source: anyhow::Error,
    },

    /// A bracket leg failed to place. The position stays open and
    /// unprotected; the monitor retries on its next cycle.
    #[error("bracket leg failed: {kind} for {symbol}")]
    BracketLegFailed { symbol: String, kind: OrderKind },

    /// Account equity/margin could not be fetched. Fatal for the current
    /// cycle only: no new entries, monitoring continues.
    #[error("account state unavailable: {0}")]
    AccountStateUnavailable(String),

    /// Exchange call failed outside order submission.
    #[error("exchange unavailable: {0}")]
    ExchangeUnavailable(String),

    /// The order lifecycle was driven into an illegal transition.
    #[error(transparent)]
    OrderState(#[from] IllegalTransition),
}

impl CoreError {
    /// Errors that only skip the current symbol, leaving the rest of the
    /// cycle untouched.
    pub fn is_symbol_local(&self) -> bool {
        !matches!(self, CoreError::AccountStateUnavailable(_))
    }
}
