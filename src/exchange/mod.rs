//! Exchange Module
//!
//! The seam between the core and the venue. The core only ever talks to
//! this trait; the wire client (REST/WS, auth, rate limits) lives behind
//! it. A paper implementation ships for dry runs and tests.

pub mod paper;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core::types::{AccountState, Candle, Position, Side};
use crate::execution::order::OrderKind;

/// Order submission payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub kind: OrderKind,
    pub quantity: Decimal,
    /// None submits a market order
    pub price: Option<Decimal>,
    /// Reduce-only orders can only shrink an existing position
    pub reduce_only: bool,
}

/// Submission acknowledgement: the venue-assigned order id
#[derive(Debug, Clone)]
pub struct OrderAck {
    pub order_id: String,
}

/// Venue-side order state as reported by status polling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VenueOrderStatus {
    Open,
    Filled,
    Cancelled,
}

/// Polled order snapshot
#[derive(Debug, Clone)]
pub struct OrderSnapshot {
    pub order_id: String,
    pub status: VenueOrderStatus,
    /// Some venues omit the fill price; callers fall back to the
    /// requested price
    pub fill_price: Option<Decimal>,
}

/// All venue operations the core consumes
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Ordered candle history, oldest first
    async fn fetch_candles(&self, symbol: &str, timeframe: &str, lookback: usize)
        -> Result<Vec<Candle>>;

    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderAck>;

    async fn fetch_order(&self, symbol: &str, order_id: &str) -> Result<OrderSnapshot>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()>;

    async fn fetch_account(&self) -> Result<AccountState>;

    async fn fetch_positions(&self) -> Result<Vec<Position>>;

    /// Latest traded price
    async fn fetch_mark_price(&self, symbol: &str) -> Result<Decimal>;
}
