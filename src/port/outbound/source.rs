//! Historical data ports used to fill gaps after reconnects.
//!
//! Request construction and payload mapping are exchange specific; these
//! traits only fix the paging contract the backfiller relies on.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{Candle, Direction, Price, Size, Span};
use crate::error::Result;

/// A trade as reported by an exchange, before sequencing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTrade {
    /// Native trade id, if the exchange has one.
    pub id: Option<u64>,
    pub direction: Direction,
    pub size: Size,
    pub price: Price,
    pub time_ms: i64,
}

/// Trade history endpoint that filters by time.
#[async_trait]
pub trait TradeSource: Send + Sync {
    /// Trades executed at or after `from_ms`, oldest first.
    ///
    /// May return fewer trades than exist; an empty page means there is
    /// nothing newer.
    async fn trades_from(&self, from_ms: i64) -> Result<Vec<RawTrade>>;
}

/// Candle history endpoint.
#[async_trait]
pub trait CandleSource: Send + Sync {
    /// Candles of `span` starting in `[start_ms, end_ms)`, oldest first.
    ///
    /// May return a truncated page; callers continue after the last bar.
    async fn candles(&self, span: Span, start_ms: i64, end_ms: i64) -> Result<Vec<Candle>>;
}
