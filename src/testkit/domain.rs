//! Builders for domain primitives used across tests.
//!
//! Provides concise factory functions for [`Candle`] and [`RawTrade`], and
//! in-memory history sources implementing the backfill ports.

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::domain::{Candle, Direction, Span};
use crate::error::Result;
use crate::port::{CandleSource, RawTrade, TradeSource};

/// A one-minute rising candle around `base` with the given volume.
pub fn candle(time_ms: i64, base: i64, volume: Decimal) -> Candle {
    let base = Decimal::from(base);
    Candle {
        open: base,
        high: base + Decimal::from(10),
        low: base - Decimal::from(5),
        close: base + Decimal::from(5),
        volume,
        time_ms,
        span: Span::Minute1,
    }
}

/// `count` consecutive one-minute candles starting at `start_ms`.
pub fn candles(start_ms: i64, count: usize) -> Vec<Candle> {
    (0..count)
        .map(|i| {
            let i = i as i64;
            candle(start_ms + i * Span::Minute1.millis(), 100 + i, Decimal::from(4))
        })
        .collect()
}

/// A trade without a native id.
pub fn trade(direction: Direction, price: i64, time_ms: i64) -> RawTrade {
    RawTrade {
        id: None,
        direction,
        size: Decimal::ONE,
        price: Decimal::from(price),
        time_ms,
    }
}

/// Trade history answering pages of at most `page_size` trades.
pub struct MemoryTradeSource {
    trades: Vec<RawTrade>,
    page_size: usize,
    requests: Mutex<Vec<i64>>,
}

impl MemoryTradeSource {
    /// `trades` must be sorted by time.
    pub fn new(trades: Vec<RawTrade>, page_size: usize) -> Self {
        Self {
            trades,
            page_size: page_size.max(1),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// `from_ms` of every request made so far.
    pub fn requests(&self) -> Vec<i64> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl TradeSource for MemoryTradeSource {
    async fn trades_from(&self, from_ms: i64) -> Result<Vec<RawTrade>> {
        self.requests.lock().push(from_ms);
        Ok(self
            .trades
            .iter()
            .filter(|trade| trade.time_ms >= from_ms)
            .take(self.page_size)
            .cloned()
            .collect())
    }
}

/// Candle history answering pages of at most `page_size` bars.
pub struct MemoryCandleSource {
    candles: Vec<Candle>,
    page_size: usize,
}

impl MemoryCandleSource {
    pub fn new(candles: Vec<Candle>, page_size: usize) -> Self {
        Self {
            candles,
            page_size: page_size.max(1),
        }
    }
}

#[async_trait]
impl CandleSource for MemoryCandleSource {
    async fn candles(&self, span: Span, start_ms: i64, end_ms: i64) -> Result<Vec<Candle>> {
        Ok(self
            .candles
            .iter()
            .filter(|c| c.span == span && c.time_ms >= start_ms && c.time_ms < end_ms)
            .take(self.page_size)
            .cloned()
            .collect())
    }
}
