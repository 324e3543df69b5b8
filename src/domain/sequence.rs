//! Synthetic monotonic execution ids.
//!
//! Exchanges that only report a timestamp get comparable ids of the form
//! `time_ms * padding + counter`, where `counter` numbers the executions that
//! share one millisecond inside a single logical stream.
//!
//! ```
//! use rust_decimal_macros::dec;
//! use tradeline::domain::{Consecutive, Direction, SequenceContext, Sequencer};
//!
//! let sequencer = Sequencer::new("bybit", 100_000).unwrap();
//! let mut context = SequenceContext::default();
//!
//! let first = sequencer.create_execution(Direction::Buy, dec!(1), dec!(100), 1_000, &mut context);
//! let second = sequencer.create_execution(Direction::Buy, dec!(1), dec!(100), 1_000, &mut context);
//!
//! assert_eq!(second.id, first.id + 1);
//! assert_eq!(second.consecutive, Consecutive::SameBuyer);
//! assert_eq!(sequencer.compute_epoch_time(second.id), 1_000);
//! ```

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use tracing::warn;

use super::candle::Candle;
use super::error::DomainError;
use super::execution::{Consecutive, Direction, Execution};
use super::money::{Price, Size};

/// Default padding: up to 100k executions per millisecond.
pub const DEFAULT_PADDING: u64 = 100_000;

/// Latest time every sequencer must be able to encode (2500-01-01T00:00:00Z).
pub const ID_HORIZON_MS: i64 = 16_725_225_600_000;

/// Largest padding whose ids stay within `u64` up to [`ID_HORIZON_MS`].
pub const MAX_PADDING: u64 = u64::MAX / (ID_HORIZON_MS as u64 + 1);

/// Per-stream sequencing state.
///
/// Owned by exactly one logical stream (a live subscription or one REST
/// pagination run) and passed explicitly to every call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequenceContext {
    pub last_direction: Option<Direction>,
    pub last_time_ms: Option<i64>,
    pub last_counter: u64,
}

impl SequenceContext {
    /// Context that continues after a known execution.
    #[must_use]
    pub fn resume(direction: Direction, time_ms: i64, counter: u64) -> Self {
        Self {
            last_direction: Some(direction),
            last_time_ms: Some(time_ms),
            last_counter: counter,
        }
    }
}

/// Manufactures and decodes synthetic ids for one exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequencer {
    padding: u64,
    source: String,
}

impl Sequencer {
    /// Create a sequencer tagging its records with `source`.
    pub fn new(source: impl Into<String>, padding: u64) -> Result<Self, DomainError> {
        if padding == 0 {
            return Err(DomainError::InvalidPadding(padding));
        }
        if padding > MAX_PADDING {
            return Err(DomainError::PaddingTooLarge {
                padding,
                max: MAX_PADDING,
            });
        }
        Ok(Self {
            padding,
            source: source.into(),
        })
    }

    /// Sequencer using [`DEFAULT_PADDING`].
    #[must_use]
    pub fn with_default_padding(source: impl Into<String>) -> Self {
        Self {
            padding: DEFAULT_PADDING,
            source: source.into(),
        }
    }

    #[must_use]
    pub const fn padding(&self) -> u64 {
        self.padding
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// First id of the given millisecond (counter 0).
    ///
    /// Times before the epoch clamp to 0.
    #[must_use]
    pub fn compute_id(&self, time_ms: i64) -> u64 {
        self.encode(time_ms, 0)
    }

    /// Encode `(time_ms, counter)` into one id.
    ///
    /// Saturates at `u64::MAX` past [`ID_HORIZON_MS`].
    #[must_use]
    pub fn encode(&self, time_ms: i64, counter: u64) -> u64 {
        u64::try_from(time_ms)
            .unwrap_or(0)
            .checked_mul(self.padding)
            .and_then(|base| base.checked_add(counter))
            .unwrap_or(u64::MAX)
    }

    /// Split an id back into `(time_ms, counter)`.
    #[must_use]
    pub fn decode(&self, id: u64) -> (i64, u64) {
        (self.compute_epoch_time(id), self.compute_counter(id))
    }

    /// Epoch milliseconds encoded in an id.
    #[must_use]
    pub fn compute_epoch_time(&self, id: u64) -> i64 {
        i64::try_from(id / self.padding).unwrap_or(i64::MAX)
    }

    /// Intra-millisecond counter encoded in an id.
    #[must_use]
    pub fn compute_counter(&self, id: u64) -> u64 {
        id % self.padding
    }

    /// UTC date-time encoded in an id.
    #[must_use]
    pub fn compute_date_time(&self, id: u64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.compute_epoch_time(id))
            .single()
            .unwrap_or_default()
    }

    /// Build an execution with a synthetic id and update `context`.
    pub fn create_execution(
        &self,
        direction: Direction,
        size: Size,
        price: Price,
        time_ms: i64,
        context: &mut SequenceContext,
    ) -> Execution {
        let same_tick = context.last_time_ms == Some(time_ms);
        let counter = if same_tick {
            context.last_counter + 1
        } else {
            0
        };

        if counter == self.padding {
            warn!(
                source = %self.source,
                time_ms,
                padding = self.padding,
                "Intra-millisecond counter reached padding, ids will collide"
            );
        }

        let consecutive = Self::consecutive_for(direction, same_tick, context.last_direction);

        context.last_direction = Some(direction);
        context.last_time_ms = Some(time_ms);
        context.last_counter = counter;

        Execution {
            id: self.encode(time_ms, counter),
            direction,
            size,
            price,
            time_ms,
            consecutive,
            source_tag: self.source.clone(),
        }
    }

    /// Classify an execution against `context` without assigning an id.
    ///
    /// For exchanges that supply their own ids but no consecutive flags.
    pub fn compute_consecutive(
        direction: Direction,
        time_ms: i64,
        context: &mut SequenceContext,
    ) -> Consecutive {
        let same_tick = context.last_time_ms == Some(time_ms);
        let consecutive = Self::consecutive_for(direction, same_tick, context.last_direction);

        context.last_direction = Some(direction);
        context.last_time_ms = Some(time_ms);
        consecutive
    }

    fn consecutive_for(
        direction: Direction,
        same_tick: bool,
        last_direction: Option<Direction>,
    ) -> Consecutive {
        if !same_tick || last_direction != Some(direction) {
            Consecutive::Different
        } else if direction == Direction::Buy {
            Consecutive::SameBuyer
        } else {
            Consecutive::SameSeller
        }
    }

    /// Reconstruct pseudo executions from one candle.
    ///
    /// Visits open, then the extremes that differ from open and close (low
    /// first on a rising bar, high first otherwise), then close. Volume is
    /// split evenly, with the rounding remainder on the last record. Every
    /// synthetic time stays inside `[time_ms, time_ms + span)`.
    #[must_use]
    pub fn create_executions(&self, candle: &Candle) -> Vec<Execution> {
        if candle.volume.is_zero() {
            return Vec::new();
        }

        let extremes = if candle.is_bullish() {
            [candle.low, candle.high]
        } else {
            [candle.high, candle.low]
        };

        let mut prices: Vec<Price> = Vec::with_capacity(4);
        prices.push(candle.open);
        for extreme in extremes {
            if extreme != candle.open && extreme != candle.close {
                prices.push(extreme);
            }
        }
        if candle.close != candle.open || prices.len() > 1 {
            prices.push(candle.close);
        }
        prices.dedup();

        let count = prices.len();
        let share = candle.volume / Decimal::from(count);
        let step = candle.span.millis() / count as i64;
        let opening = if candle.is_bullish() {
            Direction::Sell
        } else {
            Direction::Buy
        };

        let mut executions = Vec::with_capacity(count);
        let mut allotted = Decimal::ZERO;
        let mut previous: Option<Price> = None;

        for (i, price) in prices.into_iter().enumerate() {
            let size = if i + 1 == count {
                candle.volume - allotted
            } else {
                share
            };
            allotted += size;

            let direction = match previous {
                None => opening,
                Some(prev) if price > prev => Direction::Buy,
                Some(_) => Direction::Sell,
            };
            previous = Some(price);

            let time_ms = candle.time_ms + step * i as i64;
            executions.push(Execution {
                id: self.compute_id(time_ms),
                direction,
                size,
                price,
                time_ms,
                consecutive: Consecutive::Pseudo,
                source_tag: self.source.clone(),
            });
        }

        executions
    }
}
