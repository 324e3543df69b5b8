//! Execution records shared by every exchange connector.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::error::DomainError;
use super::money::{Price, Size};

/// Aggressor side of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// The taker bought.
    Buy,
    /// The taker sold.
    Sell,
}

impl Direction {
    /// Single character mark used in persisted logs.
    #[must_use]
    pub const fn mark(self) -> &'static str {
        match self {
            Self::Buy => "+",
            Self::Sell => "-",
        }
    }

    /// Parse a persisted mark back into a direction.
    pub fn from_mark(mark: &str) -> Result<Self, DomainError> {
        match mark {
            "+" => Ok(Self::Buy),
            "-" => Ok(Self::Sell),
            other => Err(DomainError::UnknownMark(other.to_string())),
        }
    }

    /// The opposite side.
    #[must_use]
    pub const fn inverse(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

impl FromStr for Direction {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("buy") || s.eq_ignore_ascii_case("b") {
            Ok(Self::Buy)
        } else if s.eq_ignore_ascii_case("sell") || s.eq_ignore_ascii_case("s") {
            Ok(Self::Sell)
        } else {
            Self::from_mark(s)
        }
    }
}

/// Relation between an execution and the one before it in the same stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Consecutive {
    /// Side or timestamp changed since the previous execution.
    #[default]
    Different,
    /// Same millisecond, same buying taker.
    SameBuyer,
    /// Same millisecond, same selling taker.
    SameSeller,
    /// Synthesized from a candle rather than observed.
    Pseudo,
}

/// A single trade execution with a comparable id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Execution {
    /// Monotonic id within one exchange.
    pub id: u64,
    /// Aggressor side.
    pub direction: Direction,
    /// Executed size.
    pub size: Size,
    /// Executed price.
    pub price: Price,
    /// Epoch milliseconds.
    pub time_ms: i64,
    /// Relation to the previous execution.
    pub consecutive: Consecutive,
    /// Exchange (or connector) that produced this record.
    pub source_tag: String,
}

impl Execution {
    /// Execution time as a UTC date-time.
    #[must_use]
    pub fn date_time(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.time_ms)
            .single()
            .unwrap_or_default()
    }

    /// True when the taker bought.
    #[must_use]
    pub fn is_buy(&self) -> bool {
        self.direction == Direction::Buy
    }
}

impl fmt::Display for Execution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}@{} [{}]",
            self.id,
            self.date_time().format("%Y-%m-%dT%H:%M:%S%.3f"),
            self.direction,
            self.size,
            self.price,
            self.source_tag
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn marks_round_trip() {
        for direction in [Direction::Buy, Direction::Sell] {
            assert_eq!(Direction::from_mark(direction.mark()).unwrap(), direction);
        }
        assert!(Direction::from_mark("x").is_err());
    }

    #[test]
    fn direction_parses_exchange_spellings() {
        assert_eq!("BUY".parse::<Direction>().unwrap(), Direction::Buy);
        assert_eq!("sell".parse::<Direction>().unwrap(), Direction::Sell);
        assert_eq!("-".parse::<Direction>().unwrap(), Direction::Sell);
        assert!("hold".parse::<Direction>().is_err());
    }

    #[test]
    fn inverse_flips_side() {
        assert_eq!(Direction::Buy.inverse(), Direction::Sell);
        assert_eq!(Direction::Sell.inverse(), Direction::Buy);
    }

    #[test]
    fn date_time_reflects_epoch_millis() {
        let execution = Execution {
            id: 1,
            direction: Direction::Buy,
            size: dec!(1),
            price: dec!(100),
            time_ms: 1_700_000_000_123,
            consecutive: Consecutive::Different,
            source_tag: "test".into(),
        };

        assert_eq!(execution.date_time().timestamp_millis(), 1_700_000_000_123);
        assert!(execution.is_buy());
    }
}
