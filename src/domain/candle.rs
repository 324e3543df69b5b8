//! OHLCV candles used when an exchange offers no trade-level history.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::DomainError;
use super::money::{Price, Size};

/// Candle duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Span {
    #[serde(rename = "1m")]
    Minute1,
    #[serde(rename = "5m")]
    Minute5,
    #[serde(rename = "15m")]
    Minute15,
    #[serde(rename = "30m")]
    Minute30,
    #[serde(rename = "1h")]
    Hour1,
    #[serde(rename = "4h")]
    Hour4,
    #[serde(rename = "1d")]
    Day1,
}

impl Span {
    /// Duration of one candle in milliseconds.
    #[must_use]
    pub const fn millis(self) -> i64 {
        match self {
            Self::Minute1 => 60_000,
            Self::Minute5 => 300_000,
            Self::Minute15 => 900_000,
            Self::Minute30 => 1_800_000,
            Self::Hour1 => 3_600_000,
            Self::Hour4 => 14_400_000,
            Self::Day1 => 86_400_000,
        }
    }

    /// Short label as used by most exchange APIs.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Minute1 => "1m",
            Self::Minute5 => "5m",
            Self::Minute15 => "15m",
            Self::Minute30 => "30m",
            Self::Hour1 => "1h",
            Self::Hour4 => "4h",
            Self::Day1 => "1d",
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Span {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Self::Minute1),
            "5m" => Ok(Self::Minute5),
            "15m" => Ok(Self::Minute15),
            "30m" => Ok(Self::Minute30),
            "1h" => Ok(Self::Hour1),
            "4h" => Ok(Self::Hour4),
            "1d" => Ok(Self::Day1),
            other => Err(DomainError::InvalidCandle {
                reason: format!("unknown span '{other}'"),
            }),
        }
    }
}

/// One OHLCV bar starting at `time_ms` and lasting `span`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub volume: Size,
    /// Bucket start in epoch milliseconds.
    pub time_ms: i64,
    pub span: Span,
}

impl Candle {
    /// Create a candle, rejecting bars whose extremes do not bound open and close.
    pub fn try_new(
        open: Price,
        high: Price,
        low: Price,
        close: Price,
        volume: Size,
        time_ms: i64,
        span: Span,
    ) -> Result<Self, DomainError> {
        if low > high {
            return Err(DomainError::InvalidCandle {
                reason: format!("low {low} above high {high}"),
            });
        }
        if open > high || open < low || close > high || close < low {
            return Err(DomainError::InvalidCandle {
                reason: format!("open {open} / close {close} outside [{low}, {high}]"),
            });
        }
        if volume.is_sign_negative() {
            return Err(DomainError::InvalidCandle {
                reason: format!("negative volume {volume}"),
            });
        }

        Ok(Self {
            open,
            high,
            low,
            close,
            volume,
            time_ms,
            span,
        })
    }

    /// Exclusive end of this candle's bucket.
    #[must_use]
    pub const fn end_ms(&self) -> i64 {
        self.time_ms + self.span.millis()
    }

    /// True when the bar closed above its open.
    #[must_use]
    pub fn is_bullish(&self) -> bool {
        self.open < self.close
    }
}
