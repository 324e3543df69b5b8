//! Domain validation errors.
//!
//! Returned by constructors and parsers that enforce domain invariants.
//!
//! ```
//! use tradeline::domain::error::DomainError;
//! use tradeline::domain::Sequencer;
//!
//! let result = Sequencer::new("bitflyer", 0);
//! assert!(matches!(result, Err(DomainError::InvalidPadding(0))));
//! ```

use thiserror::Error;

/// Errors that occur when domain invariants are violated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Synthetic id padding must be positive.
    #[error("padding must be positive, got {0}")]
    InvalidPadding(u64),

    /// Synthetic ids with this padding overflow before the id horizon.
    #[error("padding {padding} exceeds the maximum of {max}")]
    PaddingTooLarge {
        /// Requested padding.
        padding: u64,
        /// Largest accepted padding.
        max: u64,
    },

    /// A persisted side mark was not recognised.
    #[error("unknown direction mark '{0}'")]
    UnknownMark(String),

    /// Candle prices are inconsistent with each other.
    #[error("invalid candle: {reason}")]
    InvalidCandle {
        /// What was wrong with the candle.
        reason: String,
    },
}
