//! Monetary types for price and size representation.

use rust_decimal::Decimal;

/// Price represented as a Decimal for precision.
pub type Price = Decimal;

/// Executed size represented as a Decimal for precision.
pub type Size = Decimal;
