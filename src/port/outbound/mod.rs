//! Outbound ports (driven side): interfaces implemented by outbound adapters.

pub mod source;
pub mod transport;

pub use source::{CandleSource, RawTrade, TradeSource};
pub use transport::{Connector, Transport};
