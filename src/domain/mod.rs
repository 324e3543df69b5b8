//! Exchange-agnostic domain logic.
//!
//! Pure types and functions with no I/O: execution records, candles and the
//! synthetic id [`Sequencer`].

pub mod candle;
pub mod error;
pub mod execution;
pub mod money;
pub mod sequence;

pub use candle::{Candle, Span};
pub use execution::{Consecutive, Direction, Execution};
pub use money::{Price, Size};
pub use sequence::{SequenceContext, Sequencer, DEFAULT_PADDING};
