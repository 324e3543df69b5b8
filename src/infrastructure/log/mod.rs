//! Persisted execution logs.
//!
//! - [`codec`] - Row encoding: raw rows and delta rows against the previous record
//! - [`file`] - Daily `*.log` / `*.clog` files, conversion between them

pub mod codec;
pub mod file;

pub use codec::{DeltaDecoder, DeltaEncoder, LogRecord};
pub use file::{compact, expand, read_log, write_log, ExecutionLogWriter, LogFormat};
