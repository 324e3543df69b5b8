//! Shared test utilities available to both unit and integration tests.
//!
//! Enabled via `#[cfg(test)]` (unit tests) or the `testkit` feature
//! (integration tests).
//!
//! # Modules
//!
//! - [`transport`]: [`ScriptedConnector`](transport::ScriptedConnector), a
//!   channel-backed fake exchange controlled through a
//!   [`ServerHandle`](transport::ServerHandle).
//! - [`domain`]: Builders for candles and trades, plus in-memory history
//!   sources for backfill tests.
//! - [`config`]: Canonical test configurations (reconnection, exchanges).

pub mod config;
pub mod domain;
pub mod transport;
