//! Tradeline - exchange connectivity consistency layer.
//!
//! Gives every exchange connector the same guarantees regardless of how the
//! exchange behaves on the wire: one shared connection carrying many topics,
//! one shared request quota, comparable execution ids and a compact on-disk
//! execution log.
//!
//! # Architecture
//!
//! - **`domain`** - Executions, candles and the synthetic id [`domain::Sequencer`]
//! - **`port`** - Transport and history-source traits
//! - **`infrastructure`** - Subscription channel, permit limiter, log codec,
//!   REST retries, backfill and the per-exchange registry
//! - **`adapter`** - WebSocket transport and the `tradeline` CLI
//!
//! # Modules
//!
//! - [`adapter`] - Port implementations and the command line
//! - [`domain`] - Exchange-agnostic types and id arithmetic
//! - [`error`] - Error types for the crate
//! - [`infrastructure`] - Connectivity machinery and configuration
//! - [`port`] - Extension points implemented by adapters
//!
//! # Features
//!
//! - `testkit` - Scripted transport and canned configs for tests
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tradeline::adapter::outbound::websocket::WebSocketConnector;
//! use tradeline::infrastructure::config::settings::Config;
//! use tradeline::infrastructure::registry::ExchangeRegistry;
//!
//! # async fn demo() -> tradeline::error::Result<()> {
//! let config = Config::load("config.toml")?;
//! let registry = ExchangeRegistry::new(config, Arc::new(WebSocketConnector::new()))?;
//! let channel = registry.channel("bitflyer", |msg| {
//!     msg["params"]["channel"].as_str().map(str::to_owned)
//! })?;
//! # let _ = channel;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod port;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;
