//! Infrastructure layer.
//!
//! Provides the technical machinery around the domain: shared exchange
//! connections, request quotas, REST retries and execution log files.
//!
//! # Submodules
//!
//! - [`backfill`] - Gap filling from REST history
//! - [`channel`] - Multiplexed subscriptions over one transport
//! - [`config`] - Configuration loading and validation
//! - [`limiter`] - Fixed-window permit limiter
//! - [`log`] - Execution log codec and daily files
//! - [`registry`] - Per-exchange shared resources
//! - [`rest`] - Retrying, limiter-gated REST client

pub mod backfill;
pub mod channel;
pub mod config;
pub mod limiter;
pub mod log;
pub mod registry;
pub mod rest;
