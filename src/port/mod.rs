//! Trait definitions (hexagonal ports). Depend only on domain.
//!
//! Ports define the extension points the connectivity layer is built on.
//! Adapters implement them to reach real exchanges; the testkit implements
//! them with scripted fakes.
//!
//! # Architecture
//!
//! ```text
//!                    ┌─────────────────────────┐
//!                    │     Infrastructure      │
//!                    │ channel, limiter, log   │
//!     ┌──────────────┤  backfill, registry     ├──────────────┐
//!     │              └─────────────────────────┘              │
//!     ▼                                                       ▼
//! ┌───────────┐                                        ┌─────────────┐
//! │ WebSocket │                                        │ REST source │
//! │  Adapter  │                                        │  (external) │
//! └───────────┘                                        └─────────────┘
//! ```
//!
//! # Available Ports
//!
//! - [`Connector`], [`Transport`] - Physical duplex driven by a channel
//! - [`TradeSource`], [`CandleSource`] - Historical data for backfill

pub mod outbound;

pub use outbound::{CandleSource, Connector, RawTrade, TradeSource, Transport};
