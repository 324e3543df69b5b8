//! REST plumbing shared by exchange connectors.

pub mod client;
pub mod retry;

pub use client::RestClient;
pub use retry::{classify, Delay, ErrorClass, RetryPolicy};
