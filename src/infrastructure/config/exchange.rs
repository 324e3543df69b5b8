//! Per-exchange connectivity settings.

use serde::Deserialize;

use crate::domain::DEFAULT_PADDING;

/// Settings for one exchange, keyed by exchange name in `[exchanges.<name>]`.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeSettings {
    /// WebSocket endpoint shared by every topic on this exchange.
    pub address: String,
    /// Synthetic id padding (power of ten above the peak trades per millisecond).
    #[serde(default = "default_padding")]
    pub padding: u64,
    /// How long a subscribe frame waits for its acknowledgement.
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    /// Subscribe attempts before the topic fails with a protocol error.
    #[serde(default = "default_max_ack_attempts")]
    pub max_ack_attempts: u32,
    /// The exchange never acknowledges subscriptions.
    #[serde(default)]
    pub no_server_reply: bool,
    /// Outbound request quota.
    #[serde(default)]
    pub limit: Option<LimitSettings>,
}

/// Permit bucket settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitSettings {
    /// Permits granted per window.
    pub permits: u32,
    /// Window length in milliseconds.
    pub refresh_ms: u64,
    /// Keep the bucket across restarts.
    #[serde(default)]
    pub persist: bool,
}

const fn default_padding() -> u64 {
    DEFAULT_PADDING
}

const fn default_ack_timeout_ms() -> u64 {
    10_000
}

const fn default_max_ack_attempts() -> u32 {
    3
}

impl ExchangeSettings {
    /// Settings for `address` with every other field at its default.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            padding: default_padding(),
            ack_timeout_ms: default_ack_timeout_ms(),
            max_ack_attempts: default_max_ack_attempts(),
            no_server_reply: false,
            limit: None,
        }
    }
}
