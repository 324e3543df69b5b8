//! Canonical test configurations.
//!
//! Single source of truth for config structs used across tests.
//! Avoids each test module defining its own slightly-different defaults.

use std::time::Duration;

use serde_json::Value;

use crate::infrastructure::channel::{ChannelConfig, Topic};
use crate::infrastructure::config::exchange::ExchangeSettings;
use crate::infrastructure::config::reconnection::ReconnectionConfig;

/// Fast reconnection config with zero delays.
pub fn reconnection() -> ReconnectionConfig {
    ReconnectionConfig {
        initial_delay_ms: 0,
        max_delay_ms: 0,
        backoff_multiplier: 1.0,
        jitter_ratio: 0.0,
        max_consecutive_failures: 3,
        circuit_breaker_cooldown_ms: 0,
    }
}

/// Exchange settings pointing at a scripted endpoint.
pub fn exchange() -> ExchangeSettings {
    ExchangeSettings::new("wss://scripted.test/ws")
}

/// Channel routing by the `channel` field, with fast reconnects and a
/// 100ms acknowledgement timeout.
///
/// Acks look like `{"event": "subscribed", "channel": <key>}` (see
/// [`topic`]), data like `{"channel": <key>, "data": ...}`.
pub fn channel(exchange: &str) -> ChannelConfig {
    ChannelConfig::new(exchange, "wss://scripted.test/ws", |msg: &Value| {
        msg["channel"].as_str().map(str::to_owned)
    })
    .ack_timeout(Duration::from_millis(100))
    .max_ack_attempts(3)
    .reconnection(reconnection())
}

/// Topic whose ack is `{"event": "subscribed", "channel": key}`.
pub fn topic(key: &str) -> Topic {
    let ack_key = key.to_owned();
    let unsubscribe_key = key.to_owned();
    Topic::new(key, serde_json::json!({"op": "subscribe", "channel": key}))
        .expect("non-empty key")
        .ack_when(move |reply| reply["event"] == "subscribed" && reply["channel"] == ack_key.as_str())
        .unsubscribe_with(move |remote_id| {
            Some(serde_json::json!({
                "op": "unsubscribe",
                "channel": unsubscribe_key,
                "id": remote_id,
            }))
        })
}

/// Acknowledgement frame for [`topic`].
pub fn ack(key: &str) -> Value {
    serde_json::json!({"event": "subscribed", "channel": key})
}

/// Data frame for [`topic`].
pub fn data(key: &str, seq: u64) -> Value {
    serde_json::json!({"channel": key, "data": seq})
}
