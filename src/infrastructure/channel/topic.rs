//! Logical subscriptions carried by a channel.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::ChannelError;

type AckPredicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;
type UnsubscribeBuilder = Arc<dyn Fn(Option<&str>) -> Option<Value> + Send + Sync>;

/// One logical subscription, identified by its local key.
///
/// Exchanges differ only in the frames they expect, so a topic is plain data
/// plus two functions: how to recognise the server's acknowledgement and how
/// to build the unsubscribe frame once the server-assigned id is known.
///
/// ```
/// use serde_json::json;
/// use tradeline::infrastructure::channel::Topic;
///
/// let topic = Topic::new("lightning_executions_BTC_JPY", json!({
///     "method": "subscribe",
///     "params": { "channel": "lightning_executions_BTC_JPY" },
/// }))
/// .unwrap()
/// .ack_when(|reply| reply["result"] == true)
/// .unsubscribe_with(|_| Some(json!({
///     "method": "unsubscribe",
///     "params": { "channel": "lightning_executions_BTC_JPY" },
/// })));
///
/// assert_eq!(topic.key(), "lightning_executions_BTC_JPY");
/// ```
#[derive(Clone)]
pub struct Topic {
    key: String,
    subscribe: Value,
    verify_ack: AckPredicate,
    build_unsubscribe: UnsubscribeBuilder,
}

impl Topic {
    /// Create a topic that never matches an acknowledgement and sends no
    /// unsubscribe frame. Refine it with [`ack_when`](Self::ack_when) and
    /// [`unsubscribe_with`](Self::unsubscribe_with).
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::InvalidTopic`] for an empty key.
    pub fn new(key: impl Into<String>, subscribe: Value) -> Result<Self, ChannelError> {
        let key = key.into();
        if key.is_empty() {
            return Err(ChannelError::InvalidTopic("empty key".into()));
        }

        Ok(Self {
            key,
            subscribe,
            verify_ack: Arc::new(|_| false),
            build_unsubscribe: Arc::new(|_| None),
        })
    }

    /// Recognise this topic's acknowledgement among inbound frames.
    #[must_use]
    pub fn ack_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.verify_ack = Arc::new(predicate);
        self
    }

    /// Build the unsubscribe frame from the remote id captured at ack time.
    #[must_use]
    pub fn unsubscribe_with<F>(mut self, builder: F) -> Self
    where
        F: Fn(Option<&str>) -> Option<Value> + Send + Sync + 'static,
    {
        self.build_unsubscribe = Arc::new(builder);
        self
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub const fn subscribe_message(&self) -> &Value {
        &self.subscribe
    }

    #[must_use]
    pub fn verify_ack(&self, reply: &Value) -> bool {
        (self.verify_ack)(reply)
    }

    #[must_use]
    pub fn build_unsubscribe(&self, remote_id: Option<&str>) -> Option<Value> {
        (self.build_unsubscribe)(remote_id)
    }
}

impl fmt::Debug for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Topic")
            .field("key", &self.key)
            .field("subscribe", &self.subscribe)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_key_is_rejected() {
        let err = Topic::new("", json!({})).unwrap_err();
        assert!(matches!(err, ChannelError::InvalidTopic(_)));
    }

    #[test]
    fn defaults_never_ack_and_never_unsubscribe() {
        let topic = Topic::new("trades", json!({"op": "sub"})).unwrap();
        assert!(!topic.verify_ack(&json!({"op": "sub"})));
        assert!(topic.build_unsubscribe(Some("7")).is_none());
    }

    #[test]
    fn unsubscribe_receives_remote_id() {
        let topic = Topic::new("trades", json!({"op": "sub"}))
            .unwrap()
            .unsubscribe_with(|remote| Some(json!({"op": "unsub", "id": remote})));

        assert_eq!(
            topic.build_unsubscribe(Some("42")),
            Some(json!({"op": "unsub", "id": "42"}))
        );
    }
}
