//! Multiplexed subscription channel.
//!
//! One [`Channel`] per exchange carries every [`Topic`] over a single
//! transport. A background driver task exclusively owns the transport and
//! the routing table; callers talk to it through commands, so all state
//! transitions on one channel are serialized.
//!
//! # Lifecycle
//!
//! - The transport is opened lazily when the first topic registers and
//!   closed when the last one is released.
//! - Each subscribe frame waits for its acknowledgement; unanswered frames
//!   are resent with a growing timeout up to `max_ack_attempts`, after which
//!   only that topic fails with [`ChannelError::Protocol`].
//! - On transport failure every topic returns to `Pending` and is resent
//!   after reconnecting with exponential backoff.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use futures_util::StreamExt;
//! use serde_json::json;
//! use tradeline::adapter::outbound::websocket::WebSocketConnector;
//! use tradeline::infrastructure::channel::{Channel, ChannelConfig, Topic};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ChannelConfig::new("bitflyer", "wss://ws.lightstream.bitflyer.com/json-rpc", |msg| {
//!     msg["params"]["channel"].as_str().map(str::to_owned)
//! })
//! .ignore_message_if(|msg| msg.get("id").is_some() && msg.get("result").is_none());
//!
//! let channel = Channel::new(config, Arc::new(WebSocketConnector::new()));
//! let topic = Topic::new(
//!     "lightning_executions_BTC_JPY",
//!     json!({"method": "subscribe", "params": {"channel": "lightning_executions_BTC_JPY"}}),
//! )?
//! .ack_when(|reply| reply["result"] == true);
//!
//! let mut executions = channel.subscribe(topic);
//! while let Some(message) = executions.next().await {
//!     println!("{}", message?);
//! }
//! # Ok(())
//! # }
//! ```

mod backoff;
mod driver;
mod subscription;
mod topic;


pub use subscription::Subscription;
pub use topic::Topic;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

use crate::error::ChannelError;
use crate::infrastructure::config::exchange::ExchangeSettings;
use crate::infrastructure::config::reconnection::ReconnectionConfig;
use crate::infrastructure::limiter::PermitLimiter;
use crate::port::Connector;
use driver::{Command, Driver};

type Extractor = Arc<dyn Fn(&Value) -> Option<String> + Send + Sync>;
type Predicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;
type Responder = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

/// Connection state of a channel's transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Closed,
    Connecting,
    Open,
    Closing,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Closed => "closed",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
        };
        f.write_str(label)
    }
}

/// Subscription state of one topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicState {
    /// Subscribe frame sent (or deferred); awaiting acknowledgement.
    Pending,
    /// Acknowledged; messages are routed to subscribers.
    Active,
    /// Unsubscribe frame sent; trailing messages are dropped.
    Unsubscribing,
}

/// Per-exchange channel behaviour.
///
/// Only `extract_id` is required; every other hook defaults to off.
#[derive(Clone)]
pub struct ChannelConfig {
    exchange: String,
    address: String,
    extract_id: Extractor,
    update_id: Option<Extractor>,
    ignore_message_if: Option<Predicate>,
    pong_if: Option<Responder>,
    stop_reconnect_if: Option<Predicate>,
    limiter: Option<Arc<PermitLimiter>>,
    no_server_reply: bool,
    ack_timeout: Duration,
    max_ack_attempts: u32,
    reconnection: ReconnectionConfig,
}

impl ChannelConfig {
    /// Channel for `exchange` at `address`, routing messages by `extract_id`.
    pub fn new<F>(exchange: impl Into<String>, address: impl Into<String>, extract_id: F) -> Self
    where
        F: Fn(&Value) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            exchange: exchange.into(),
            address: address.into(),
            extract_id: Arc::new(extract_id),
            update_id: None,
            ignore_message_if: None,
            pong_if: None,
            stop_reconnect_if: None,
            limiter: None,
            no_server_reply: false,
            ack_timeout: Duration::from_secs(10),
            max_ack_attempts: 3,
            reconnection: ReconnectionConfig::default(),
        }
    }

    /// Channel configured from the `[exchanges.<name>]` section.
    pub fn from_settings<F>(exchange: impl Into<String>, settings: &ExchangeSettings, extract_id: F) -> Self
    where
        F: Fn(&Value) -> Option<String> + Send + Sync + 'static,
    {
        let config = Self::new(exchange, settings.address.clone(), extract_id)
            .ack_timeout(Duration::from_millis(settings.ack_timeout_ms))
            .max_ack_attempts(settings.max_ack_attempts);
        if settings.no_server_reply {
            config.no_server_reply()
        } else {
            config
        }
    }

    /// Capture the server-assigned subscription id from an acknowledgement.
    #[must_use]
    pub fn update_id<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> Option<String> + Send + Sync + 'static,
    {
        self.update_id = Some(Arc::new(f));
        self
    }

    /// Drop heartbeat and info frames before routing.
    #[must_use]
    pub fn ignore_message_if<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.ignore_message_if = Some(Arc::new(f));
        self
    }

    /// Answer application-level pings with the returned frame.
    #[must_use]
    pub fn pong_if<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    {
        self.pong_if = Some(Arc::new(f));
        self
    }

    /// Treat matching frames as fatal for the topic they concern.
    #[must_use]
    pub fn stop_reconnect_if<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.stop_reconnect_if = Some(Arc::new(f));
        self
    }

    /// Gate every subscribe frame behind `limiter`.
    #[must_use]
    pub fn restrict(mut self, limiter: Arc<PermitLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// The exchange never acknowledges; topics become active on send.
    #[must_use]
    pub fn no_server_reply(mut self) -> Self {
        self.no_server_reply = true;
        self
    }

    #[must_use]
    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    #[must_use]
    pub fn max_ack_attempts(mut self, attempts: u32) -> Self {
        self.max_ack_attempts = attempts.max(1);
        self
    }

    #[must_use]
    pub fn reconnection(mut self, reconnection: ReconnectionConfig) -> Self {
        self.reconnection = reconnection;
        self
    }

    #[must_use]
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }
}

impl fmt::Debug for ChannelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelConfig")
            .field("exchange", &self.exchange)
            .field("address", &self.address)
            .field("no_server_reply", &self.no_server_reply)
            .field("ack_timeout", &self.ack_timeout)
            .field("max_ack_attempts", &self.max_ack_attempts)
            .field("restricted", &self.limiter.is_some())
            .finish_non_exhaustive()
    }
}

/// Handle to one exchange's shared connection.
///
/// Cheap to share behind an `Arc`; dropping the last handle and every
/// [`Subscription`] stops the driver task.
#[derive(Debug)]
pub struct Channel {
    exchange: String,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ChannelState>,
    next_subscriber: AtomicU64,
}

impl Channel {
    /// Spawn the driver task. Must be called inside a Tokio runtime.
    pub fn new(config: ChannelConfig, connector: Arc<dyn Connector>) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ChannelState::Closed);
        let exchange = config.exchange.clone();

        tokio::spawn(Driver::new(config, connector, receiver, state_tx).run());

        Self {
            exchange,
            commands,
            state,
            next_subscriber: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Subscribe to `topic`.
    ///
    /// Subscribing a key that is already registered joins the existing
    /// subscription: no new frame is sent and both streams see the same
    /// messages.
    pub fn subscribe(&self, topic: Topic) -> Subscription {
        let key = topic.key().to_owned();
        let subscriber = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let (sink, receiver) = mpsc::unbounded_channel();

        let command = Command::Subscribe {
            topic,
            subscriber,
            sink,
        };
        if let Err(mpsc::error::SendError(command)) = self.commands.send(command) {
            debug!(exchange = %self.exchange, key = %key, "Subscribe on stopped channel");
            if let Command::Subscribe { sink, .. } = command {
                let _ = sink.send(Err(ChannelError::Closed));
            }
        }

        Subscription::new(key, subscriber, receiver, self.commands.clone())
    }

    /// Current transport state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Receiver notified on every transport state change.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.state.clone()
    }

    /// State of the topic registered under `key`, if any.
    pub async fn topic_state(&self, key: &str) -> Option<TopicState> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::TopicState {
                key: key.to_owned(),
                reply,
            })
            .ok()?;
        response.await.ok().flatten()
    }

    /// Close the transport and end every subscription with
    /// [`ChannelError::Closed`].
    pub async fn shutdown(&self) {
        let (done, finished) = oneshot::channel();
        if self.commands.send(Command::Shutdown { done }).is_ok() {
            let _ = finished.await;
        }
    }
}
