//! Single-writer task owning a channel's transport and routing table.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, trace, warn};

use super::backoff::Backoff;
use super::{ChannelConfig, ChannelState, Topic, TopicState};
use crate::error::{ChannelError, Result};
use crate::infrastructure::limiter::PermitLimiter;
use crate::port::{Connector, Transport};

type Sink = mpsc::UnboundedSender<std::result::Result<Value, ChannelError>>;

/// Requests from channel handles and subscriptions.
#[derive(Debug)]
pub(crate) enum Command {
    Subscribe {
        topic: Topic,
        subscriber: u64,
        sink: Sink,
    },
    Release {
        key: String,
        subscriber: u64,
    },
    TopicState {
        key: String,
        reply: oneshot::Sender<Option<TopicState>>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// A subscribe frame waiting for (or holding) a limiter permit.
#[derive(Debug)]
struct PermitRequest {
    key: String,
    ticket: u64,
}

/// Where a restricted entry stands with the limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Permit {
    None,
    Waiting(u64),
    /// Granted while disconnected; spent by the next subscribe frame.
    Held,
}

/// Routing entry for one local key.
struct Entry {
    topic: Topic,
    state: TopicState,
    remote_id: Option<String>,
    subscribers: Vec<(u64, Sink)>,
    /// Subscribe frames sent since the last (re)connect.
    attempts: u32,
    /// Ack deadline while pending, removal deadline while unsubscribing.
    deadline: Option<Instant>,
    permit: Permit,
}

impl Entry {
    fn new(topic: Topic, subscriber: u64, sink: Sink) -> Self {
        Self {
            topic,
            state: TopicState::Pending,
            remote_id: None,
            subscribers: vec![(subscriber, sink)],
            attempts: 0,
            deadline: None,
            permit: Permit::None,
        }
    }

    const fn is_live(&self) -> bool {
        !matches!(self.state, TopicState::Unsubscribing)
    }

    fn deliver(&mut self, message: &Value) {
        self.subscribers
            .retain(|(_, sink)| sink.send(Ok(message.clone())).is_ok());
    }

    /// Pass a non-terminal error to every subscriber.
    fn notify(&mut self, err: &ChannelError) {
        self.subscribers
            .retain(|(_, sink)| sink.send(Err(err.clone())).is_ok());
    }

    fn fail(self, err: &ChannelError) {
        for (_, sink) in self.subscribers {
            let _ = sink.send(Err(err.clone()));
        }
    }
}

pub(super) struct Driver {
    config: ChannelConfig,
    connector: Arc<dyn Connector>,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ChannelState>,
    transport: Option<Box<dyn Transport>>,
    topics: HashMap<String, Entry>,
    /// Server-assigned id to local key.
    remote_ids: HashMap<String, String>,
    backoff: Backoff,
    reconnect_at: Option<Instant>,
    /// Requests to the permit worker of a restricted channel.
    permit_requests: Option<mpsc::UnboundedSender<PermitRequest>>,
    permit_grants: Option<mpsc::UnboundedReceiver<PermitRequest>>,
    permit_worker: Option<JoinHandle<()>>,
    next_ticket: u64,
}

impl Driver {
    pub(super) fn new(
        config: ChannelConfig,
        connector: Arc<dyn Connector>,
        commands: mpsc::UnboundedReceiver<Command>,
        state: watch::Sender<ChannelState>,
    ) -> Self {
        let backoff = Backoff::new(config.reconnection.clone());
        Self {
            config,
            connector,
            commands,
            state,
            transport: None,
            topics: HashMap::new(),
            remote_ids: HashMap::new(),
            backoff,
            reconnect_at: None,
            permit_requests: None,
            permit_grants: None,
            permit_worker: None,
            next_ticket: 0,
        }
    }

    pub(super) async fn run(mut self) {
        debug!(exchange = %self.config.exchange, "Channel driver started");
        if let Some(limiter) = self.config.limiter.clone() {
            self.start_permit_worker(limiter);
        }

        loop {
            if self.wants_connection() && self.reconnect_due() {
                self.connect().await;
                continue;
            }

            let ack_deadline = self.next_deadline();
            let reconnect_at = if self.wants_connection() {
                self.reconnect_at
            } else {
                None
            };

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if !self.handle(command).await {
                            break;
                        }
                    }
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                frame = next_frame(&mut self.transport) => self.on_frame(frame).await,
                () = sleep_until_opt(ack_deadline) => self.on_deadline().await,
                () = sleep_until_opt(reconnect_at) => {}
                grant = next_grant(&mut self.permit_grants) => self.on_permit(grant).await,
            }
        }

        if let Some(worker) = self.permit_worker.take() {
            worker.abort();
        }
        debug!(exchange = %self.config.exchange, "Channel driver stopped");
    }

    /// Acquire permits in request order on a separate task, so the driver
    /// keeps reading frames while a subscribe waits for quota.
    fn start_permit_worker(&mut self, limiter: Arc<PermitLimiter>) {
        let (request_tx, mut requests) = mpsc::unbounded_channel::<PermitRequest>();
        let (grant_tx, grants) = mpsc::unbounded_channel();

        let worker = tokio::spawn(async move {
            while let Some(request) = requests.recv().await {
                limiter.acquire().await;
                if grant_tx.send(request).is_err() {
                    break;
                }
            }
        });

        self.permit_requests = Some(request_tx);
        self.permit_grants = Some(grants);
        self.permit_worker = Some(worker);
    }

    fn set_state(&self, state: ChannelState) {
        self.state.send_replace(state);
    }

    fn has_live_topics(&self) -> bool {
        self.topics.values().any(Entry::is_live)
    }

    fn wants_connection(&self) -> bool {
        self.transport.is_none() && self.has_live_topics()
    }

    fn reconnect_due(&self) -> bool {
        self.reconnect_at.map_or(true, |at| Instant::now() >= at)
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.topics.values().filter_map(|entry| entry.deadline).min()
    }

    /// Apply one command; returns `false` once the driver should stop.
    async fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Subscribe {
                topic,
                subscriber,
                sink,
            } => self.on_subscribe(topic, subscriber, sink).await,
            Command::Release { key, subscriber } => self.on_release(&key, subscriber).await,
            Command::TopicState { key, reply } => {
                let _ = reply.send(self.topics.get(&key).map(|entry| entry.state));
            }
            Command::Shutdown { done } => {
                self.shutdown().await;
                let _ = done.send(());
                return false;
            }
        }
        true
    }

    async fn on_subscribe(&mut self, topic: Topic, subscriber: u64, sink: Sink) {
        let key = topic.key().to_owned();

        let mut permit = Permit::None;
        if let Some(entry) = self.topics.get_mut(&key) {
            if entry.is_live() {
                debug!(exchange = %self.config.exchange, key = %key, "Joined existing subscription");
                entry.subscribers.push((subscriber, sink));
                return;
            }
            if let Some(remote_id) = entry.remote_id.take() {
                self.remote_ids.remove(&remote_id);
            }
            permit = entry.permit;
        }

        let mut entry = Entry::new(topic, subscriber, sink);
        entry.permit = permit;
        self.topics.insert(key.clone(), entry);
        info!(exchange = %self.config.exchange, key = %key, "Subscribing");

        if self.transport.is_some() {
            self.send_subscribe(&key).await;
        }
    }

    async fn on_release(&mut self, key: &str, subscriber: u64) {
        let Some(entry) = self.topics.get_mut(key) else {
            return;
        };
        entry.subscribers.retain(|(id, _)| *id != subscriber);
        if !entry.subscribers.is_empty() || !entry.is_live() {
            return;
        }

        let frame = entry.topic.build_unsubscribe(entry.remote_id.as_deref());
        info!(exchange = %self.config.exchange, key = %key, "Unsubscribing");

        match frame {
            Some(frame) if self.transport.is_some() => {
                entry.state = TopicState::Unsubscribing;
                entry.deadline = Some(Instant::now() + self.config.ack_timeout);
                self.send_frame(&frame).await;
            }
            _ => {
                self.remove(key);
            }
        }

        if !self.has_live_topics() {
            self.close("No subscriptions").await;
        }
    }

    /// Send the subscribe frame for `key`, rate limited when restricted.
    ///
    /// A restricted channel queues the frame behind the permit worker and
    /// writes it from [`Self::on_permit`].
    async fn send_subscribe(&mut self, key: &str) {
        if self.transport.is_none() {
            return;
        }
        let Some(requests) = self.permit_requests.as_ref() else {
            self.write_subscribe(key).await;
            return;
        };
        let Some(entry) = self.topics.get_mut(key) else {
            return;
        };

        match entry.permit {
            Permit::Held => {
                entry.permit = Permit::None;
                self.write_subscribe(key).await;
            }
            Permit::Waiting(_) => {}
            Permit::None => {
                let ticket = self.next_ticket;
                self.next_ticket += 1;
                entry.deadline = None;
                let request = PermitRequest {
                    key: key.to_owned(),
                    ticket,
                };
                if requests.send(request).is_ok() {
                    entry.permit = Permit::Waiting(ticket);
                    trace!(exchange = %self.config.exchange, key = %key, "Waiting for subscribe permit");
                } else {
                    warn!(exchange = %self.config.exchange, key = %key, "Permit worker stopped");
                }
            }
        }
    }

    async fn on_permit(&mut self, grant: PermitRequest) {
        let connected = self.transport.is_some();
        let Some(entry) = self.topics.get_mut(&grant.key) else {
            return;
        };
        if entry.permit != Permit::Waiting(grant.ticket) {
            return;
        }
        if !entry.is_live() {
            entry.permit = Permit::None;
            return;
        }
        if !connected {
            entry.permit = Permit::Held;
            return;
        }

        entry.permit = Permit::None;
        self.write_subscribe(&grant.key).await;
    }

    async fn write_subscribe(&mut self, key: &str) {
        let Some(frame) = self
            .topics
            .get(key)
            .map(|entry| entry.topic.subscribe_message().clone())
        else {
            return;
        };
        if !self.send_frame(&frame).await {
            return;
        }

        let no_server_reply = self.config.no_server_reply;
        let ack_timeout = self.config.ack_timeout;
        if let Some(entry) = self.topics.get_mut(key) {
            entry.attempts += 1;
            if no_server_reply {
                entry.state = TopicState::Active;
                entry.deadline = None;
                info!(exchange = %self.config.exchange, key = %key, "Subscribed without acknowledgement");
            } else {
                entry.state = TopicState::Pending;
                entry.deadline = Some(Instant::now() + ack_timeout * entry.attempts);
            }
        }
    }

    /// Write one frame; a failed write tears the transport down.
    async fn send_frame(&mut self, frame: &Value) -> bool {
        let Some(transport) = self.transport.as_mut() else {
            return false;
        };

        trace!(exchange = %self.config.exchange, frame = %frame, "Sending frame");
        match transport.send(frame.to_string()).await {
            Ok(()) => true,
            Err(e) => {
                self.on_transport_failure(&e.to_string()).await;
                false
            }
        }
    }

    async fn connect(&mut self) {
        if !self.backoff.circuit_allows_connection() {
            self.reconnect_at = self.backoff.open_until();
            return;
        }

        self.set_state(ChannelState::Connecting);
        info!(
            exchange = %self.config.exchange,
            address = %self.config.address,
            attempt = self.backoff.failures() + 1,
            "Connecting"
        );

        match self.connector.connect(&self.config.address).await {
            Ok(transport) => {
                self.transport = Some(transport);
                self.reconnect_at = None;
                self.set_state(ChannelState::Open);
                info!(exchange = %self.config.exchange, "Connected");
                self.resubscribe_all().await;
            }
            Err(e) => {
                let at = self.schedule_reconnect(&e.to_string());
                warn!(
                    exchange = %self.config.exchange,
                    error = %e,
                    retry_in_ms = at.saturating_duration_since(Instant::now()).as_millis() as u64,
                    "Connection failed, will retry"
                );
            }
        }
    }

    async fn resubscribe_all(&mut self) {
        let mut keys: Vec<String> = self
            .topics
            .iter()
            .filter(|(_, entry)| entry.is_live())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();

        if !keys.is_empty() {
            debug!(exchange = %self.config.exchange, topics = keys.len(), "Sending subscriptions");
        }
        for key in keys {
            if self.transport.is_none() {
                break;
            }
            self.send_subscribe(&key).await;
        }
    }

    async fn on_transport_failure(&mut self, reason: &str) {
        warn!(exchange = %self.config.exchange, reason = %reason, "Connection lost");

        if let Some(mut transport) = self.transport.take() {
            let _ = transport.close().await;
        }

        self.topics.retain(|_, entry| entry.is_live());
        self.remote_ids.clear();
        for entry in self.topics.values_mut() {
            entry.state = TopicState::Pending;
            entry.remote_id = None;
            entry.attempts = 0;
            entry.deadline = None;
        }

        if self.topics.is_empty() {
            self.set_state(ChannelState::Closed);
            self.reconnect_at = None;
            return;
        }

        self.set_state(ChannelState::Connecting);
        let at = self.schedule_reconnect(reason);
        info!(
            exchange = %self.config.exchange,
            topics = self.topics.len(),
            delay_ms = at.saturating_duration_since(Instant::now()).as_millis() as u64,
            "Reconnecting after delay"
        );
    }

    /// Count a failure and arm the reconnect timer.
    ///
    /// Tripping the circuit breaker tells every subscriber the transport is
    /// down; their streams stay open and resume after the cooldown.
    fn schedule_reconnect(&mut self, reason: &str) -> Instant {
        let retry = self.backoff.schedule_retry();
        self.reconnect_at = Some(retry.at);

        if retry.tripped {
            let err = ChannelError::Transport {
                address: self.config.address.clone(),
                reason: reason.to_owned(),
            };
            for entry in self.topics.values_mut().filter(|entry| entry.is_live()) {
                entry.notify(&err);
            }
        }
        retry.at
    }

    async fn on_frame(&mut self, frame: Option<Result<String>>) {
        match frame {
            None => self.on_transport_failure("closed by server").await,
            Some(Err(e)) => self.on_transport_failure(&e.to_string()).await,
            Some(Ok(text)) => {
                if self.backoff.failures() > 0 {
                    debug!(exchange = %self.config.exchange, "Received frame after reconnection, resetting backoff");
                    self.backoff.reset();
                }
                self.dispatch(&text).await;
            }
        }
    }

    async fn dispatch(&mut self, text: &str) {
        let message: Value = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    exchange = %self.config.exchange,
                    error = %e,
                    bytes = text.len(),
                    "Failed to parse message"
                );
                return;
            }
        };

        if self
            .config
            .ignore_message_if
            .as_ref()
            .is_some_and(|ignore| ignore(&message))
        {
            trace!(exchange = %self.config.exchange, "Ignored message");
            return;
        }

        if let Some(reply) = self.config.pong_if.as_ref().and_then(|pong| pong(&message)) {
            trace!(exchange = %self.config.exchange, "Answering ping");
            self.send_frame(&reply).await;
            return;
        }

        if self.acknowledge(&message) {
            return;
        }

        if self
            .config
            .stop_reconnect_if
            .as_ref()
            .is_some_and(|fatal| fatal(&message))
        {
            self.fail_fatal(&message).await;
            return;
        }

        self.route(&message);
    }

    /// Consume `message` if it acknowledges a pending topic.
    fn acknowledge(&mut self, message: &Value) -> bool {
        let Some((key, entry)) = self
            .topics
            .iter_mut()
            .find(|(_, entry)| entry.state == TopicState::Pending && entry.topic.verify_ack(message))
        else {
            return false;
        };

        entry.state = TopicState::Active;
        entry.deadline = None;
        if let Some(remote_id) = self.config.update_id.as_ref().and_then(|update| update(message)) {
            self.remote_ids.insert(remote_id.clone(), key.clone());
            entry.remote_id = Some(remote_id);
        }

        info!(
            exchange = %self.config.exchange,
            key = %key,
            remote_id = entry.remote_id.as_deref().unwrap_or("-"),
            "Subscription acknowledged"
        );
        true
    }

    fn resolve(&self, id: &str) -> Option<String> {
        if self.topics.contains_key(id) {
            return Some(id.to_owned());
        }
        self.remote_ids.get(id).cloned()
    }

    async fn fail_fatal(&mut self, message: &Value) {
        let target = (self.config.extract_id)(message).and_then(|id| self.resolve(&id));
        let keys: Vec<String> = match target {
            Some(key) => vec![key],
            None => self
                .topics
                .iter()
                .filter(|(_, entry)| entry.state == TopicState::Pending)
                .map(|(key, _)| key.clone())
                .collect(),
        };

        if keys.is_empty() {
            warn!(exchange = %self.config.exchange, message = %message, "Fatal message for no topic");
            return;
        }

        for key in keys {
            let err = ChannelError::FatalSubscription {
                key: key.clone(),
                message: message.to_string(),
            };
            self.fail_topic(&key, err);
        }

        if !self.has_live_topics() {
            self.close("No subscriptions").await;
        }
    }

    fn route(&mut self, message: &Value) {
        let key = (self.config.extract_id)(message).and_then(|id| self.resolve(&id));
        let Some(entry) = key.as_deref().and_then(|key| self.topics.get_mut(key)) else {
            warn!(exchange = %self.config.exchange, message = %message, "Unknown message");
            return;
        };

        if entry.is_live() {
            entry.deliver(message);
        } else {
            trace!(exchange = %self.config.exchange, "Dropped message for released topic");
        }
    }

    async fn on_deadline(&mut self) {
        let now = Instant::now();
        let expired: Vec<String> = self
            .topics
            .iter()
            .filter(|(_, entry)| entry.deadline.is_some_and(|deadline| deadline <= now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in expired {
            let Some(entry) = self.topics.get(&key) else {
                continue;
            };
            if !entry.deadline.is_some_and(|deadline| deadline <= now) {
                continue;
            }

            match entry.state {
                TopicState::Unsubscribing => {
                    self.remove(&key);
                }
                TopicState::Pending if entry.attempts >= self.config.max_ack_attempts => {
                    let err = ChannelError::Protocol {
                        key: key.clone(),
                        attempts: entry.attempts,
                    };
                    self.fail_topic(&key, err);
                }
                TopicState::Pending => {
                    warn!(
                        exchange = %self.config.exchange,
                        key = %key,
                        attempt = entry.attempts + 1,
                        "Acknowledgement timed out, resending"
                    );
                    self.send_subscribe(&key).await;
                }
                TopicState::Active => {}
            }
        }

        if !self.has_live_topics() {
            self.close("No subscriptions").await;
        }
    }

    fn remove(&mut self, key: &str) -> Option<Entry> {
        let entry = self.topics.remove(key)?;
        if let Some(remote_id) = &entry.remote_id {
            self.remote_ids.remove(remote_id);
        }
        Some(entry)
    }

    fn fail_topic(&mut self, key: &str, err: ChannelError) {
        error!(exchange = %self.config.exchange, key = %key, error = %err, "Subscription failed");
        if let Some(entry) = self.remove(key) {
            entry.fail(&err);
        }
    }

    /// Close an idle transport.
    async fn close(&mut self, reason: &str) {
        let Some(mut transport) = self.transport.take() else {
            return;
        };

        self.set_state(ChannelState::Closing);
        info!(exchange = %self.config.exchange, reason = %reason, "Closing connection");
        if let Err(e) = transport.close().await {
            debug!(exchange = %self.config.exchange, error = %e, "Error while closing");
        }

        self.topics.retain(|_, entry| entry.is_live());
        self.remote_ids.clear();
        self.reconnect_at = None;
        self.backoff.reset();
        self.set_state(ChannelState::Closed);
    }

    async fn shutdown(&mut self) {
        self.topics.retain(|_, entry| entry.is_live());
        self.close("Shutdown").await;

        for (_, entry) in self.topics.drain() {
            entry.fail(&ChannelError::Closed);
        }
        self.remote_ids.clear();
        self.set_state(ChannelState::Closed);
    }
}

async fn next_frame(transport: &mut Option<Box<dyn Transport>>) -> Option<Result<String>> {
    match transport {
        Some(transport) => transport.next_message().await,
        None => std::future::pending().await,
    }
}

async fn next_grant(grants: &mut Option<mpsc::UnboundedReceiver<PermitRequest>>) -> PermitRequest {
    let Some(grants) = grants else {
        return std::future::pending().await;
    };
    match grants.recv().await {
        Some(grant) => grant,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
