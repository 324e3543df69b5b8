//! Consumer side of a topic.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use serde_json::Value;
use tokio::sync::mpsc;

use super::driver::Command;
use crate::error::ChannelError;

/// Stream of messages routed to one topic.
///
/// Dropping it releases the subscription: once the last subscriber of a key
/// is gone the channel sends the topic's unsubscribe frame and stops routing.
/// [`ChannelError::Transport`] is a notice that reconnection is paused; the
/// stream stays open and resumes once the channel reconnects. Any other `Err`
/// is terminal and is followed by the end of the stream.
#[derive(Debug)]
pub struct Subscription {
    key: String,
    subscriber: u64,
    receiver: mpsc::UnboundedReceiver<Result<Value, ChannelError>>,
    commands: mpsc::UnboundedSender<Command>,
}

impl Subscription {
    pub(super) fn new(
        key: String,
        subscriber: u64,
        receiver: mpsc::UnboundedReceiver<Result<Value, ChannelError>>,
        commands: mpsc::UnboundedSender<Command>,
    ) -> Self {
        Self {
            key,
            subscriber,
            receiver,
            commands,
        }
    }

    /// Local key of the topic this stream belongs to.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Stream for Subscription {
    type Item = Result<Value, ChannelError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Release {
            key: std::mem::take(&mut self.key),
            subscriber: self.subscriber,
        });
    }
}
