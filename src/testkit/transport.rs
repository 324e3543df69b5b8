//! Fake exchange endpoint for channel tests.
//!
//! [`ScriptedConnector`] hands out in-memory transports. Every frame a
//! channel sends lands in the [`ServerHandle`], which can push frames back,
//! drop the current connection or refuse upcoming connects.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::port::{Connector, Transport};

enum ServerFrame {
    Text(String),
    Fail(String),
}

#[derive(Default)]
struct Shared {
    current: Mutex<Option<mpsc::UnboundedSender<ServerFrame>>>,
    refuse: AtomicU32,
    connect_count: AtomicU32,
}

/// [`Connector`] producing scripted transports.
pub struct ScriptedConnector {
    shared: Arc<Shared>,
    sent: mpsc::UnboundedSender<String>,
}

/// Server side of a [`ScriptedConnector`].
pub struct ServerHandle {
    shared: Arc<Shared>,
    sent: mpsc::UnboundedReceiver<String>,
}

/// Create a connector and the handle controlling it.
pub fn scripted_connector() -> (ScriptedConnector, ServerHandle) {
    let shared = Arc::new(Shared::default());
    let (sent_tx, sent_rx) = mpsc::unbounded_channel();
    (
        ScriptedConnector {
            shared: Arc::clone(&shared),
            sent: sent_tx,
        },
        ServerHandle {
            shared,
            sent: sent_rx,
        },
    )
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, address: &str) -> Result<Box<dyn Transport>> {
        self.shared.connect_count.fetch_add(1, Ordering::SeqCst);

        let refused = self
            .shared
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(Error::Connection(format!("{address}: connection refused")));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *self.shared.current.lock() = Some(tx);
        Ok(Box::new(ScriptedTransport {
            inbound: rx,
            sent: self.sent.clone(),
        }))
    }
}

struct ScriptedTransport {
    inbound: mpsc::UnboundedReceiver<ServerFrame>,
    sent: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&mut self, text: String) -> Result<()> {
        self.sent
            .send(text)
            .map_err(|_| Error::Connection("server handle dropped".into()))
    }

    async fn next_message(&mut self) -> Option<Result<String>> {
        match self.inbound.recv().await? {
            ServerFrame::Text(text) => Some(Ok(text)),
            ServerFrame::Fail(reason) => Some(Err(Error::Connection(reason))),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.inbound.close();
        Ok(())
    }
}

impl ServerHandle {
    /// Next frame the client sent, parsed as JSON.
    ///
    /// Gives up after five (possibly virtual) seconds so tests asserting
    /// silence do not hang.
    pub async fn next_sent(&mut self) -> Option<Value> {
        let text = tokio::time::timeout(Duration::from_secs(5), self.sent.recv())
            .await
            .ok()??;
        serde_json::from_str(&text).ok()
    }

    /// Every frame sent so far that has not been read yet.
    pub fn drain_sent(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(text) = self.sent.try_recv() {
            if let Ok(frame) = serde_json::from_str(&text) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Push a JSON frame to the connected client.
    pub fn push(&self, frame: Value) -> bool {
        self.push_raw(&frame.to_string())
    }

    /// Push raw text (possibly invalid JSON) to the connected client.
    pub fn push_raw(&self, text: &str) -> bool {
        self.shared
            .current
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.send(ServerFrame::Text(text.to_owned())).is_ok())
    }

    /// Fail the current connection as a network error would.
    pub fn drop_connection(&self) {
        if let Some(tx) = self.shared.current.lock().take() {
            let _ = tx.send(ServerFrame::Fail("connection reset".into()));
        }
    }

    /// Refuse the next `n` connection attempts.
    pub fn refuse_connects(&self, n: u32) {
        self.shared.refuse.store(n, Ordering::SeqCst);
    }

    /// True while the client holds an open transport.
    pub fn is_connected(&self) -> bool {
        self.shared
            .current
            .lock()
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    pub fn connect_count(&self) -> u32 {
        self.shared.connect_count.load(Ordering::SeqCst)
    }
}
