//! Physical transport port.
//!
//! A channel owns exactly one [`Transport`] at a time and obtains new ones
//! from its [`Connector`] on every (re)connect. Frames are JSON text; the
//! transport handles protocol-level keepalive itself.

use async_trait::async_trait;

use crate::error::Result;

/// One open duplex connection carrying text frames.
#[async_trait]
pub trait Transport: Send {
    /// Send one text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is no longer writable.
    async fn send(&mut self, text: String) -> Result<()>;

    /// Wait for the next text frame.
    ///
    /// Returns `None` once the remote closed the connection, and
    /// `Some(Err(_))` on a transport failure.
    async fn next_message(&mut self) -> Option<Result<String>>;

    /// Close the connection. Errors are ignored by callers.
    async fn close(&mut self) -> Result<()>;
}

/// Factory for [`Transport`]s to a given address.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new connection to `address`.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is unreachable or the handshake fails.
    async fn connect(&self, address: &str) -> Result<Box<dyn Transport>>;
}
