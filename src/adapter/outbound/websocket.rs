//! WebSocket transport.
//!
//! Implements the [`Connector`]/[`Transport`] ports over `tokio-tungstenite`.
//! Protocol pings are answered here; application-level pings are left to
//! the channel's `pong_if` hook.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace};

use crate::error::{Error, Result};
use crate::port::{Connector, Transport};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Opens WebSocket connections (`ws://` or `wss://`).
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    connect_timeout: Duration,
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl WebSocketConnector {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Fail connects whose handshake takes longer than `timeout`.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, address: &str) -> Result<Box<dyn Transport>> {
        info!(url = %address, "Connecting to WebSocket");

        let (stream, response) = timeout(self.connect_timeout, connect_async(address))
            .await
            .map_err(|_| Error::Connection(format!("handshake with {address} timed out")))??;

        info!(status = %response.status(), "WebSocket connected");
        Ok(Box::new(WebSocketTransport { stream }))
    }
}

/// One open WebSocket connection.
pub struct WebSocketTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, text: String) -> Result<()> {
        trace!(bytes = text.len(), "Sending WebSocket text frame");
        self.stream.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn next_message(&mut self) -> Option<Result<String>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => {
                    trace!(bytes = text.len(), "Received WebSocket text frame");
                    return Some(Ok(text));
                }
                Ok(Message::Binary(data)) => match String::from_utf8(data) {
                    Ok(text) => return Some(Ok(text)),
                    Err(e) => debug!(error = %e, "Dropping non-UTF-8 binary frame"),
                },
                Ok(Message::Ping(data)) => {
                    trace!("Received WebSocket ping");
                    if let Err(e) = self.stream.send(Message::Pong(data)).await {
                        return Some(Err(e.into()));
                    }
                }
                Ok(Message::Close(frame)) => {
                    info!(frame = ?frame, "WebSocket closed by server");
                    return None;
                }
                Ok(_) => {}
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.stream.close(None).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    async fn server<F, Fut>(script: F) -> String
    where
        F: FnOnce(WebSocketStream<TcpStream>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            script(accept_async(socket).await.unwrap()).await;
        });
        format!("ws://{address}")
    }

    #[tokio::test]
    async fn exchanges_text_frames() {
        let url = server(|mut ws| async move {
            while let Some(Ok(Message::Text(text))) = ws.next().await {
                ws.send(Message::Text(format!("echo:{text}"))).await.unwrap();
            }
        })
        .await;

        let mut transport = WebSocketConnector::new().connect(&url).await.unwrap();
        transport.send(r#"{"op":"subscribe"}"#.into()).await.unwrap();

        let reply = transport.next_message().await.unwrap().unwrap();
        assert_eq!(reply, r#"echo:{"op":"subscribe"}"#);
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn answers_pings_and_ends_on_close() {
        let url = server(|mut ws| async move {
            ws.send(Message::Ping(b"hb".to_vec())).await.unwrap();
            let mut pong = None;
            while let Some(Ok(message)) = ws.next().await {
                if let Message::Pong(data) = message {
                    pong = Some(data);
                    break;
                }
            }
            let text = if pong.as_deref() == Some(b"hb".as_slice()) { "ponged" } else { "missing" };
            ws.send(Message::Text(text.into())).await.unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketConnector::new().connect(&url).await.unwrap();

        assert_eq!(transport.next_message().await.unwrap().unwrap(), "ponged");
        assert!(transport.next_message().await.is_none());
    }

    #[tokio::test]
    async fn unreachable_endpoint_fails_to_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        let result = WebSocketConnector::new()
            .connect(&format!("ws://{address}"))
            .await;
        assert!(result.is_err());
    }
}
