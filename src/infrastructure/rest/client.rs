//! Limiter-gated JSON REST client.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::{debug, info};
use url::Url;

use super::retry::RetryPolicy;
use crate::error::{Error, Result};
use crate::infrastructure::limiter::PermitLimiter;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for one exchange's REST API.
///
/// Every attempt, retries included, first takes a permit from the
/// exchange's limiter so REST and subscribe traffic share one budget.
#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: Url,
    limiter: Option<Arc<PermitLimiter>>,
    retry: RetryPolicy,
}

impl RestClient {
    /// Client rooted at `base_url`.
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(DEFAULT_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: Url::parse(base_url)?,
            limiter: None,
            retry: RetryPolicy::default(),
        })
    }

    #[must_use]
    pub fn with_limiter(mut self, limiter: Arc<PermitLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// GET `path` with `query` and decode the JSON body.
    ///
    /// Transient failures are retried per the client's [`RetryPolicy`].
    pub async fn get_json<T>(&self, path: &str, query: &[(&str, String)]) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let url = self.base_url.join(path)?;
        info!(url = %url, "Fetching");

        self.retry
            .retry(path, || self.attempt::<T>(url.clone(), query))
            .await
    }

    async fn attempt<T>(&self, url: Url, query: &[(&str, String)]) -> Result<T>
    where
        T: DeserializeOwned,
    {
        if let Some(limiter) = &self.limiter {
            limiter.acquire().await;
        }

        let response = self.http.get(url).query(query).send().await?;
        let status = response.status();
        if status.is_success() {
            let body = response.json::<T>().await?;
            debug!(status = status.as_u16(), "REST call succeeded");
            return Ok(body);
        }

        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, body))
    }
}

fn status_error(status: StatusCode, body: String) -> Error {
    if status == StatusCode::TOO_MANY_REQUESTS {
        Error::RateLimited(body)
    } else if status == StatusCode::SERVICE_UNAVAILABLE
        && body.to_ascii_lowercase().contains("maintenance")
    {
        Error::Maintenance(body)
    } else {
        Error::Rest {
            status: status.as_u16(),
            body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::rest::retry::Delay;
    use serde::Deserialize;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Ticker {
        symbol: String,
        last: u32,
    }

    /// Serve one canned response per connection, in order.
    async fn serve(responses: Vec<(u16, &'static str)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut request = [0u8; 2048];
                let _ = socket.read(&mut request).await.unwrap();

                let reply = format!(
                    "HTTP/1.1 {status} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(reply.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
            }
        });

        format!("http://{address}/")
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(2).delay(Delay::Fixed(Duration::from_millis(1)))
    }

    #[test]
    fn maps_statuses_to_causes() {
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, String::new()),
            Error::RateLimited(_)
        ));
        assert!(matches!(
            status_error(StatusCode::SERVICE_UNAVAILABLE, "Under Maintenance".into()),
            Error::Maintenance(_)
        ));
        assert!(matches!(
            status_error(StatusCode::BAD_REQUEST, "bad".into()),
            Error::Rest { status: 400, .. }
        ));
    }

    #[tokio::test]
    async fn retries_rate_limit_then_decodes() {
        let base = serve(vec![
            (429, r#"{"error":"too many requests"}"#),
            (200, r#"{"symbol":"BTCUSD","last":42}"#),
        ])
        .await;
        let client = RestClient::new(&base).unwrap().with_retry(fast_retry());

        let ticker: Ticker = client
            .get_json("ticker", &[("symbol", "BTCUSD".into())])
            .await
            .unwrap();

        assert_eq!(
            ticker,
            Ticker {
                symbol: "BTCUSD".into(),
                last: 42
            }
        );
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let base = serve(vec![(404, r#"{"error":"unknown symbol"}"#)]).await;
        let client = RestClient::new(&base).unwrap().with_retry(fast_retry());

        let err = client.get_json::<Ticker>("ticker", &[]).await.unwrap_err();
        assert!(matches!(err, Error::Rest { status: 404, .. }));
    }

    #[tokio::test]
    async fn every_attempt_takes_a_permit() {
        let base = serve(vec![
            (503, "busy"),
            (200, r#"{"symbol":"ETHUSD","last":7}"#),
        ])
        .await;
        let limiter = Arc::new(
            PermitLimiter::builder("rest")
                .limit(5)
                .refresh(Duration::from_secs(60))
                .build()
                .unwrap(),
        );
        let client = RestClient::new(&base)
            .unwrap()
            .with_limiter(Arc::clone(&limiter))
            .with_retry(fast_retry());

        let ticker: Ticker = client.get_json("ticker", &[]).await.unwrap();

        assert_eq!(ticker.last, 7);
        assert_eq!(limiter.available(), 3);
    }
}
