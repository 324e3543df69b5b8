//! Retry policy for REST calls.
//!
//! Only transient failures are retried: timeouts, connection errors, 5xx,
//! rate limiting and maintenance windows. Business errors (other 4xx,
//! "already subscribed") surface immediately.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{error, warn};

use crate::error::{ChannelError, Error, Result};

/// Whether an error is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Permanent,
}

/// Classify `err` for retry purposes.
#[must_use]
pub fn classify(err: &Error) -> ErrorClass {
    let transient = match err {
        Error::RateLimited(_) | Error::Maintenance(_) | Error::Connection(_) => true,
        Error::Io(_) | Error::WebSocket(_) => true,
        Error::Http(e) => {
            e.is_timeout()
                || e.is_connect()
                || e.status()
                    .is_some_and(|status| is_transient_status(status.as_u16()))
        }
        Error::Rest { status, body } => is_transient_status(*status) || is_transient_body(body),
        Error::Channel(ChannelError::Transport { .. }) => true,
        _ => false,
    };

    if transient {
        ErrorClass::Transient
    } else {
        ErrorClass::Permanent
    }
}

const fn is_transient_status(status: u16) -> bool {
    matches!(status, 408 | 429) || status >= 500
}

fn is_transient_body(body: &str) -> bool {
    let body = body.to_ascii_lowercase();
    body.contains("too many requests") || body.contains("maintenance")
}

/// How the pause between attempts grows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Delay {
    /// The same pause every time.
    Fixed(Duration),
    /// `base * (retry + 1)`.
    Linear(Duration),
    /// `base * factor^retry`.
    Exponential { base: Duration, factor: f64 },
}

impl Delay {
    fn before_retry(self, retry: u32) -> Duration {
        match self {
            Self::Fixed(delay) => delay,
            Self::Linear(base) => base.saturating_mul(retry.saturating_add(1)),
            Self::Exponential { base, factor } => {
                let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
                Duration::try_from_secs_f64(base.as_secs_f64() * factor.powi(exponent))
                    .unwrap_or(Duration::MAX)
            }
        }
    }
}

/// Bounded retry with a clamped delay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    limit: u32,
    delay: Delay,
    delay_minimum: Duration,
    delay_maximum: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            limit: 3,
            delay: Delay::Exponential {
                base: Duration::from_secs(1),
                factor: 2.0,
            },
            delay_minimum: Duration::ZERO,
            delay_maximum: Duration::from_secs(600),
        }
    }
}

impl RetryPolicy {
    /// Retry up to `limit` times after the first attempt.
    #[must_use]
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    /// Never retry.
    #[must_use]
    pub fn none() -> Self {
        Self::new(0)
    }

    #[must_use]
    pub const fn delay(mut self, delay: Delay) -> Self {
        self.delay = delay;
        self
    }

    #[must_use]
    pub const fn delay_minimum(mut self, minimum: Duration) -> Self {
        self.delay_minimum = minimum;
        self
    }

    #[must_use]
    pub const fn delay_maximum(mut self, maximum: Duration) -> Self {
        self.delay_maximum = maximum;
        self
    }

    #[must_use]
    pub const fn limit(&self) -> u32 {
        self.limit
    }

    /// Pause before retry number `retry` (0-based).
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let maximum = self.delay_maximum.max(self.delay_minimum);
        self.delay
            .before_retry(retry)
            .clamp(self.delay_minimum, maximum)
    }

    /// Run `operation`, retrying transient failures.
    ///
    /// # Errors
    ///
    /// Returns the first permanent error, or the last transient one once
    /// the retry limit is spent.
    pub async fn retry<T, F, Fut>(&self, name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retries = 0;
        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if classify(&err) == ErrorClass::Permanent {
                return Err(err);
            }
            if retries >= self.limit {
                error!(operation = %name, attempts = retries + 1, error = %err, "Giving up after retries");
                return Err(err);
            }

            let delay = self.delay_for(retries);
            warn!(
                operation = %name,
                attempt = retries + 1,
                max_attempts = self.limit + 1,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Request failed, retrying"
            );
            sleep(delay).await;
            retries += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn classifies_http_statuses() {
        let rest = |status: u16, body: &str| Error::Rest {
            status,
            body: body.into(),
        };

        assert_eq!(classify(&rest(503, "")), ErrorClass::Transient);
        assert_eq!(classify(&rest(429, "")), ErrorClass::Transient);
        assert_eq!(classify(&rest(400, "Too Many Requests")), ErrorClass::Transient);
        assert_eq!(classify(&rest(403, "System maintenance")), ErrorClass::Transient);
        assert_eq!(classify(&rest(400, "invalid symbol")), ErrorClass::Permanent);
        assert_eq!(classify(&rest(409, "already subscribed")), ErrorClass::Permanent);
    }

    #[test]
    fn classifies_causes() {
        assert_eq!(classify(&Error::RateLimited("x".into())), ErrorClass::Transient);
        assert_eq!(classify(&Error::Maintenance("x".into())), ErrorClass::Transient);
        assert_eq!(
            classify(&Error::Channel(ChannelError::FatalSubscription {
                key: "k".into(),
                message: "already subscribed".into(),
            })),
            ErrorClass::Permanent
        );
    }

    #[test]
    fn delays_are_clamped() {
        let policy = RetryPolicy::new(5)
            .delay(Delay::Linear(Duration::from_millis(100)))
            .delay_minimum(Duration::from_millis(150))
            .delay_maximum(Duration::from_millis(250));

        assert_eq!(policy.delay_for(0), Duration::from_millis(150));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(4), Duration::from_millis(250));
    }

    #[test]
    fn exponential_delay_grows() {
        let policy = RetryPolicy::new(5).delay(Delay::Exponential {
            base: Duration::from_secs(1),
            factor: 3.0,
        });
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3).delay(Delay::Fixed(Duration::from_secs(1)));

        let value = policy
            .retry("fetch", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::Maintenance("back soon".into()))
                } else {
                    Ok(7)
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = RetryPolicy::new(3)
            .retry("fetch", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::Rest {
                    status: 400,
                    body: "bad request".into(),
                })
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_limit() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = RetryPolicy::new(2)
            .delay(Delay::Fixed(Duration::from_millis(5)))
            .retry("fetch", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::RateLimited("slow down".into()))
            })
            .await;

        assert!(matches!(result, Err(Error::RateLimited(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
