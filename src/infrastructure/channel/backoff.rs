//! Reconnect pacing for a channel's transport.
//!
//! Exponential backoff with random jitter, plus a circuit breaker that pauses
//! reconnection entirely after too many consecutive failures.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::{error, info};

use crate::infrastructure::config::reconnection::ReconnectionConfig;

/// Circuit breaker state for connection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CircuitState {
    /// Normal operation; connections are allowed.
    Closed,
    /// Too many consecutive failures; connections blocked until cooldown expires.
    Open { until: Instant },
}

/// When the next connection attempt may start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Retry {
    pub(super) at: Instant,
    /// This failure opened the circuit breaker.
    pub(super) tripped: bool,
}

/// Backoff bookkeeping owned by one channel driver.
#[derive(Debug)]
pub(super) struct Backoff {
    config: ReconnectionConfig,
    consecutive_failures: u32,
    current_delay_ms: u64,
    circuit_state: CircuitState,
}

impl Backoff {
    pub(super) fn new(config: ReconnectionConfig) -> Self {
        let initial_delay = config.initial_delay_ms;
        Self {
            config,
            consecutive_failures: 0,
            current_delay_ms: initial_delay,
            circuit_state: CircuitState::Closed,
        }
    }

    /// Clear failures after the transport proved healthy.
    pub(super) fn reset(&mut self) {
        self.consecutive_failures = 0;
        self.current_delay_ms = self.config.initial_delay_ms;
        self.circuit_state = CircuitState::Closed;
    }

    #[must_use]
    pub(super) const fn failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Current delay plus jitter; advances the delay for the next call.
    pub(super) fn next_delay(&mut self) -> Duration {
        let base_delay = Duration::from_millis(self.current_delay_ms);
        let delay = base_delay + Duration::from_millis(self.jitter_ms(base_delay));

        let next_delay = (self.current_delay_ms as f64 * self.config.backoff_multiplier) as u64;
        self.current_delay_ms = next_delay.min(self.config.max_delay_ms);

        delay
    }

    fn jitter_ms(&self, base_delay: Duration) -> u64 {
        let jitter_range_ms = (base_delay.as_millis() as f64 * self.config.jitter_ratio) as u64;
        if jitter_range_ms == 0 {
            return 0;
        }
        rand::thread_rng().gen_range(0..=jitter_range_ms)
    }

    /// True if the circuit is closed or its cooldown has expired.
    pub(super) fn circuit_allows_connection(&mut self) -> bool {
        match self.circuit_state {
            CircuitState::Closed => true,
            CircuitState::Open { until } => {
                if Instant::now() >= until {
                    info!("Circuit breaker cooldown expired, allowing reconnection");
                    self.reset();
                    true
                } else {
                    false
                }
            }
        }
    }

    /// End of the current cooldown, if the breaker is open.
    #[must_use]
    pub(super) const fn open_until(&self) -> Option<Instant> {
        match self.circuit_state {
            CircuitState::Closed => None,
            CircuitState::Open { until } => Some(until),
        }
    }

    /// Count a failure and trip the breaker past the configured threshold.
    ///
    /// Returns `true` when this failure opened the breaker.
    pub(super) fn record_failure(&mut self) -> bool {
        self.consecutive_failures += 1;

        let was_closed = self.circuit_state == CircuitState::Closed;
        if self.consecutive_failures >= self.config.max_consecutive_failures {
            let cooldown = Duration::from_millis(self.config.circuit_breaker_cooldown_ms);
            self.circuit_state = CircuitState::Open {
                until: Instant::now() + cooldown,
            };
            error!(
                failures = self.consecutive_failures,
                cooldown_secs = cooldown.as_secs(),
                "Circuit breaker tripped, pausing reconnection attempts"
            );
            return was_closed;
        }
        false
    }

    /// Record a failure and return when the next attempt may start.
    pub(super) fn schedule_retry(&mut self) -> Retry {
        let tripped = self.record_failure();
        let at = match self.open_until() {
            Some(until) => until,
            None => Instant::now() + self.next_delay(),
        };
        Retry { at, tripped }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff_config() -> ReconnectionConfig {
        ReconnectionConfig {
            initial_delay_ms: 10,
            max_delay_ms: 100,
            backoff_multiplier: 2.0,
            jitter_ratio: 0.2,
            max_consecutive_failures: 3,
            circuit_breaker_cooldown_ms: 50,
        }
    }

    #[test]
    fn test_exponential_backoff() {
        let mut backoff = Backoff::new(backoff_config());

        let assert_delay_in_range = |delay: Duration, base_ms: u64| {
            let max_ms = base_ms + (base_ms / 5);
            assert!(
                (base_ms..=max_ms).contains(&(delay.as_millis() as u64)),
                "delay {delay:?} not within {base_ms}..={max_ms} ms"
            );
        };

        assert_delay_in_range(backoff.next_delay(), 10);
        assert_delay_in_range(backoff.next_delay(), 20);
        assert_delay_in_range(backoff.next_delay(), 40);
        assert_delay_in_range(backoff.next_delay(), 80);
        assert_delay_in_range(backoff.next_delay(), 100); // Capped at max
    }

    #[test]
    fn test_zero_jitter_ratio_is_exact() {
        let mut backoff = Backoff::new(ReconnectionConfig {
            jitter_ratio: 0.0,
            ..backoff_config()
        });
        assert_eq!(backoff.next_delay(), Duration::from_millis(10));
        assert_eq!(backoff.next_delay(), Duration::from_millis(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_breaker_trips() {
        let mut backoff = Backoff::new(backoff_config());

        for _ in 0..3 {
            backoff.record_failure();
        }

        assert!(backoff.open_until().is_some());
        assert!(!backoff.circuit_allows_connection());
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_breaker_cooldown_expires() {
        let mut backoff = Backoff::new(backoff_config());
        for _ in 0..3 {
            backoff.record_failure();
        }

        tokio::time::advance(Duration::from_millis(50)).await;

        assert!(backoff.circuit_allows_connection());
        assert_eq!(backoff.failures(), 0);
        assert!(backoff.open_until().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_retry_waits_out_open_circuit() {
        let mut backoff = Backoff::new(backoff_config());
        assert!(!backoff.schedule_retry().tripped);
        assert!(!backoff.schedule_retry().tripped);

        let start = Instant::now();
        let retry = backoff.schedule_retry();
        assert_eq!(retry.at, start + Duration::from_millis(50));
        assert!(retry.tripped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_reports_trip_once() {
        let mut backoff = Backoff::new(backoff_config());
        let trips: Vec<bool> = (0..4).map(|_| backoff.record_failure()).collect();
        assert_eq!(trips, vec![false, false, true, false]);

        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(backoff.circuit_allows_connection());
        let trips: Vec<bool> = (0..3).map(|_| backoff.record_failure()).collect();
        assert_eq!(trips, vec![false, false, true]);
    }

    #[test]
    fn test_reset_backoff() {
        let mut backoff = Backoff::new(backoff_config());

        backoff.consecutive_failures = 5;
        backoff.current_delay_ms = 1000;
        backoff.reset();

        assert_eq!(backoff.failures(), 0);
        assert_eq!(backoff.current_delay_ms, 10);
        assert_eq!(backoff.circuit_state, CircuitState::Closed);
    }
}
