//! Permit limiter bounding outbound requests per exchange.
//!
//! A fixed-window bucket: `capacity` permits per `window`, reset (not topped
//! up) when a window ends. Waiters queue in FIFO order behind a fair async
//! mutex and sleep until the next window instead of polling.
//!
//! ```no_run
//! use std::time::Duration;
//! use tradeline::infrastructure::limiter::PermitLimiter;
//!
//! # async fn demo() -> tradeline::error::Result<()> {
//! let limiter = PermitLimiter::builder("bitflyer")
//!     .limit(500)
//!     .refresh(Duration::from_secs(300))
//!     .build()?;
//!
//! limiter.acquire().await;
//! # Ok(())
//! # }
//! ```

mod store;

pub use store::{FileLimiterStore, LimiterStore, MemoryLimiterStore, PermitState};

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, trace, warn};

use crate::error::{ConfigError, Result};
use crate::infrastructure::config::exchange::LimitSettings;

/// Mutable bucket state guarded by a short-lived lock.
#[derive(Debug, Clone, Copy)]
struct Bucket {
    available: u32,
    window_start: Instant,
}

impl Bucket {
    /// Move to the window containing `now`, restoring full capacity.
    fn roll(&mut self, now: Instant, window: Duration, capacity: u32) {
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < window {
            return;
        }
        let windows = (elapsed.as_nanos() / window.as_nanos()) as u32;
        self.window_start += window * windows;
        self.available = capacity;
    }
}

/// Token-bucket gate shared by every caller of one exchange.
pub struct PermitLimiter {
    name: String,
    capacity: u32,
    window: Duration,
    bucket: Mutex<Bucket>,
    queue: tokio::sync::Mutex<()>,
    store: Option<(String, Arc<dyn LimiterStore>)>,
}

impl std::fmt::Debug for PermitLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermitLimiter")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("window", &self.window)
            .field("persistent", &self.store.is_some())
            .finish()
    }
}

/// Builder for [`PermitLimiter`].
pub struct PermitLimiterBuilder {
    name: String,
    limit: u32,
    refresh: Duration,
    persist: Option<(String, Arc<dyn LimiterStore>)>,
}

impl PermitLimiterBuilder {
    /// Permits granted per window.
    #[must_use]
    pub fn limit(mut self, permits: u32) -> Self {
        self.limit = permits;
        self
    }

    /// Window length.
    #[must_use]
    pub fn refresh(mut self, window: Duration) -> Self {
        self.refresh = window;
        self
    }

    /// Load and save the bucket under `key` in `store`.
    #[must_use]
    pub fn persistable(mut self, key: impl Into<String>, store: Arc<dyn LimiterStore>) -> Self {
        self.persist = Some((key.into(), store));
        self
    }

    /// Build the limiter.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] when the limit or window is zero.
    pub fn build(self) -> Result<PermitLimiter> {
        if self.limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "permits",
                reason: format!("{}: capacity must be positive", self.name),
            }
            .into());
        }
        if self.refresh.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "refresh",
                reason: format!("{}: window must be positive", self.name),
            }
            .into());
        }

        let now = Instant::now();
        let mut bucket = Bucket {
            available: self.limit,
            window_start: now,
        };

        if let Some((key, store)) = &self.persist {
            if let Some(saved) = store.load(key) {
                bucket = restore(saved, self.limit, self.refresh, now);
            }
            info!(
                limiter = %self.name,
                key = %key,
                available = bucket.available,
                "Initialized persistent rate limit"
            );
        }

        Ok(PermitLimiter {
            name: self.name,
            capacity: self.limit,
            window: self.refresh,
            bucket: Mutex::new(bucket),
            queue: tokio::sync::Mutex::new(()),
            store: self.persist,
        })
    }
}

/// Rebuild an in-memory bucket from saved wall-clock state.
fn restore(saved: PermitState, capacity: u32, window: Duration, now: Instant) -> Bucket {
    let elapsed_ms = chrono::Utc::now().timestamp_millis() - saved.window_start_ms;
    let fresh = Bucket {
        available: capacity,
        window_start: now,
    };

    let Ok(elapsed_ms) = u64::try_from(elapsed_ms) else {
        return fresh;
    };
    let elapsed = Duration::from_millis(elapsed_ms);
    if elapsed >= window {
        return fresh;
    }

    match now.checked_sub(elapsed) {
        Some(window_start) => Bucket {
            available: saved.available.min(capacity),
            window_start,
        },
        None => fresh,
    }
}

impl PermitLimiter {
    /// Start building a limiter named `name` (used in logs and as default key).
    pub fn builder(name: impl Into<String>) -> PermitLimiterBuilder {
        PermitLimiterBuilder {
            name: name.into(),
            limit: 0,
            refresh: Duration::ZERO,
            persist: None,
        }
    }

    /// Build from configured settings, persisting under `name` when requested.
    pub fn from_settings(
        name: &str,
        settings: &LimitSettings,
        store: Option<Arc<dyn LimiterStore>>,
    ) -> Result<Self> {
        let mut builder = Self::builder(name)
            .limit(settings.permits)
            .refresh(Duration::from_millis(settings.refresh_ms));
        if settings.persist {
            match store {
                Some(store) => builder = builder.persistable(name, store),
                None => warn!(limiter = %name, "Persistence requested without a store"),
            }
        }
        builder.build()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    /// Permits left in the current window.
    #[must_use]
    pub fn available(&self) -> u32 {
        let mut bucket = self.bucket.lock();
        bucket.roll(Instant::now(), self.window, self.capacity);
        bucket.available
    }

    /// Wait for one permit.
    pub async fn acquire(&self) {
        self.acquire_weighted(1).await;
    }

    /// Wait for `weight` permits.
    ///
    /// Weights below 1 count as 1; weights above capacity are clamped so the
    /// call can always complete within one window.
    pub async fn acquire_weighted(&self, weight: u32) {
        let weight = weight.clamp(1, self.capacity);
        let _turn = self.queue.lock().await;

        loop {
            let next_window = match self.take(weight) {
                Ok(()) => return,
                Err(next_window) => next_window,
            };
            trace!(
                limiter = %self.name,
                wait_ms = next_window.saturating_duration_since(Instant::now()).as_millis() as u64,
                "Waiting for next permit window"
            );
            sleep_until(next_window).await;
        }
    }

    /// Take one permit if available without waiting.
    ///
    /// Does not jump the queue: returns `false` while others are waiting.
    pub fn try_acquire(&self) -> bool {
        match self.queue.try_lock() {
            Ok(_turn) => self.take(1).is_ok(),
            Err(_) => false,
        }
    }

    /// Take permits or report when the current window ends.
    fn take(&self, weight: u32) -> std::result::Result<(), Instant> {
        let snapshot = {
            let mut bucket = self.bucket.lock();
            bucket.roll(Instant::now(), self.window, self.capacity);
            if bucket.available < weight {
                return Err(bucket.window_start + self.window);
            }
            bucket.available -= weight;
            *bucket
        };
        self.persist(snapshot);
        Ok(())
    }

    fn persist(&self, bucket: Bucket) {
        let Some((key, store)) = &self.store else {
            return;
        };

        let age = Instant::now().saturating_duration_since(bucket.window_start);
        let state = PermitState {
            available: bucket.available,
            window_start_ms: chrono::Utc::now().timestamp_millis() - age.as_millis() as i64,
        };
        if let Err(e) = store.save(key, state) {
            warn!(limiter = %self.name, error = %e, "Failed to persist rate limit");
        } else {
            debug!(limiter = %self.name, available = state.available, "Persisted rate limit");
        }
    }
}
