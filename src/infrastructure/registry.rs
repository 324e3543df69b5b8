//! Per-exchange shared resources.
//!
//! Every connector of one exchange must share the same quota, the same
//! connection and the same id scheme. [`ExchangeRegistry`] creates each
//! resource on first use and hands out the same `Arc` afterwards.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tracing::info;

use super::channel::{Channel, ChannelConfig};
use super::config::exchange::ExchangeSettings;
use super::config::settings::Config;
use super::limiter::{FileLimiterStore, LimiterStore, PermitLimiter};
use crate::domain::Sequencer;
use crate::error::Result;
use crate::port::Connector;

/// Limiter, channel and sequencer per configured exchange.
pub struct ExchangeRegistry {
    config: Config,
    connector: Arc<dyn Connector>,
    store: Option<Arc<dyn LimiterStore>>,
    limiters: DashMap<String, Option<Arc<PermitLimiter>>>,
    channels: DashMap<String, Arc<Channel>>,
    sequencers: DashMap<String, Arc<Sequencer>>,
}

impl ExchangeRegistry {
    /// Registry over `config`. Opens the limiter state file when any
    /// exchange asks for a persisted quota.
    pub fn new(config: Config, connector: Arc<dyn Connector>) -> Result<Self> {
        let persists = config
            .exchanges
            .values()
            .any(|settings| settings.limit.as_ref().is_some_and(|limit| limit.persist));
        let store: Option<Arc<dyn LimiterStore>> = if persists {
            Some(Arc::new(FileLimiterStore::open(&config.storage.limiter_state)?))
        } else {
            None
        };

        Ok(Self {
            config,
            connector,
            store,
            limiters: DashMap::new(),
            channels: DashMap::new(),
            sequencers: DashMap::new(),
        })
    }

    /// Replace the limiter state store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn LimiterStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Configured exchange names, sorted.
    pub fn exchanges(&self) -> impl Iterator<Item = &str> {
        self.config.exchanges.keys().map(String::as_str)
    }

    pub fn settings(&self, exchange: &str) -> Result<&ExchangeSettings> {
        self.config.exchange(exchange)
    }

    /// The exchange's shared limiter, or `None` when it has no quota.
    pub fn limiter(&self, exchange: &str) -> Result<Option<Arc<PermitLimiter>>> {
        if let Some(limiter) = self.limiters.get(exchange) {
            return Ok(limiter.value().clone());
        }

        let settings = self.settings(exchange)?;
        let entry = self
            .limiters
            .entry(exchange.to_owned())
            .or_try_insert_with(|| {
                settings
                    .limit
                    .as_ref()
                    .map(|limit| {
                        PermitLimiter::from_settings(exchange, limit, self.store.clone())
                            .map(Arc::new)
                    })
                    .transpose()
            })?;
        Ok(entry.value().clone())
    }

    /// The exchange's shared sequencer.
    pub fn sequencer(&self, exchange: &str) -> Result<Arc<Sequencer>> {
        if let Some(sequencer) = self.sequencers.get(exchange) {
            return Ok(Arc::clone(sequencer.value()));
        }

        let settings = self.settings(exchange)?;
        let entry = self
            .sequencers
            .entry(exchange.to_owned())
            .or_try_insert_with(|| -> Result<_> {
                Ok(Arc::new(Sequencer::new(exchange, settings.padding)?))
            })?;
        Ok(Arc::clone(entry.value()))
    }

    /// The exchange's shared channel, routing by `extract_id`.
    ///
    /// `extract_id` is only used when the channel is created; later callers
    /// get the existing channel.
    pub fn channel<F>(&self, exchange: &str, extract_id: F) -> Result<Arc<Channel>>
    where
        F: Fn(&Value) -> Option<String> + Send + Sync + 'static,
    {
        self.channel_with(exchange, extract_id, |config| config)
    }

    /// Like [`Self::channel`], letting `customize` add exchange hooks
    /// (pings, ignored frames, fatal errors) before the channel starts.
    pub fn channel_with<F, C>(
        &self,
        exchange: &str,
        extract_id: F,
        customize: C,
    ) -> Result<Arc<Channel>>
    where
        F: Fn(&Value) -> Option<String> + Send + Sync + 'static,
        C: FnOnce(ChannelConfig) -> ChannelConfig,
    {
        if let Some(channel) = self.channels.get(exchange) {
            return Ok(Arc::clone(channel.value()));
        }

        let settings = self.settings(exchange)?;
        let limiter = self.limiter(exchange)?;
        let entry = self
            .channels
            .entry(exchange.to_owned())
            .or_insert_with(|| {
                let mut config = ChannelConfig::from_settings(exchange, settings, extract_id)
                    .reconnection(self.config.reconnection.clone());
                if let Some(limiter) = limiter {
                    config = config.restrict(limiter);
                }

                info!(exchange = %exchange, address = %settings.address, "Creating channel");
                Arc::new(Channel::new(customize(config), Arc::clone(&self.connector)))
            });
        Ok(Arc::clone(entry.value()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConfigError, Error};
    use crate::infrastructure::config::exchange::LimitSettings;
    use crate::infrastructure::limiter::{MemoryLimiterStore, PermitState};
    use crate::testkit::{config, transport::scripted_connector};
    use futures_util::StreamExt;

    fn extract(msg: &Value) -> Option<String> {
        msg["channel"].as_str().map(str::to_owned)
    }

    fn app_config() -> Config {
        let mut limited = config::exchange();
        limited.padding = 1_000;
        limited.limit = Some(LimitSettings {
            permits: 5,
            refresh_ms: 60_000,
            persist: false,
        });

        let mut config = Config {
            reconnection: config::reconnection(),
            ..Config::default()
        };
        config.exchanges.insert("bybit".into(), limited);
        config.exchanges.insert("okx".into(), config::exchange());
        config
    }

    fn registry() -> (ExchangeRegistry, crate::testkit::transport::ServerHandle) {
        let (connector, server) = scripted_connector();
        let registry = ExchangeRegistry::new(app_config(), Arc::new(connector)).unwrap();
        (registry, server)
    }

    #[tokio::test]
    async fn resources_are_shared_per_exchange() {
        let (registry, _server) = registry();

        let first = registry.limiter("bybit").unwrap().unwrap();
        let second = registry.limiter("bybit").unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.capacity(), 5);
        assert!(registry.limiter("okx").unwrap().is_none());

        let sequencer = registry.sequencer("bybit").unwrap();
        assert!(Arc::ptr_eq(&sequencer, &registry.sequencer("bybit").unwrap()));
        assert_eq!(sequencer.padding(), 1_000);
        assert_eq!(sequencer.source(), "bybit");

        let channel = registry.channel("bybit", extract).unwrap();
        assert!(Arc::ptr_eq(&channel, &registry.channel("bybit", |_| None).unwrap()));
        assert_eq!(channel.exchange(), "bybit");
    }

    #[tokio::test]
    async fn unknown_exchange_is_a_config_error() {
        let (registry, _server) = registry();

        let err = registry.sequencer("kraken").unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::UnknownExchange(name)) if name == "kraken"));
        assert!(registry.channel("kraken", extract).is_err());
    }

    #[tokio::test]
    async fn channel_spends_the_exchange_quota() {
        let (registry, mut server) = registry();
        let channel = registry
            .channel_with("bybit", extract, ChannelConfig::no_server_reply)
            .unwrap();

        let _trades = channel.subscribe(config::topic("trades"));
        server.next_sent().await.unwrap();

        let limiter = registry.limiter("bybit").unwrap().unwrap();
        assert_eq!(limiter.available(), 4);
    }

    #[tokio::test]
    async fn channel_delivers_through_registry() {
        let (registry, mut server) = registry();
        let channel = registry.channel("okx", extract).unwrap();

        let mut trades = channel.subscribe(config::topic("trades"));
        server.next_sent().await.unwrap();
        server.push(config::ack("trades"));
        server.push(config::data("trades", 3));

        assert_eq!(trades.next().await.unwrap().unwrap(), config::data("trades", 3));
    }

    #[tokio::test]
    async fn persisted_quota_uses_the_store() {
        let mut config = app_config();
        if let Some(limit) = config
            .exchanges
            .get_mut("bybit")
            .and_then(|s| s.limit.as_mut())
        {
            limit.persist = true;
        }
        let dir = tempfile::tempdir().unwrap();
        config.storage.limiter_state = dir.path().join("limits.json");

        let store = Arc::new(MemoryLimiterStore::new());
        let (connector, _server) = scripted_connector();
        let registry = ExchangeRegistry::new(config, Arc::new(connector))
            .unwrap()
            .with_store(store.clone());

        registry.limiter("bybit").unwrap().unwrap().acquire().await;

        let saved: Option<PermitState> = store.load("bybit");
        assert_eq!(saved.map(|s| s.available), Some(4));
    }
}
