//! Application configuration loading and validation.
//!
//! Provides the main [`Config`] struct that aggregates all settings. It is
//! loaded from a TOML file; `.env` files are honoured by the binary before
//! loading so `RUST_LOG` and similar variables apply.
//!
//! # Example
//!
//! ```no_run
//! use tradeline::infrastructure::config::settings::Config;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("config.toml")?;
//!     config.init_logging();
//!     Ok(())
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use url::Url;

use super::exchange::ExchangeSettings;
use super::logging::LoggingConfig;
use super::reconnection::ReconnectionConfig;
use crate::domain::sequence::MAX_PADDING;
use crate::error::{ConfigError, Result};

/// Where persisted state lives.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory holding daily execution logs.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// JSON file holding durable permit buckets.
    #[serde(default = "default_limiter_state")]
    pub limiter_state: PathBuf,
}

fn state_root() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("tradeline"))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_log_dir() -> PathBuf {
    state_root().join("logs")
}

fn default_limiter_state() -> PathBuf {
    state_root().join("limits.json")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            limiter_state: default_limiter_state(),
        }
    }
}

/// Main application configuration.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Logging and tracing configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Channel reconnection settings.
    ///
    /// Controls backoff delays and circuit breaker behavior.
    #[serde(default)]
    pub reconnection: ReconnectionConfig,

    /// Persisted state locations.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Connectivity settings per exchange name.
    #[serde(default)]
    pub exchanges: BTreeMap<String, ExchangeSettings>,
}

impl Config {
    /// Parse configuration from TOML content.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML content is malformed or validation fails.
    pub fn parse_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, the TOML content is
    /// malformed, or validation fails.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        Self::parse_toml(&content)
    }

    /// Settings for one exchange.
    pub fn exchange(&self, name: &str) -> Result<&ExchangeSettings> {
        self.exchanges
            .get(name)
            .ok_or_else(|| ConfigError::UnknownExchange(name.to_string()).into())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        let invalid = |field: &'static str, reason: String| -> crate::error::Error {
            ConfigError::InvalidValue { field, reason }.into()
        };

        if !self.logging.is_known_format() {
            return Err(invalid(
                "format",
                format!("'{}' is not one of pretty, json", self.logging.format),
            ));
        }

        let reconnection = &self.reconnection;
        if reconnection.initial_delay_ms == 0 {
            return Err(invalid("initial_delay_ms", "must be greater than 0".into()));
        }
        if reconnection.max_delay_ms < reconnection.initial_delay_ms {
            return Err(invalid("max_delay_ms", "must be >= initial_delay_ms".into()));
        }
        if reconnection.backoff_multiplier < 1.0 {
            return Err(invalid("backoff_multiplier", "must be >= 1.0".into()));
        }
        if !(0.0..=1.0).contains(&reconnection.jitter_ratio) {
            return Err(invalid("jitter_ratio", "must be between 0 and 1".into()));
        }
        if reconnection.max_consecutive_failures == 0 {
            return Err(invalid(
                "max_consecutive_failures",
                "must be greater than 0".into(),
            ));
        }

        for (name, exchange) in &self.exchanges {
            let url = Url::parse(&exchange.address)
                .map_err(|e| invalid("address", format!("{name}: {e}")))?;
            if !matches!(url.scheme(), "ws" | "wss") {
                return Err(invalid(
                    "address",
                    format!("{name}: scheme must be ws or wss"),
                ));
            }
            if !is_power_of_ten(exchange.padding) || exchange.padding > MAX_PADDING {
                return Err(invalid(
                    "padding",
                    format!(
                        "{name}: {} is not a power of ten between 10 and {MAX_PADDING}",
                        exchange.padding
                    ),
                ));
            }
            if exchange.ack_timeout_ms == 0 {
                return Err(invalid("ack_timeout_ms", format!("{name}: must be > 0")));
            }
            if exchange.max_ack_attempts == 0 {
                return Err(invalid("max_ack_attempts", format!("{name}: must be > 0")));
            }
            if let Some(limit) = &exchange.limit {
                if limit.permits == 0 {
                    return Err(invalid("permits", format!("{name}: must be > 0")));
                }
                if limit.refresh_ms == 0 {
                    return Err(invalid("refresh_ms", format!("{name}: must be > 0")));
                }
            }
        }

        Ok(())
    }

    /// Initialize logging with the configured settings.
    pub fn init_logging(&self) {
        self.logging.init();
    }
}

fn is_power_of_ten(mut value: u64) -> bool {
    if value < 10 {
        return false;
    }
    while value % 10 == 0 {
        value /= 10;
    }
    value == 1
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [logging]
        level = "debug"
        format = "json"

        [reconnection]
        initial_delay_ms = 500

        [storage]
        log_dir = "/tmp/tradeline/logs"
        limiter_state = "/tmp/tradeline/limits.json"

        [exchanges.bitflyer]
        address = "wss://ws.lightstream.bitflyer.com/json-rpc"
        ack_timeout_ms = 5000

        [exchanges.bitflyer.limit]
        permits = 500
        refresh_ms = 300000
        persist = true

        [exchanges.coincheck]
        address = "wss://ws-api.coincheck.com"
        padding = 1000
        no_server_reply = true
    "#;

    #[test]
    fn parses_full_sample() {
        let config = Config::parse_toml(SAMPLE).unwrap();

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.reconnection.initial_delay_ms, 500);
        assert_eq!(config.reconnection.max_delay_ms, 60000);
        assert_eq!(config.exchanges.len(), 2);

        let bitflyer = config.exchange("bitflyer").unwrap();
        assert_eq!(bitflyer.padding, 100_000);
        assert_eq!(bitflyer.ack_timeout_ms, 5000);
        assert_eq!(bitflyer.max_ack_attempts, 3);
        let limit = bitflyer.limit.as_ref().unwrap();
        assert_eq!(limit.permits, 500);
        assert!(limit.persist);

        let coincheck = config.exchange("coincheck").unwrap();
        assert!(coincheck.no_server_reply);
        assert!(coincheck.limit.is_none());
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::parse_toml("").unwrap();
        assert_eq!(config.logging.format, "pretty");
        assert!(config.exchanges.is_empty());
    }

    #[test]
    fn unknown_exchange_is_an_error() {
        let config = Config::parse_toml("").unwrap();
        assert!(config.exchange("kraken").is_err());
    }

    #[test]
    fn rejects_http_address() {
        let toml = r#"
            [exchanges.x]
            address = "https://example.com"
        "#;
        assert!(Config::parse_toml(toml).is_err());
    }

    #[test]
    fn rejects_padding_that_is_not_power_of_ten() {
        let toml = r#"
            [exchanges.x]
            address = "wss://example.com"
            padding = 250
        "#;
        assert!(Config::parse_toml(toml).is_err());
    }

    #[test]
    fn rejects_padding_that_overflows_ids() {
        let toml = r#"
            [exchanges.x]
            address = "wss://example.com"
            padding = 100000000
        "#;
        let err = Config::parse_toml(toml).unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Config(ConfigError::InvalidValue { field: "padding", .. })
        ));

        let toml = r#"
            [exchanges.x]
            address = "wss://example.com"
            padding = 1000000
        "#;
        assert!(Config::parse_toml(toml).is_ok());
    }

    #[test]
    fn rejects_zero_permits() {
        let toml = r#"
            [exchanges.x]
            address = "wss://example.com"
            [exchanges.x.limit]
            permits = 0
            refresh_ms = 1000
        "#;
        assert!(Config::parse_toml(toml).is_err());
    }

    #[test]
    fn rejects_unknown_log_format() {
        let toml = r#"
            [logging]
            format = "xml"
        "#;
        assert!(Config::parse_toml(toml).is_err());
    }

    #[test]
    fn power_of_ten_detection() {
        assert!(is_power_of_ten(10));
        assert!(is_power_of_ten(100_000));
        assert!(!is_power_of_ten(1));
        assert!(!is_power_of_ten(0));
        assert!(!is_power_of_ten(110));
    }
}
