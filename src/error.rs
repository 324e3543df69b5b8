use thiserror::Error;

use crate::domain::error::DomainError;

/// Configuration-related errors with structured variants.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("unknown exchange: {0}")]
    UnknownExchange(String),

    #[error("failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),
}

/// Subscription channel errors surfaced to the affected topic's stream.
///
/// `Clone` because one failure fans out to every subscriber of a topic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The circuit breaker paused reconnection. The stream stays open.
    #[error("transport failure on {address}: {reason}")]
    Transport { address: String, reason: String },

    #[error("no acknowledgement for topic '{key}' after {attempts} attempts")]
    Protocol { key: String, attempts: u32 },

    #[error("topic '{key}' rejected by server: {message}")]
    FatalSubscription { key: String, message: String },

    #[error("invalid topic: {0}")]
    InvalidTopic(String),

    #[error("channel closed")]
    Closed,
}

/// Execution log codec errors.
///
/// A bad row corrupts every row after it, so decoding stops at the first one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("line {line}: expected 7 fields, found {found}")]
    MalformedRecord { line: usize, found: usize },

    #[error("line {line}: invalid {field} '{value}'")]
    InvalidNumber {
        line: usize,
        field: &'static str,
        value: String,
    },

    #[error("line {line}: {source}")]
    InvalidMark {
        line: usize,
        #[source]
        source: DomainError,
    },

    #[error("size {0} is not a multiple of 0.01")]
    InexactSize(rust_decimal::Decimal),

    #[error("tag '{0}' must be non-empty and contain no whitespace")]
    InvalidTag(String),

    #[error("unrecognised log file extension: {0}")]
    UnknownFormat(String),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("REST call failed with status {status}: {body}")]
    Rest { status: u16, body: String },

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("exchange under maintenance: {0}")]
    Maintenance(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("connection error: {0}")]
    Connection(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::WebSocket(Box::new(err))
    }
}
