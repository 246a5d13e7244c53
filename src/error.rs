//! Error types for sink construction and message delivery.

use std::time::Duration;

/// Errors raised while building a hook, pool or sink.
///
/// These are fatal: they are returned once from the constructor and never
/// deferred to the per-message path.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("unknown compression type: {0}")]
    UnknownCompression(String),

    #[error("compression level {0} is out of range (0..=9)")]
    InvalidCompressionLevel(u32),

    #[error("no transport configured")]
    MissingTransport,

    #[error("unknown or unsupported DSN scheme: {0}")]
    UnknownScheme(String),

    #[error("chunk size {0} leaves no room for payload after the 12-byte header")]
    ChunkSizeTooSmall(usize),

    #[error("invalid address {addr}: {source}")]
    InvalidAddress {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },

    #[error("http transport feature is not enabled")]
    HttpFeatureDisabled,

    #[cfg(feature = "http")]
    #[error("failed to build http client: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error("failed to start background worker: {0}")]
    Worker(#[source] std::io::Error),
}

/// Errors raised on the delivery path or by the hook lifecycle.
#[derive(thiserror::Error, Debug)]
pub enum GelfError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Socket or compression failure while writing a message.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "http")]
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("GELF endpoint responded with status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload would need more chunks than the protocol allows.
    #[error("message needs {chunks} chunks, the limit is {max}")]
    MessageTooLarge { chunks: usize, max: usize },

    #[error("queue full, entry dropped after waiting {0:?}")]
    QueueTimeout(Duration),

    #[error("hook is closed to new entries")]
    Closed,

    #[error("malformed chunk: {0}")]
    MalformedChunk(&'static str),

    #[error("failed to install global subscriber: {0}")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}
