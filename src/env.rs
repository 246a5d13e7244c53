//! Environment variable names used by this crate for convenient
//! configuration of the hook from services.
//!
//! These are purely helpers; the core types remain decoupled from
//! environment access.

use std::time::Duration;

use crate::config::HookConfig;
use crate::error::ConfigError;

/// GELF destination DSN, e.g. `udp://graylog:12201` or `http://graylog:12201/gelf`.
pub const GELF_ADDRESS_ENV: &str = "GELF_ADDRESS";

/// Value for the GELF `host` field.
pub const GELF_HOST_ENV: &str = "GELF_HOST";

/// Minimum shipped level (`error`, `warn`, `info`, ...).
pub const GELF_LEVEL_ENV: &str = "GELF_LEVEL";

/// `gzip`, `zlib` or `none`.
pub const GELF_COMPRESSION_ENV: &str = "GELF_COMPRESSION";

/// Compression level, 0..=9.
pub const GELF_COMPRESSION_LEVEL_ENV: &str = "GELF_COMPRESSION_LEVEL";

/// Dispatch queue bound.
pub const GELF_QUEUE_CAPACITY_ENV: &str = "GELF_QUEUE_CAPACITY";

/// Milliseconds a caller may wait for queue space.
pub const GELF_ENQUEUE_TIMEOUT_MS_ENV: &str = "GELF_ENQUEUE_TIMEOUT_MS";

/// Comma-separated field names never shipped.
pub const GELF_BLACKLIST_ENV: &str = "GELF_BLACKLIST";

/// `true` sends on the logging thread instead of through the queue.
pub const GELF_SYNCHRONOUS_ENV: &str = "GELF_SYNCHRONOUS";

/// Host name reported when none is configured.
pub fn default_host() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|host| !host.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

fn parse<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { key, value })
}

/// Apply every variable `lookup` knows about on top of `config`.
pub fn overlay<F>(mut config: HookConfig, lookup: F) -> Result<HookConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = lookup(GELF_HOST_ENV) {
        config.host = host;
    }
    if let Some(level) = lookup(GELF_LEVEL_ENV) {
        config.level = level.parse()?;
    }
    if let Some(compression) = lookup(GELF_COMPRESSION_ENV) {
        config.compression = compression.parse()?;
    }
    if let Some(level) = lookup(GELF_COMPRESSION_LEVEL_ENV) {
        config.compression_level = parse(GELF_COMPRESSION_LEVEL_ENV, level)?;
    }
    if let Some(capacity) = lookup(GELF_QUEUE_CAPACITY_ENV) {
        config.queue_capacity = parse(GELF_QUEUE_CAPACITY_ENV, capacity)?;
    }
    if let Some(millis) = lookup(GELF_ENQUEUE_TIMEOUT_MS_ENV) {
        config.enqueue_timeout = Duration::from_millis(parse(GELF_ENQUEUE_TIMEOUT_MS_ENV, millis)?);
    }
    if let Some(flag) = lookup(GELF_SYNCHRONOUS_ENV) {
        config.synchronous = parse(GELF_SYNCHRONOUS_ENV, flag)?;
    }
    if let Some(list) = lookup(GELF_BLACKLIST_ENV) {
        config = config.with_blacklist(
            list.split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string),
        );
    }
    Ok(config)
}
