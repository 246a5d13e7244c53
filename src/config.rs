use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use crate::caller::CallerFilter;
use crate::compression::{CompressionType, DEFAULT_COMPRESSION_LEVEL};
use crate::env;
use crate::error::ConfigError;
use crate::record::Severity;

pub const DEFAULT_QUEUE_CAPACITY: usize = 8192;
pub const DEFAULT_ENQUEUE_TIMEOUT: Duration = Duration::from_secs(1);

/// Dispatch hook configuration.
///
/// **Fields**
/// - `extra`: static fields added to every message (without the `_`
///   prefix). Event fields with the same name take precedence.
/// - `host`: value of the GELF `host` field.
/// - `level`: least severe level that is still shipped.
/// - `blacklist`: field names that are never shipped, neither as static
///   extras, event fields, nor derived fields such as the stack trace.
/// - `queue_capacity`: bound of the dispatch queue.
/// - `compression` / `compression_level`: UDP payload encoding, used when
///   the hook builds its own sink from a DSN.
/// - `enqueue_timeout`: how long a caller may wait for queue space before
///   the entry is dropped.
/// - `caller_filter`: source-path suffixes skipped when resolving the call
///   site.
/// - `synchronous`: render and send on the logging thread, returning the
///   transport error to the caller, instead of queueing for the worker.
#[derive(Clone, Debug)]
pub struct HookConfig {
    pub extra: BTreeMap<String, Value>,
    pub host: String,
    pub level: Severity,
    pub blacklist: BTreeSet<String>,
    pub queue_capacity: usize,
    pub compression: CompressionType,
    pub compression_level: u32,
    pub enqueue_timeout: Duration,
    pub caller_filter: CallerFilter,
    pub synchronous: bool,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            extra: BTreeMap::new(),
            host: env::default_host(),
            level: Severity::Debug,
            blacklist: BTreeSet::new(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            compression: CompressionType::default(),
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            enqueue_timeout: DEFAULT_ENQUEUE_TIMEOUT,
            caller_filter: CallerFilter::default(),
            synchronous: false,
        }
    }
}

impl HookConfig {
    /// Defaults overlaid with the `GELF_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        env::overlay(Self::default(), |key| std::env::var(key).ok())
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_level(mut self, level: Severity) -> Self {
        self.level = level;
        self
    }

    pub fn with_blacklist<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.blacklist.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_compression(mut self, compression: CompressionType, level: u32) -> Self {
        self.compression = compression;
        self.compression_level = level;
        self
    }

    pub fn with_enqueue_timeout(mut self, timeout: Duration) -> Self {
        self.enqueue_timeout = timeout;
        self
    }

    pub fn with_caller_filter(mut self, filter: CallerFilter) -> Self {
        self.caller_filter = filter;
        self
    }

    pub fn with_synchronous(mut self, synchronous: bool) -> Self {
        self.synchronous = synchronous;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_accumulate() {
        let config = HookConfig::default()
            .with_extra("a", 1)
            .with_extra("b", "two")
            .with_blacklist(["x"])
            .with_blacklist(vec!["y".to_string()])
            .with_level(Severity::Warn)
            .with_compression(CompressionType::Zlib, 9);

        assert_eq!(config.extra.len(), 2);
        assert!(config.blacklist.contains("x") && config.blacklist.contains("y"));
        assert_eq!(config.level, Severity::Warn);
        assert_eq!(config.compression, CompressionType::Zlib);
        assert_eq!(config.compression_level, 9);
    }
}
