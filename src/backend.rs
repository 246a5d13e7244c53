use std::sync::Arc;

use crate::config::HookConfig;
use crate::error::ConfigError;
use crate::sink::LogSink;
use crate::udp::{UdpConfig, UdpSink};

/// Transports that can be selected via DSN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Udp,
    Http,
}

/// Destination parsed from a DSN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// Selected transport.
    pub kind: BackendKind,
    /// `host:port` for UDP, the full URL for HTTP.
    pub target: String,
}

impl BackendConfig {
    pub fn new(kind: BackendKind, target: impl Into<String>) -> Self {
        BackendConfig {
            kind,
            target: target.into(),
        }
    }
}

/// Parse a DSN string and infer the transport from its scheme.
///
/// Examples:
/// - "udp://graylog.internal:12201"
/// - "graylog.internal:12201" (UDP)
/// - "http://graylog.internal:12201/gelf"
/// - "https://graylog.internal/gelf"
pub fn parse_dsn(dsn: &str) -> Result<BackendConfig, ConfigError> {
    let dsn = dsn.trim();
    if dsn.is_empty() {
        return Err(ConfigError::MissingTransport);
    }
    let lower = dsn.to_ascii_lowercase();

    if lower.starts_with("udp://") {
        let target = &dsn["udp://".len()..];
        let target = target.trim_end_matches('/');
        if target.is_empty() {
            return Err(ConfigError::MissingTransport);
        }
        Ok(BackendConfig::new(BackendKind::Udp, target))
    } else if lower.starts_with("http://") || lower.starts_with("https://") {
        Ok(BackendConfig::new(BackendKind::Http, dsn))
    } else if let Some((scheme, _)) = dsn.split_once("://") {
        Err(ConfigError::UnknownScheme(scheme.to_string()))
    } else {
        Ok(BackendConfig::new(BackendKind::Udp, dsn))
    }
}

/// Create a concrete `LogSink` implementation from a `BackendConfig`.
///
/// UDP sinks take their compression settings from `hook`; HTTP always
/// sends plain JSON.
pub fn make_sink_from_config(
    cfg: &BackendConfig,
    hook: &HookConfig,
) -> Result<Arc<dyn LogSink>, ConfigError> {
    match cfg.kind {
        BackendKind::Udp => {
            let config = UdpConfig {
                compression: hook.compression,
                compression_level: hook.compression_level,
                ..UdpConfig::default()
            };
            let sink = UdpSink::new(&cfg.target, config)?;
            Ok(Arc::new(sink) as Arc<dyn LogSink>)
        }
        BackendKind::Http => {
            #[cfg(feature = "http")]
            {
                use crate::http::{HttpConfig, HttpSink};

                let sink = HttpSink::new(HttpConfig::new(cfg.target.clone()))?;
                Ok(Arc::new(sink) as Arc<dyn LogSink>)
            }

            #[cfg(not(feature = "http"))]
            {
                let _ = cfg;
                Err(ConfigError::HttpFeatureDisabled)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_supported_schemes() {
        assert_eq!(
            parse_dsn("udp://127.0.0.1:12201").unwrap(),
            BackendConfig::new(BackendKind::Udp, "127.0.0.1:12201")
        );
        assert_eq!(
            parse_dsn("127.0.0.1:12201").unwrap(),
            BackendConfig::new(BackendKind::Udp, "127.0.0.1:12201")
        );
        assert_eq!(
            parse_dsn("HTTPS://graylog/gelf").unwrap().kind,
            BackendKind::Http
        );
    }

    #[test]
    fn rejects_missing_and_unknown_transports() {
        assert!(matches!(parse_dsn(""), Err(ConfigError::MissingTransport)));
        assert!(matches!(parse_dsn("udp://"), Err(ConfigError::MissingTransport)));
        assert!(matches!(
            parse_dsn("tcp://127.0.0.1:12201"),
            Err(ConfigError::UnknownScheme(scheme)) if scheme == "tcp"
        ));
    }

    #[test]
    fn builds_udp_sink_with_hook_compression() {
        let cfg = parse_dsn("udp://127.0.0.1:12201").unwrap();
        let hook = HookConfig::default().with_compression(crate::compression::CompressionType::Zlib, 5);
        assert!(make_sink_from_config(&cfg, &hook).is_ok());
    }

    #[test]
    fn invalid_compression_level_fails_at_construction() {
        let cfg = parse_dsn("udp://127.0.0.1:12201").unwrap();
        let hook = HookConfig::default().with_compression(crate::compression::CompressionType::Gzip, 12);
        assert!(matches!(
            make_sink_from_config(&cfg, &hook),
            Err(ConfigError::InvalidCompressionLevel(12))
        ));
    }
}
