use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::config::HookConfig;
use crate::enrich::StackTrace;
use crate::record::{LogRecord, ERROR_KEY};

pub const GELF_VERSION: &str = "1.1";

/// Additional field carrying the rendered stack trace of an error field.
pub const STACKTRACE_KEY: &str = "stacktrace";

/// GELF 1.1 payload as sent on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GelfMessage {
    pub version: String,
    pub host: String,
    pub short_message: String,
    #[serde(default)]
    pub full_message: String,
    pub timestamp: f64,
    pub level: u8,
    #[serde(default)]
    pub file: String,
    #[serde(default)]
    pub line: u32,
    /// Additional fields, keys already `_`-prefixed.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Split a message into GELF `short_message` / `full_message`.
///
/// Surrounding whitespace is dropped. Multi-line text keeps its first line
/// as the short form and the whole text as the full form; single-line text
/// has an empty full form.
pub fn split_message(text: &str) -> (String, String) {
    let text = text.trim();
    match text.find('\n') {
        Some(idx) if idx > 0 => (text[..idx].to_string(), text.to_string()),
        _ => (text.to_string(), String::new()),
    }
}

/// Turns dispatch entries into [`GelfMessage`]s.
///
/// Static extra fields are merged first and per-event fields second, so an
/// event field overrides a static one with the same name.
#[derive(Debug, Clone)]
pub struct Renderer {
    host: String,
    extra: BTreeMap<String, Value>,
    blacklist: BTreeSet<String>,
}

impl Renderer {
    pub fn new(config: &HookConfig) -> Self {
        Self {
            host: config.host.clone(),
            extra: config.extra.clone(),
            blacklist: config.blacklist.clone(),
        }
    }

    fn is_blocked(&self, key: &str) -> bool {
        self.blacklist.contains(key) || self.blacklist.contains(key.trim_start_matches('_'))
    }

    pub fn render(&self, record: &LogRecord) -> GelfMessage {
        let (short_message, full_message) = split_message(&record.message);
        let (mut file, mut line) = record
            .call_site
            .as_ref()
            .map(|site| (site.file.clone(), site.line))
            .unwrap_or_default();

        let mut extra = BTreeMap::new();
        for (key, value) in &self.extra {
            if !self.is_blocked(key) {
                extra.insert(format!("_{key}"), value.clone());
            }
        }

        let mut trace: Option<(&str, &StackTrace)> = None;
        for (key, value) in &record.fields {
            if self.is_blocked(key) {
                continue;
            }
            if let Some(found) = value.stack_trace() {
                // The conventional error field wins over any other traced field.
                if trace.is_none() || key == ERROR_KEY {
                    trace = Some((key.as_str(), found));
                }
            }
            extra.insert(format!("_{key}"), value.to_json());
        }

        if let Some((_, trace)) = trace {
            // An explicit `stacktrace` field is kept as given.
            let stacktrace_key = format!("_{STACKTRACE_KEY}");
            if !self.is_blocked(STACKTRACE_KEY) && !extra.contains_key(&stacktrace_key) {
                extra.insert(stacktrace_key, Value::String(trace.to_string()));
            }
            if let Some(origin) = trace.innermost() {
                if !origin.file.is_empty() && origin.line != 0 {
                    file = origin.file.clone();
                    line = origin.line;
                }
            }
        }

        GelfMessage {
            version: GELF_VERSION.to_string(),
            host: self.host.clone(),
            short_message,
            full_message,
            timestamp: record.timestamp.timestamp_millis() as f64 / 1000.0,
            level: record.severity.to_syslog(),
            file,
            line,
            extra,
        }
    }
}
