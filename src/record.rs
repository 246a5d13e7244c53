use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::caller::CallSite;
use crate::enrich::StackTrace;
use crate::error::ConfigError;

/// Field name under which [`LogEvent::with_error`] stores the event error.
pub const ERROR_KEY: &str = "error";

/// Event severity. Lower discriminants are more severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Severity {
    Panic = 0,
    Fatal = 1,
    Error = 2,
    Warn = 3,
    Info = 4,
    Debug = 5,
    Trace = 6,
}

impl Severity {
    pub const ALL: [Severity; 7] = [
        Severity::Panic,
        Severity::Fatal,
        Severity::Error,
        Severity::Warn,
        Severity::Info,
        Severity::Debug,
        Severity::Trace,
    ];

    /// Syslog level used for the GELF `level` field.
    pub fn to_syslog(self) -> u8 {
        match self {
            Severity::Panic => 1,
            Severity::Fatal => 2,
            Severity::Error => 3,
            Severity::Warn => 4,
            Severity::Info => 6,
            Severity::Debug | Severity::Trace => 7,
        }
    }

    /// Whether `self` is at least as severe as `threshold`.
    pub fn is_at_least(self, threshold: Severity) -> bool {
        self <= threshold
    }
}

impl From<tracing::Level> for Severity {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::ERROR => Severity::Error,
            tracing::Level::WARN => Severity::Warn,
            tracing::Level::INFO => Severity::Info,
            tracing::Level::DEBUG => Severity::Debug,
            tracing::Level::TRACE => Severity::Trace,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Panic => "panic",
            Severity::Fatal => "fatal",
            Severity::Error => "error",
            Severity::Warn => "warn",
            Severity::Info => "info",
            Severity::Debug => "debug",
            Severity::Trace => "trace",
        };
        f.write_str(name)
    }
}

impl FromStr for Severity {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "panic" => Ok(Severity::Panic),
            "fatal" => Ok(Severity::Fatal),
            "error" => Ok(Severity::Error),
            "warn" | "warning" => Ok(Severity::Warn),
            "info" => Ok(Severity::Info),
            "debug" => Ok(Severity::Debug),
            "trace" => Ok(Severity::Trace),
            _ => Err(ConfigError::InvalidValue {
                key: "level",
                value: s.to_string(),
            }),
        }
    }
}

/// Value attached to an event field.
///
/// Errors are classified once, when the field is captured, so the worker
/// never has to inspect error types again.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Any value with a native JSON representation.
    Plain(Value),
    /// An error rendered through its `Display` text.
    Error { message: String },
    /// An error whose cause chain carried a stack trace.
    TracedError { message: String, trace: StackTrace },
}

impl FieldValue {
    /// JSON form emitted as the additional field value.
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Plain(value) => value.clone(),
            FieldValue::Error { message } | FieldValue::TracedError { message, .. } => {
                Value::String(message.clone())
            }
        }
    }

    pub fn stack_trace(&self) -> Option<&StackTrace> {
        match self {
            FieldValue::TracedError { trace, .. } => Some(trace),
            _ => None,
        }
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        FieldValue::Plain(value)
    }
}

macro_rules! plain_from {
    ($($ty:ty),*) => {
        $(impl From<$ty> for FieldValue {
            fn from(value: $ty) -> Self {
                FieldValue::Plain(Value::from(value))
            }
        })*
    };
}

plain_from!(&str, String, bool, i64, u64, i32, u32, f64);

/// A log event handed over by the logging framework.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    pub severity: Severity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub fields: BTreeMap<String, FieldValue>,
}

impl LogEvent {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            timestamp: Utc::now(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Attach an error under [`ERROR_KEY`].
    pub fn with_error(mut self, err: &(dyn std::error::Error + 'static)) -> Self {
        self.fields
            .insert(ERROR_KEY.to_string(), FieldValue::from_error(err));
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Entry travelling through the dispatch queue: an event snapshot plus the
/// call site captured on the logging thread.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub severity: Severity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub fields: BTreeMap<String, FieldValue>,
    pub call_site: Option<CallSite>,
}

impl LogRecord {
    /// Snapshot `event`, cloning its fields so the caller may reuse it.
    pub fn capture(event: &LogEvent, call_site: Option<CallSite>) -> Self {
        Self {
            severity: event.severity,
            message: event.message.clone(),
            timestamp: event.timestamp,
            fields: event.fields.clone(),
            call_site,
        }
    }
}
