//! GELF log shipping for `tracing`.
//!
//! Events are captured by [`GelfLayer`](layer::GelfLayer) (or queued
//! directly through [`GelfHook`](hook::GelfHook)), rendered as GELF 1.1
//! JSON on a background worker, and sent over chunked, optionally
//! compressed UDP or HTTP. [`UdpReader`](reader::UdpReader) is the
//! receiving side, mainly for tests and local tooling.

pub mod error;
pub mod record;
pub mod message;
pub mod enrich;
pub mod caller;
pub mod compression;
pub mod sink;
pub mod udp;
pub mod reader;

#[cfg(feature = "http")]
pub mod http;

pub mod memory_sink;
pub mod config;
pub mod hook;
pub mod layer;
pub mod init;
pub mod backend;
pub mod env;

pub use config::HookConfig;
pub use enrich::TracedError;
pub use error::{ConfigError, GelfError};
pub use hook::{GelfHook, HookState};
pub use layer::GelfLayer;
pub use message::GelfMessage;
pub use record::{LogEvent, Severity};
pub use sink::LogSink;
