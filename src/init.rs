use crate::config::HookConfig;
use crate::error::GelfError;
use crate::hook::GelfHook;
use crate::layer::GelfLayer;
use crate::sink::LogSink;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

/// Logging setup options.
///
/// **Fields**
/// - `hook`: [`HookConfig`] controlling rendering, filtering and queueing.
/// - `enable_stdout`: if `true`, a `tracing_subscriber::fmt::Layer` is
///   installed next to [`GelfLayer`] so events are also printed to the
///   console. This is also where the crate's own diagnostics show up.
#[derive(Clone, Debug)]
pub struct LayerConfig {
    pub hook: HookConfig,
    pub enable_stdout: bool,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            hook: HookConfig::default(),
            enable_stdout: true,
        }
    }
}

/// Initialize global `tracing` subscriber using the provided sink and
/// [`LayerConfig`].
///
/// **Parameters**
/// - `sink`: implementation of [`LogSink`] that will receive rendered
///   GELF messages.
/// - `config`: [`LayerConfig`] controlling the hook and console output.
///
/// **Returns**
///
/// The running [`GelfHook`]. Keep it and call [`GelfHook::flush`] before
/// exiting so queued messages are delivered.
///
/// **Errors**
///
/// Fails if the worker cannot be started or a global subscriber is
/// already installed.
pub fn init_tracing_with_config(
    sink: Arc<dyn LogSink>,
    config: LayerConfig,
) -> Result<GelfHook, GelfError> {
    let hook = GelfHook::new(sink, config.hook)?;
    let layer = GelfLayer::new(hook.clone());

    // `fmt` is optional; the two subscriber shapes have different types.
    if config.enable_stdout {
        let fmt_layer = tracing_subscriber::fmt::layer();
        let subscriber = Registry::default().with(layer).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = Registry::default().with(layer);
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(hook)
}

/// Initialize tracing with sensible defaults.
///
/// Equivalent to calling [`init_tracing_with_config`] with
/// [`LayerConfig::default`].
pub fn init_tracing(sink: Arc<dyn LogSink>) -> Result<GelfHook, GelfError> {
    init_tracing_with_config(sink, LayerConfig::default())
}
