use crate::caller::CallSite;
use crate::hook::{is_dispatch_thread, GelfHook};
use crate::record::{FieldValue, LogEvent, Severity};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::field::{Field, Visit};
use tracing::{debug, Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// Targets of this crate's own diagnostics; never fed back into the hook.
const OWN_TARGET: &str = env!("CARGO_CRATE_NAME");

/// `tracing_subscriber` layer that turns events into [`LogEvent`]s and
/// hands them to a [`GelfHook`].
///
/// With a queued hook the layer never blocks on the network: everything
/// past the queue runs on the hook's worker. Records bridged from the `log`
/// crate keep their original file and line.
pub struct GelfLayer {
    hook: GelfHook,
}

impl GelfLayer {
    pub fn new(hook: GelfHook) -> Self {
        Self { hook }
    }

    pub fn hook(&self) -> &GelfHook {
        &self.hook
    }
}

impl<S> Layer<S> for GelfLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        // Events from the delivery path itself (this crate, or the
        // transport's instrumentation on a dispatching thread) would loop.
        if is_dispatch_thread() {
            return;
        }
        let meta = event.metadata();
        if meta.target().starts_with(OWN_TARGET) {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let mut frames = Vec::with_capacity(2);
        if let (Some(file), Some(line)) = (visitor.log_file.take(), visitor.log_line) {
            frames.push(CallSite::new(file, line));
        }
        if let (Some(file), Some(line)) = (meta.file(), meta.line()) {
            frames.push(CallSite::new(file, line));
        }

        let mut log_event = LogEvent::new(
            Severity::from(*meta.level()),
            visitor.message.unwrap_or_default(),
        );
        log_event.fields = visitor.fields;

        if let Err(err) = self.hook.enqueue_from(&log_event, frames) {
            debug!(error = %err, "GELF layer could not queue event");
        }
    }
}

/// Collects the fields of one event.
///
/// `message` becomes the message text, errors are classified through
/// [`FieldValue::from_error`], and the `log.*` metadata added by
/// `tracing-log` is consumed rather than shipped.
#[derive(Default)]
pub struct FieldVisitor {
    pub fields: BTreeMap<String, FieldValue>,
    pub message: Option<String>,
    log_file: Option<String>,
    log_line: Option<u32>,
}

impl FieldVisitor {
    fn insert(&mut self, field: &Field, value: Value) {
        self.fields
            .insert(field.name().to_string(), FieldValue::Plain(value));
    }
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = Some(value.to_string()),
            "log.file" => self.log_file = Some(value.to_string()),
            "log.target" | "log.module_path" => {}
            _ => self.insert(field, Value::String(value.to_string())),
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        if field.name() == "log.line" {
            self.log_line = u32::try_from(value).ok();
            return;
        }
        self.insert(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::from(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.fields
            .insert(field.name().to_string(), FieldValue::from_error(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        match field.name() {
            "message" => self.message = Some(format!("{value:?}")),
            "log.target" | "log.module_path" | "log.file" => {}
            _ => self.insert(field, Value::String(format!("{value:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HookConfig;
    use crate::enrich::TracedError;
    use crate::memory_sink::MemorySink;
    use std::sync::Arc;
    use tracing_subscriber::layer::SubscriberExt;

    fn capture(config: HookConfig, emit: impl FnOnce()) -> Vec<crate::message::GelfMessage> {
        let sink = MemorySink::new();
        let hook = GelfHook::new(Arc::new(sink.clone()), config).unwrap();
        let subscriber = tracing_subscriber::registry().with(GelfLayer::new(hook.clone()));
        tracing::subscriber::with_default(subscriber, emit);
        hook.flush();
        sink.take()
    }

    #[test]
    fn converts_fields_and_message() {
        let messages = capture(HookConfig::default(), || {
            tracing::warn!(user_id = 42u64, ratio = 0.5, ok = false, name = "alice", "login failed");
        });

        assert_eq!(messages.len(), 1);
        let m = &messages[0];
        assert_eq!(m.short_message, "login failed");
        assert_eq!(m.level, 4);
        assert_eq!(m.extra["_user_id"], 42);
        assert_eq!(m.extra["_ratio"], 0.5);
        assert_eq!(m.extra["_ok"], false);
        assert_eq!(m.extra["_name"], "alice");
        assert!(m.file.ends_with("layer.rs"));
        assert!(m.line > 0);
    }

    #[test]
    fn formatted_messages_are_rendered() {
        let messages = capture(HookConfig::default(), || {
            let attempt = 3;
            tracing::info!("retry {attempt}\nwith details");
        });
        assert_eq!(messages[0].short_message, "retry 3");
        assert_eq!(messages[0].full_message, "retry 3\nwith details");
    }

    #[test]
    fn error_fields_carry_their_trace() {
        let messages = capture(HookConfig::default(), || {
            let err = TracedError::new("disk full");
            tracing::error!(error = &err as &(dyn std::error::Error + 'static), "write failed");
        });

        let m = &messages[0];
        assert_eq!(m.extra["_error"], "disk full");
        assert!(m.extra["_stacktrace"].as_str().unwrap().contains("layer.rs"));
        assert!(m.file.ends_with("layer.rs"));
    }

    #[test]
    fn own_diagnostics_are_skipped() {
        let messages = capture(HookConfig::default(), || {
            tracing::warn!(target: "tracing_gelf_sink::hook", "internal");
            tracing::warn!("external");
        });
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].short_message, "external");
    }

    /// Emits its own tracing event per send, as an instrumented HTTP
    /// client does.
    struct InstrumentedSink(MemorySink);

    #[async_trait::async_trait]
    impl crate::sink::LogSink for InstrumentedSink {
        async fn send(
            &self,
            message: &crate::message::GelfMessage,
        ) -> Result<(), crate::error::GelfError> {
            tracing::debug!(target: "hyper::client", "connection reused");
            self.0.send(message).await
        }
    }

    #[test]
    fn transport_events_do_not_loop_back() {
        let recorded = MemorySink::new();
        let hook = GelfHook::new(
            Arc::new(InstrumentedSink(recorded.clone())),
            HookConfig::default().with_synchronous(true),
        )
        .unwrap();
        let subscriber = tracing_subscriber::registry().with(GelfLayer::new(hook.clone()));
        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!("one call");
        });
        hook.flush();

        let messages = recorded.take();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].short_message, "one call");
    }
}
