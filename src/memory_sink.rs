use crate::error::GelfError;
use crate::message::GelfMessage;
use crate::sink::LogSink;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

/// A sink that keeps every message in memory.
///
/// Useful for asserting on rendered output in tests and for measuring the
/// overhead of the hook itself without any network I/O. Clones share the
/// same buffer.
#[derive(Clone, Default)]
pub struct MemorySink {
    messages: Arc<Mutex<Vec<GelfMessage>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<GelfMessage> {
        self.messages.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }

    pub fn take(&self) -> Vec<GelfMessage> {
        std::mem::take(&mut *self.messages.lock())
    }
}

#[async_trait]
impl LogSink for MemorySink {
    async fn send(&self, message: &GelfMessage) -> Result<(), GelfError> {
        self.messages.lock().push(message.clone());
        Ok(())
    }
}
