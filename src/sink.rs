use crate::error::GelfError;
use crate::message::GelfMessage;
use async_trait::async_trait;

/// Asynchronous destination for rendered [`GelfMessage`]s.
///
/// Implementations transport messages to a concrete endpoint (Graylog over
/// UDP or HTTP, an in-memory buffer in tests, ...). The dispatch hook calls
/// `send` from its background worker and never awaits it on the
/// application thread.
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Deliver a single message.
    ///
    /// **Returns**
    /// - `Ok(())` once the message was handed to the transport.
    /// - `Err(..)` on socket, HTTP or serialization failure. The worker
    ///   reports the failure and moves on to the next entry; the message is
    ///   not retried.
    async fn send(&self, message: &GelfMessage) -> Result<(), GelfError>;

    /// Flush any buffered messages, if the transport buffers.
    ///
    /// Called once by the worker after the queue has drained. Default
    /// implementation is a no-op.
    async fn flush(&self) -> Result<(), GelfError> {
        Ok(())
    }
}
