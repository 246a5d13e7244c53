//! Error enrichment: textual rendering of error fields and stack-trace
//! discovery along `source()` chains.
//!
//! Errors carry no serializer of their own, so every error field is emitted
//! as its `Display` text. A [`TracedError`] anywhere in the cause chain
//! contributes a [`Frame`] recording where it was created or wrapped; the
//! collected frames form the [`StackTrace`] attached to the GELF message.

use serde::Serialize;
use std::error::Error;
use std::fmt;
use std::panic::Location;

use crate::record::FieldValue;

/// Upper bound on `source()` hops; guards against cyclic wrapping.
pub const MAX_CAUSE_DEPTH: usize = 64;

/// One recorded location in an error's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Frame {
    pub label: String,
    pub file: String,
    pub line: u32,
}

/// Frames ordered innermost (creation site) first.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct StackTrace {
    frames: Vec<Frame>,
}

impl StackTrace {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self { frames }
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// The frame where the error originated.
    pub fn innermost(&self) -> Option<&Frame> {
        self.frames.first()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl fmt::Display for StackTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for frame in &self.frames {
            write!(f, "\n{}\n\t{}:{}", frame.label, frame.file, frame.line)?;
        }
        Ok(())
    }
}

/// Error that remembers the source location where it was built.
///
/// ```
/// use tracing_gelf_sink::enrich::{extract_stack_trace, TracedError};
///
/// let err = TracedError::new("disk full");
/// let trace = extract_stack_trace(&err).unwrap();
/// assert_eq!(trace.innermost().unwrap().line, err.location().line());
/// ```
#[derive(Debug)]
pub struct TracedError {
    message: String,
    location: &'static Location<'static>,
    source: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl TracedError {
    #[track_caller]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            location: Location::caller(),
            source: None,
        }
    }

    /// Wrap `source`, recording the wrap site as an outer frame.
    #[track_caller]
    pub fn wrap<E>(source: E, message: impl Into<String>) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self {
            message: message.into(),
            location: Location::caller(),
            source: Some(Box::new(source)),
        }
    }

    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }

    fn frame(&self) -> Frame {
        Frame {
            label: self.message.clone(),
            file: self.location.file().to_string(),
            line: self.location.line(),
        }
    }
}

impl fmt::Display for TracedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{}: {}", self.message, source),
            None => f.write_str(&self.message),
        }
    }
}

impl Error for TracedError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn Error + 'static))
    }
}

/// Walk `err` and its causes, collecting a frame for every [`TracedError`].
///
/// Returns `None` when no link in the chain carries location data.
pub fn extract_stack_trace(err: &(dyn Error + 'static)) -> Option<StackTrace> {
    let mut frames = Vec::new();
    let mut current = Some(err);
    for _ in 0..MAX_CAUSE_DEPTH {
        let Some(link) = current else { break };
        if let Some(traced) = link.downcast_ref::<TracedError>() {
            frames.push(traced.frame());
        }
        current = link.source();
    }
    if frames.is_empty() {
        return None;
    }
    // Collected outermost first.
    frames.reverse();
    Some(StackTrace::new(frames))
}

impl FieldValue {
    /// Classify an error field once, at capture time.
    pub fn from_error(err: &(dyn Error + 'static)) -> Self {
        let message = err.to_string();
        match extract_stack_trace(err) {
            Some(trace) => FieldValue::TracedError { message, trace },
            None => FieldValue::Error { message },
        }
    }
}
