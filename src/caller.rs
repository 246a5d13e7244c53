use std::panic::Location;

/// Source files whose frames never count as the logging call site.
pub const DEFAULT_IGNORE_SUFFIXES: &[&str] = &[
    "tracing/src/macros.rs",
    "tracing-core/src/event.rs",
    "tracing-log/src/lib.rs",
    "log/src/lib.rs",
    "log/src/macros.rs",
];

/// File and line of the code that emitted an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    pub file: String,
    pub line: u32,
}

impl CallSite {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

impl From<&Location<'_>> for CallSite {
    fn from(location: &Location<'_>) -> Self {
        CallSite::new(location.file(), location.line())
    }
}

/// Picks the call site out of candidate frames, skipping library internals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerFilter {
    ignore_suffixes: Vec<String>,
}

impl Default for CallerFilter {
    fn default() -> Self {
        Self::new(DEFAULT_IGNORE_SUFFIXES.iter().copied())
    }
}

impl CallerFilter {
    pub fn new<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ignore_suffixes: suffixes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn add_ignore_suffix<I, S>(&mut self, suffixes: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore_suffixes
            .extend(suffixes.into_iter().map(Into::into));
    }

    pub fn ignore_suffixes(&self) -> &[String] {
        &self.ignore_suffixes
    }

    pub fn is_ignored(&self, file: &str) -> bool {
        let file = file.replace('\\', "/");
        self.ignore_suffixes
            .iter()
            .any(|suffix| matches_suffix(&file, suffix))
    }

    /// First frame, innermost first, that is not library-internal.
    pub fn resolve<I>(&self, frames: I) -> Option<CallSite>
    where
        I: IntoIterator<Item = CallSite>,
    {
        frames.into_iter().find(|frame| !self.is_ignored(&frame.file))
    }
}

fn matches_suffix(file: &str, suffix: &str) -> bool {
    if let Some(head) = file.strip_suffix(suffix) {
        if head.is_empty() || head.ends_with('/') || suffix.starts_with('/') {
            return true;
        }
    }
    // Registry checkouts carry a version: `log-0.4.20/src/macros.rs`.
    let Some((krate, rest)) = suffix.split_once('/') else {
        return false;
    };
    let Some(dir) = file
        .strip_suffix(rest)
        .and_then(|head| head.strip_suffix('/'))
    else {
        return false;
    };
    let dir = dir.rsplit('/').next().unwrap_or(dir);
    dir.strip_prefix(krate)
        .and_then(|version| version.strip_prefix('-'))
        .map_or(false, |version| version.starts_with(|c: char| c.is_ascii_digit()))
}
