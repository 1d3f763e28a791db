// Copyright 2026 tracedb Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{
    backtrace::Backtrace,
    fmt::{Debug, Display},
    io,
    sync::Arc,
    time::Duration,
};

/// Kinds of [`Error`] returned by tracedb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Empty path, id outside a loader's range or other malformed input.
    InvalidArgument,
    /// The id has no blob, lies outside its path's range, or the index file is unusable.
    NotFound,
    /// The id already holds a blob.
    AlreadyExists,
    /// A quota unit could not be acquired in time, or a database is full.
    ResourceExhausted,
    /// A lock or single-instance gate could not be acquired in time.
    Busy,
    /// The OS refused to open another file.
    TooManyOpenFiles,
    /// Fewer bytes than required were read from an index or data file.
    ShortRead,
    /// On-disk data is inconsistent.
    Corruption,
    /// The destination buffer is too small.
    ///
    /// The caller may retry with a larger buffer.
    BufferSizeLimit,
    /// Any other I/O error.
    Io,
    /// The database has been torn down.
    Closed,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::InvalidArgument => "Invalid argument",
            ErrorKind::NotFound => "Not found",
            ErrorKind::AlreadyExists => "Already exists",
            ErrorKind::ResourceExhausted => "Resource exhausted",
            ErrorKind::Busy => "Busy",
            ErrorKind::TooManyOpenFiles => "Too many open files",
            ErrorKind::ShortRead => "Short read",
            ErrorKind::Corruption => "Corruption",
            ErrorKind::BufferSizeLimit => "Buffer size limit exceeded",
            ErrorKind::Io => "I/O error",
            ErrorKind::Closed => "Closed",
        };
        f.write_str(s)
    }
}

/// Error returned by every fallible tracedb operation.
///
/// `Display` prints a single line:
///
/// ```shell
/// Not found, context: { path: /db/a, id: 100 } => id out of range
/// ```
///
/// `Debug` prints the same on multiple lines, followed by the source and the backtrace if one was captured.
#[derive(Clone)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    context: Vec<(&'static str, String)>,
    source: Option<Arc<anyhow::Error>>,
    backtrace: Arc<Backtrace>,
}

/// Result type for tracedb.
pub type Result<T> = std::result::Result<T, Error>;

impl Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)?;
        if !self.message.is_empty() {
            write!(f, " => {}", self.message)?;
        }
        writeln!(f)?;
        if !self.context.is_empty() {
            writeln!(f, "\nContext:")?;
            for (k, v) in &self.context {
                writeln!(f, "  {k}: {v}")?;
            }
        }
        if let Some(source) = &self.source {
            writeln!(f, "\nSource:\n  {source:#}")?;
        }
        if let std::backtrace::BacktraceStatus::Captured = self.backtrace.status() {
            writeln!(f, "\nBacktrace:\n{}", self.backtrace)?;
        }
        Ok(())
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)?;
        if !self.context.is_empty() {
            let context = self
                .context
                .iter()
                .map(|(k, v)| format!("{k}: {v}"))
                .collect::<Vec<_>>()
                .join(", ");
            write!(f, ", context: {{ {context} }}")?;
        }
        if !self.message.is_empty() {
            write!(f, " => {}", self.message)?;
        }
        if let Some(source) = &self.source {
            write!(f, ", source: {source}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|v| v.as_ref().as_ref())
    }
}

impl Error {
    /// Create a new error.
    ///
    /// ```rust
    /// # use tracedb_common::error::{Error, ErrorKind};
    /// let io_error = std::io::Error::other("an I/O error occurred");
    /// Error::new(ErrorKind::Io, "cannot open shard").with_source(io_error);
    /// ```
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: vec![],
            source: None,
            backtrace: Arc::new(Backtrace::capture()),
        }
    }

    /// Attach a key-value pair, e.g. the path or id the error is about.
    pub fn with_context(mut self, key: &'static str, value: impl ToString) -> Self {
        self.context.push((key, value.to_string()));
        self
    }

    /// Set the underlying error. Setting it twice panics in debug builds.
    pub fn with_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        debug_assert!(self.source.is_none(), "the source error has been set");
        self.source = Some(Arc::new(source.into()));
        self
    }

    /// Get the error kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Get the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the attached key-value pairs, in insertion order.
    pub fn context(&self) -> &[(&'static str, String)] {
        &self.context
    }

    /// Get the underlying error.
    pub fn source(&self) -> Option<&anyhow::Error> {
        self.source.as_deref()
    }

    /// Returns `true` if the error is [`ErrorKind::NotFound`].
    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }

    /// Map an I/O error onto an error kind.
    ///
    /// `EMFILE` becomes [`ErrorKind::TooManyOpenFiles`] so callers can shrink their file budget instead of failing.
    pub fn io_error(source: io::Error) -> Self {
        let (kind, message) = if is_too_many_open_files(&source) {
            (ErrorKind::TooManyOpenFiles, "cannot open more files")
        } else {
            match source.kind() {
                io::ErrorKind::NotFound => (ErrorKind::NotFound, "file not found"),
                io::ErrorKind::UnexpectedEof => (ErrorKind::ShortRead, "unexpected eof"),
                _ => (ErrorKind::Io, "I/O error"),
            }
        };
        Error::new(kind, message).with_source(source)
    }

    /// [`ErrorKind::NotFound`] with a message.
    pub fn not_found(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::NotFound, message)
    }

    /// [`ErrorKind::ShortRead`] with the expected and actual byte counts.
    pub fn short_read(expected: usize, actual: usize) -> Self {
        Error::new(ErrorKind::ShortRead, "read fewer bytes than required")
            .with_context("expected", expected)
            .with_context("actual", actual)
    }

    /// [`ErrorKind::Busy`] for a lock that could not be taken within `timeout`.
    pub fn lock_timeout(what: &'static str, timeout: Duration) -> Self {
        Error::new(ErrorKind::Busy, "lock acquisition timed out")
            .with_context("lock", what)
            .with_context("timeout", format!("{timeout:?}"))
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::io_error(e)
    }
}

/// Returns `true` if the I/O error means the process ran out of file descriptors.
pub fn is_too_many_open_files(e: &io::Error) -> bool {
    #[cfg(unix)]
    {
        e.raw_os_error() == Some(libc::EMFILE)
    }
    #[cfg(not(unix))]
    {
        let _ = e;
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_send_sync_static<T: Send + Sync + 'static>() {}

    #[test_log::test]
    fn test_send_sync_static() {
        is_send_sync_static::<Error>();
    }

    #[test_log::test]
    fn test_error_display() {
        let err = Error::not_found("id out of range")
            .with_context("path", "/db/a")
            .with_context("id", 100);

        assert_eq!(
            "Not found, context: { path: /db/a, id: 100 } => id out of range",
            err.to_string()
        );
    }

    #[test_log::test]
    fn test_error_display_with_source() {
        let io_error = io::Error::other("disk on fire");
        let err = Error::new(ErrorKind::Io, "cannot read shard").with_source(io_error);
        assert_eq!("I/O error => cannot read shard, source: disk on fire", err.to_string());
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test_log::test]
    fn test_io_error_kinds() {
        let e = Error::from(io::Error::from(io::ErrorKind::NotFound));
        assert!(e.is_not_found());

        let e = Error::from(io::Error::from(io::ErrorKind::UnexpectedEof));
        assert_eq!(e.kind(), ErrorKind::ShortRead);

        let e = Error::from(io::Error::from(io::ErrorKind::PermissionDenied));
        assert_eq!(e.kind(), ErrorKind::Io);
        assert!(e.source().and_then(|s| s.downcast_ref::<io::Error>()).is_some());
    }

    #[cfg(unix)]
    #[test_log::test]
    fn test_emfile_is_too_many_open_files() {
        let e = Error::from(io::Error::from_raw_os_error(libc::EMFILE));
        assert_eq!(e.kind(), ErrorKind::TooManyOpenFiles);
    }

    #[test_log::test]
    fn test_short_read_context() {
        let e = Error::short_read(65536, 100);
        assert_eq!(e.kind(), ErrorKind::ShortRead);
        assert_eq!(e.context(), &[("expected", "65536".to_string()), ("actual", "100".to_string())]);
    }
}
