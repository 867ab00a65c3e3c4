use serde::Serialize;
use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// Receives progress messages while a batch runs.
pub trait ProgressSink {
    fn report(&self, message: &str, level: LogLevel) -> anyhow::Result<()>;
}

/// Fans a message out to `tracing` and to the optional sink. Sink failures
/// are logged and dropped.
#[derive(Clone, Copy, Default)]
pub struct Progress<'a> {
    sink: Option<&'a dyn ProgressSink>,
}

impl<'a> Progress<'a> {
    pub fn new(sink: Option<&'a dyn ProgressSink>) -> Self {
        Progress { sink }
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.emit(message.as_ref(), LogLevel::Debug);
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.emit(message.as_ref(), LogLevel::Info);
    }

    pub fn warning(&self, message: impl AsRef<str>) {
        self.emit(message.as_ref(), LogLevel::Warning);
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.emit(message.as_ref(), LogLevel::Error);
    }

    fn emit(&self, message: &str, level: LogLevel) {
        match level {
            LogLevel::Debug => tracing::debug!("{message}"),
            LogLevel::Info => tracing::info!("{message}"),
            LogLevel::Warning => tracing::warn!("{message}"),
            LogLevel::Error => tracing::error!("{message}"),
        }
        let Some(sink) = self.sink else {
            return;
        };
        match catch_unwind(AssertUnwindSafe(|| sink.report(message, level))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("progress sink failed: {e:#}"),
            Err(_) => tracing::warn!("progress sink panicked"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
}

/// Sink that keeps every message, returned to IPC callers as `log`.
#[derive(Debug, Default)]
pub struct CollectingSink {
    entries: RefCell<Vec<LogEntry>>,
}

impl CollectingSink {
    pub fn into_entries(self) -> Vec<LogEntry> {
        self.entries.into_inner()
    }
}

impl ProgressSink for CollectingSink {
    fn report(&self, message: &str, level: LogLevel) -> anyhow::Result<()> {
        self.entries.borrow_mut().push(LogEntry {
            level,
            message: message.to_string(),
        });
        Ok(())
    }
}
