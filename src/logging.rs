//! Structured logging.
//!
//! Every module emits through the `tracing` macros, so a binary embedding
//! this crate gets structured events for free by installing a subscriber.
//! Configuration also carries a `logging_handler` callback, the Rust
//! analogue of the reference library's `logging_handler_t` — a second,
//! synchronous sink for callers that want log lines routed somewhere other
//! than a `tracing` subscriber (a UI console, a ring buffer, ...) without
//! standing up their own subscriber.

use std::fmt;
use std::sync::Arc;

/// Severity of a message passed to a [`LoggingHandler`], mirroring the
/// levels `tracing` itself exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// A synchronous log sink. Cloning is cheap ([`Arc`]-backed); the default
/// handler discards everything.
#[derive(Clone)]
pub struct LoggingHandler(Arc<dyn Fn(LogLevel, &str) + Send + Sync>);

impl LoggingHandler {
    pub fn new(f: impl Fn(LogLevel, &str) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn call(&self, level: LogLevel, message: &str) {
        (self.0)(level, message);
    }
}

impl fmt::Debug for LoggingHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LoggingHandler(..)")
    }
}

/// The default handler: discards every message. Every event still reaches
/// `tracing` independently of this callback.
pub fn null_logging_handler() -> LoggingHandler {
    LoggingHandler::new(|_, _| {})
}

/// Emits `message` through `tracing` at the matching level, then forwards
/// it to `handler`. Every client and server log call site goes through
/// this so the two sinks never drift apart.
pub(crate) fn emit(handler: &LoggingHandler, level: LogLevel, message: impl AsRef<str>) {
    let message = message.as_ref();
    match level {
        LogLevel::Trace => tracing::trace!("{message}"),
        LogLevel::Debug => tracing::debug!("{message}"),
        LogLevel::Info => tracing::info!("{message}"),
        LogLevel::Warn => tracing::warn!("{message}"),
        LogLevel::Error => tracing::error!("{message}"),
    }
    handler.call(level, message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn null_handler_accepts_any_message() {
        let handler = null_logging_handler();
        handler.call(LogLevel::Info, "hello");
    }

    #[test]
    fn custom_handler_is_invoked() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let handler = LoggingHandler::new(move |_, _| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        handler.call(LogLevel::Warn, "careful");
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
