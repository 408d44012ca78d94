//! The logging front-end and the process-wide default logger.

use std::sync::{Arc, LazyLock};

use arc_swap::ArcSwap;
use tracing::{Level, warn};

use crate::attr::{Attr, Source};
use crate::context::Context;
use crate::json::{JsonOptions, JsonSink};
use crate::record::Record;
use crate::sink::Sink;

/// A cheap-to-clone handle over a [`Sink`].
///
/// Emission is best-effort: a sink error is reported through `tracing` and
/// otherwise dropped, never returned to the caller.
#[derive(Clone)]
pub struct Logger {
    sink: Arc<dyn Sink>,
}

impl Logger {
    pub fn new(sink: impl Sink + 'static) -> Self {
        Self { sink: Arc::new(sink) }
    }

    pub fn from_sink(sink: Arc<dyn Sink>) -> Self {
        Self { sink }
    }

    pub fn sink(&self) -> &Arc<dyn Sink> {
        &self.sink
    }

    pub fn enabled(&self, level: Level) -> bool {
        self.sink.enabled(level)
    }

    /// Logs `message` with `attrs` at `level`, recording the caller's location.
    #[track_caller]
    pub fn log(
        &self,
        cx: &Context,
        level: Level,
        message: impl Into<String>,
        attrs: impl IntoIterator<Item = Attr>,
    ) {
        if !self.sink.enabled(level) {
            return;
        }
        let record = Record::new(level, message)
            .with_source(Source::caller())
            .with_attrs(attrs);
        if let Err(e) = self.sink.emit(cx, record) {
            warn!(error = %e, "failed to emit log record");
        }
    }

    #[track_caller]
    pub fn debug(&self, cx: &Context, message: impl Into<String>, attrs: impl IntoIterator<Item = Attr>) {
        self.log(cx, Level::DEBUG, message, attrs);
    }

    #[track_caller]
    pub fn info(&self, cx: &Context, message: impl Into<String>, attrs: impl IntoIterator<Item = Attr>) {
        self.log(cx, Level::INFO, message, attrs);
    }

    #[track_caller]
    pub fn warn(&self, cx: &Context, message: impl Into<String>, attrs: impl IntoIterator<Item = Attr>) {
        self.log(cx, Level::WARN, message, attrs);
    }

    #[track_caller]
    pub fn error(&self, cx: &Context, message: impl Into<String>, attrs: impl IntoIterator<Item = Attr>) {
        self.log(cx, Level::ERROR, message, attrs);
    }

    /// A logger adding `attrs` to every record.
    pub fn with(&self, attrs: Vec<Attr>) -> Self {
        Self { sink: self.sink.with_attrs(attrs) }
    }

    /// A logger nesting every later attribute under `name`.
    pub fn with_group(&self, name: &str) -> Self {
        Self { sink: self.sink.with_group(name) }
    }
}

// ── Default logger ────────────────────────────────────────────────────────────

// Swappable at runtime; readers never block a writer.
static DEFAULT: LazyLock<ArcSwap<Logger>> = LazyLock::new(|| {
    ArcSwap::from_pointee(Logger::new(JsonSink::stdout(JsonOptions::default())))
});

/// The process-wide logger. Plain JSON on stdout until
/// [`set_default_logger`] replaces it.
pub fn default_logger() -> Logger {
    Logger::clone(&DEFAULT.load())
}

pub fn set_default_logger(logger: Logger) {
    DEFAULT.store(Arc::new(logger));
}
