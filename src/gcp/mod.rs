//! Google Cloud Logging output.
//!
//! [`GcpSink`] sits in front of a structured encoder and does two things:
//!
//! - renames the encoder's builtin fields to the names Cloud Logging parses
//!   (`severity`, `message`, `timestamp`, `logging.googleapis.com/sourceLocation`),
//! - adds the trace correlation fields whenever the call's [`Context`] carries
//!   a span context, or the current `tracing` span is an OpenTelemetry span,
//!   so the console links the entry to its trace.
//!
//! ```rust,no_run
//! use cloudlog::gcp::{GcpSink, Options};
//! use cloudlog::{Attr, Context, Logger};
//! use tracing::Level;
//!
//! let logger = Logger::new(GcpSink::stdout(Options::new().level(Level::DEBUG).add_source()));
//! logger.info(&Context::background(), "started", [Attr::string("version", "1.2.3")]);
//! ```
//!
//! Field names are part of Cloud Logging's contract; see
//! <https://cloud.google.com/logging/docs/structured-logging>.

mod project;
mod transform;

use std::io::Write;
use std::sync::Arc;

use tracing::{Level, debug};

use crate::attr::Attr;
use crate::context::Context;
use crate::error::Error;
use crate::json::{JsonOptions, JsonSink};
use crate::record::Record;
use crate::sink::{ReplaceAttr, Sink};
use crate::trace;

pub use project::{
    DefaultCredentials, MetadataServer, ProjectResolver, StaticProject, UNKNOWN_PROJECT,
};
pub use transform::{
    MESSAGE, SEVERITY_KEY, SOURCE_LOCATION_KEY, TIMESTAMP_KEY, replace_attr, transform,
};

pub const TRACE_KEY: &str = "logging.googleapis.com/trace";
pub const SPAN_ID_KEY: &str = "logging.googleapis.com/spanId";
pub const TRACE_SAMPLED_KEY: &str = "logging.googleapis.com/trace_sampled";

// ── Options ───────────────────────────────────────────────────────────────────

/// Configuration for [`GcpSink::new`].
#[derive(Clone, Default)]
pub struct Options {
    level: Option<Level>,
    add_source: bool,
    replace_attr: Option<ReplaceAttr>,
    resolver: Option<Arc<dyn ProjectResolver>>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Minimum level written. Defaults to `INFO`.
    pub fn level(mut self, level: Level) -> Self {
        self.level = Some(level);
        self
    }

    /// Write the call site of every record as
    /// `logging.googleapis.com/sourceLocation`.
    pub fn add_source(mut self) -> Self {
        self.add_source = true;
        self
    }

    /// Rewrite attributes before they are rendered.
    ///
    /// Unlike a plain [`JsonSink`] hook, `f` is never given the builtin
    /// fields: those are always renamed for Cloud Logging and cannot be
    /// intercepted. Everything else, including builtin-named keys inside a
    /// group, goes through `f`; returning an empty key drops the attribute.
    pub fn replace_attr(
        mut self,
        f: impl Fn(&[String], Attr) -> Attr + Send + Sync + 'static,
    ) -> Self {
        self.replace_attr = Some(Arc::new(f));
        self
    }

    /// How to find the project id. Defaults to [`DefaultCredentials`].
    pub fn project_resolver(mut self, resolver: impl ProjectResolver + 'static) -> Self {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    /// Shorthand for a [`StaticProject`] resolver.
    pub fn project_id(self, id: impl Into<String>) -> Self {
        self.project_resolver(StaticProject(id.into()))
    }
}

// ── GcpSink ───────────────────────────────────────────────────────────────────

/// A [`Sink`] producing Cloud Logging structured entries.
///
/// The trace prefix is resolved once in the constructor and shared by every
/// sink derived from this one.
#[derive(Clone)]
pub struct GcpSink {
    inner: Arc<dyn Sink>,
    trace_prefix: Arc<str>,
}

impl GcpSink {
    /// JSON lines to `writer`, formatted for Cloud Logging.
    pub fn new(writer: impl Write + Send + 'static, opts: Options) -> Self {
        let resolver = opts
            .resolver
            .unwrap_or_else(|| Arc::new(DefaultCredentials::new()));

        let inner = JsonSink::new(writer, JsonOptions {
            level: opts.level.unwrap_or(Level::INFO),
            add_source: opts.add_source,
            replace_attr: Some(replace_attr(opts.replace_attr)),
        });

        Self::wrap(Arc::new(inner), trace_prefix(&*resolver))
    }

    pub fn stdout(opts: Options) -> Self {
        Self::new(std::io::stdout(), opts)
    }

    /// Adds trace correlation in front of an arbitrary encoder.
    ///
    /// `inner` is expected to already apply [`replace_attr`]; this only
    /// injects trace fields.
    pub fn wrap(inner: Arc<dyn Sink>, trace_prefix: impl Into<Arc<str>>) -> Self {
        Self { inner, trace_prefix: trace_prefix.into() }
    }

    /// `projects/<id>/traces/`
    pub fn trace_prefix(&self) -> &str {
        &self.trace_prefix
    }
}

/// Builds `projects/<id>/traces/`, falling back to [`UNKNOWN_PROJECT`].
pub fn trace_prefix(resolver: &dyn ProjectResolver) -> String {
    let project = match resolver.resolve() {
        Ok(id) => id,
        Err(e) => {
            debug!(error = %e, "project id not found, trace ids will not link");
            UNKNOWN_PROJECT.to_owned()
        }
    };
    format!("projects/{project}/traces/")
}

impl Sink for GcpSink {
    fn enabled(&self, level: Level) -> bool {
        self.inner.enabled(level)
    }

    fn emit(&self, cx: &Context, mut record: Record) -> Result<(), Error> {
        // The context's span wins: the middleware may emit after the request
        // span has been exited.
        let span = cx.trace().cloned().or_else(trace::current);
        if let Some(span) = span {
            record.add_root_attrs([
                Attr::string(TRACE_KEY, format!("{}{}", self.trace_prefix, span.trace_id())),
                Attr::string(SPAN_ID_KEY, span.span_id().to_string()),
                Attr::bool(TRACE_SAMPLED_KEY, span.is_sampled()),
            ]);
        }
        self.inner.emit(cx, record)
    }

    fn with_attrs(&self, attrs: Vec<Attr>) -> Arc<dyn Sink> {
        Arc::new(Self {
            inner: self.inner.with_attrs(attrs),
            trace_prefix: Arc::clone(&self.trace_prefix),
        })
    }

    fn with_group(&self, name: &str) -> Arc<dyn Sink> {
        Arc::new(Self {
            inner: self.inner.with_group(name),
            trace_prefix: Arc::clone(&self.trace_prefix),
        })
    }
}
