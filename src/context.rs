//! Per-request execution context and the extra-attribute bag.
//!
//! The request-log middleware puts a [`Context`] into every request's
//! extensions. Handlers pull it back out and may attach fields to the
//! request's log line:
//!
//! ```rust
//! use cloudlog::{Attr, Context};
//!
//! async fn get_bear(req: http::Request<()>) -> &'static str {
//!     let cx = Context::from_request(&req);
//!     cx.add_extra_attr(Attr::string("animal", "bear"));
//!     "grr"
//! }
//! ```
//!
//! Outside an instrumented request the context has no bag, and adding to it
//! does nothing. Code shared between instrumented and plain call sites never
//! has to check.

use std::sync::{Arc, Mutex, PoisonError};

use opentelemetry::trace::SpanContext;

use crate::attr::Attr;
use crate::trace;

// ── Context ───────────────────────────────────────────────────────────────────

/// What a log call knows about the request it runs under.
///
/// Cheap to clone: the bag is reference-counted and the span context is a
/// handful of ids.
#[derive(Clone, Debug, Default)]
pub struct Context {
    trace: Option<SpanContext>,
    extra: Option<ExtraAttrs>,
}

impl Context {
    /// A context with no trace and no bag.
    pub fn background() -> Self {
        Self::default()
    }

    /// A context carrying the span context of the current `tracing` span,
    /// when an OpenTelemetry layer is installed.
    pub fn current() -> Self {
        Self { trace: trace::current(), extra: None }
    }

    /// Invalid span contexts are ignored.
    pub fn with_trace(mut self, trace: SpanContext) -> Self {
        self.trace = trace.is_valid().then_some(trace);
        self
    }

    pub fn with_extra_attrs(mut self, extra: ExtraAttrs) -> Self {
        self.extra = Some(extra);
        self
    }

    pub fn trace(&self) -> Option<&SpanContext> {
        self.trace.as_ref()
    }

    /// The context the middleware installed, or [`Context::background`].
    pub fn from_extensions(extensions: &http::Extensions) -> Self {
        extensions.get::<Self>().cloned().unwrap_or_default()
    }

    pub fn from_request<B>(req: &http::Request<B>) -> Self {
        Self::from_extensions(req.extensions())
    }

    /// Appends `attr` to the in-flight request log, if there is one.
    pub fn add_extra_attr(&self, attr: Attr) {
        if let Some(extra) = &self.extra {
            extra.push(attr);
        }
    }
}

/// Appends `attr` to the request log reachable from `cx`. No-op when `cx`
/// does not belong to an instrumented request.
pub fn add_extra_attr(cx: &Context, attr: Attr) {
    cx.add_extra_attr(attr);
}

/// Like [`add_extra_attr`], for code that only holds the request's
/// extensions.
pub fn add_extra_attr_to(extensions: &http::Extensions, attr: Attr) {
    if let Some(cx) = extensions.get::<Context>() {
        cx.add_extra_attr(attr);
    }
}

// ── ExtraAttrs ────────────────────────────────────────────────────────────────

/// Append-only attribute list scoped to one request.
///
/// Drained exactly once when the request's record is built; anything pushed
/// after that is discarded.
#[derive(Clone, Debug)]
pub struct ExtraAttrs(Arc<Mutex<Option<Vec<Attr>>>>);

impl ExtraAttrs {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(Some(Vec::new()))))
    }

    pub fn push(&self, attr: Attr) {
        let mut slot = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(attrs) = slot.as_mut() {
            attrs.push(attr);
        }
    }

    /// Removes and returns everything pushed so far, closing the bag.
    pub(crate) fn take(&self) -> Vec<Attr> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or_default()
    }
}

impl Default for ExtraAttrs {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adds_to_bag_in_insertion_order() {
        let extra = ExtraAttrs::new();
        let cx = Context::background().with_extra_attrs(extra.clone());

        add_extra_attr(&cx, Attr::string("animal", "bear"));
        cx.clone().add_extra_attr(Attr::int("legs", 4));

        let keys: Vec<_> = extra.take().into_iter().map(|a| a.key).collect();
        assert_eq!(keys, ["animal", "legs"]);
    }

    #[test]
    fn background_context_ignores_attrs() {
        let extra = ExtraAttrs::new();
        let instrumented = Context::background().with_extra_attrs(extra.clone());
        let cx = Context::background();

        add_extra_attr(&cx, Attr::string("animal", "bear"));
        cx.clone().add_extra_attr(Attr::int("legs", 4));
        instrumented.add_extra_attr(Attr::string("kept", "yes"));

        assert!(cx.extra.is_none());
        assert!(cx.trace().is_none());
        let keys: Vec<_> = extra.take().into_iter().map(|a| a.key).collect();
        assert_eq!(keys, ["kept"]);
    }

    #[test]
    fn current_outside_any_span_has_no_trace() {
        let cx = Context::current();
        assert!(cx.trace().is_none());
        assert!(cx.extra.is_none());
    }

    #[test]
    fn invalid_span_context_is_dropped() {
        let cx = Context::background().with_trace(SpanContext::empty_context());
        assert!(cx.trace().is_none());
    }

    #[test]
    fn bag_is_closed_after_take() {
        let extra = ExtraAttrs::new();
        extra.push(Attr::bool("early", true));
        assert_eq!(extra.take().len(), 1);

        extra.push(Attr::bool("late", true));
        assert!(extra.take().is_empty());
    }

    #[test]
    fn missing_extension_yields_background() {
        let req = http::Request::new(());
        let cx = Context::from_request(&req);
        cx.add_extra_attr(Attr::string("ignored", "yes"));
        assert!(cx.trace().is_none());
    }

    #[test]
    fn adds_through_extensions() {
        let extra = ExtraAttrs::new();
        let mut req = http::Request::new(());
        req.extensions_mut().insert(Context::background().with_extra_attrs(extra.clone()));

        add_extra_attr_to(req.extensions(), Attr::string("animal", "bear"));
        add_extra_attr_to(&http::Extensions::new(), Attr::string("nowhere", "x"));

        let attrs = extra.take();
        assert_eq!(attrs.len(), 1);
        assert_eq!(attrs[0].key, "animal");
    }
}
