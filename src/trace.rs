//! Where a record's trace context comes from.
//!
//! cloudlog does not start or sample traces. It reads the OpenTelemetry span
//! context that is already around:
//!
//! 1. the span context of the current `tracing` span, when the subscriber
//!    carries a `tracing-opentelemetry` layer,
//! 2. otherwise the W3C `traceparent` header the caller sent, decoded by the
//!    OpenTelemetry trace-context propagator.

use http::HeaderMap;
use opentelemetry::propagation::{Extractor, TextMapPropagator};
use opentelemetry::trace::{SpanContext, TraceContextExt};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// Read-only view of request headers for OpenTelemetry propagators.
pub struct HeaderExtractor<'a>(pub &'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|k| k.as_str()).collect()
    }
}

/// The span context of the current `tracing` span, if it is a valid
/// OpenTelemetry span.
pub fn current() -> Option<SpanContext> {
    let cx = Span::current().context();
    let span = cx.span();
    let sc = span.span_context();
    sc.is_valid().then(|| sc.clone())
}

/// The remote span context carried by the `traceparent` header.
pub fn from_headers(headers: &HeaderMap) -> Option<SpanContext> {
    let cx = TraceContextPropagator::new().extract(&HeaderExtractor(headers));
    let span = cx.span();
    let sc = span.span_context();
    sc.is_valid().then(|| sc.clone())
}

#[cfg(test)]
mod tests {
    use opentelemetry::trace::{SpanId, TraceId, TracerProvider as _};
    use opentelemetry_sdk::trace::SdkTracerProvider;
    use tracing_subscriber::layer::SubscriberExt;

    use super::*;

    fn headers(traceparent: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("traceparent", traceparent.parse().unwrap());
        headers
    }

    #[test]
    fn parses_sampled_traceparent() {
        let sc = from_headers(&headers("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01")).unwrap();
        assert_eq!(sc.trace_id(), TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap());
        assert_eq!(sc.span_id(), SpanId::from_hex("00f067aa0ba902b7").unwrap());
        assert!(sc.is_sampled());
        assert!(sc.is_remote());
    }

    #[test]
    fn parses_unsampled_traceparent() {
        let sc = from_headers(&headers("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-00")).unwrap();
        assert!(!sc.is_sampled());
    }

    #[test]
    fn rejects_invalid_traceparent() {
        assert!(from_headers(&HeaderMap::new()).is_none());
        for value in [
            "garbage",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7",
            "ff-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
            "00-00000000000000000000000000000000-00f067aa0ba902b7-01",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-0000000000000000-01",
        ] {
            assert!(from_headers(&headers(value)).is_none(), "{value}");
        }
    }

    #[test]
    fn no_current_span_without_otel_layer() {
        let _span = tracing::info_span!("plain").entered();
        assert!(current().is_none());
    }

    #[test]
    fn reads_current_otel_span() {
        let provider = SdkTracerProvider::builder().build();
        let subscriber = tracing_subscriber::registry()
            .with(tracing_opentelemetry::layer().with_tracer(provider.tracer("cloudlog-test")));

        tracing::subscriber::with_default(subscriber, || {
            let _span = tracing::info_span!("request").entered();
            let sc = current().unwrap();
            assert!(sc.is_valid());
            assert!(sc.is_sampled());
        });
    }
}
