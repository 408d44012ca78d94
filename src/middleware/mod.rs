//! Request logging middleware.
//!
//! [`RequestLog`] wraps any hyper [`Service`] and writes one structured record
//! per request once the response is done:
//!
//! ```text
//! {
//!   "severity": "INFO",
//!   "message": "Server Request",
//!   "httpRequest": {
//!     "requestMethod": "GET", "requestUrl": "/users/42", "protocol": "HTTP/1.1",
//!     "remoteIp": "192.0.2.1:51234", "responseSize": 27, "latency": "0.000181000s",
//!     "userAgent": "curl/8.5.0", "status": 200
//!   },
//!   "logging.googleapis.com/trace": "projects/my-project/traces/4bf92f35…",
//!   ...
//! }
//! ```
//!
//! # What ends up in the record
//!
//! - `status` is the status of the response head the inner service returned.
//!   If the service panics, before or after returning a head, the record says
//!   `500` and carries a `stack_trace`.
//! - `responseSize` counts body bytes actually handed to the server.
//! - `latency` runs from the moment the request reaches the middleware until
//!   the body is finished (or dropped).
//! - `remoteIp` is read from a [`SocketAddr`](std::net::SocketAddr) request
//!   extension; insert the peer address when accepting the connection.
//! - anything added with [`add_extra_attr`](crate::add_extra_attr) while the
//!   request is in flight, as top-level fields.
//! - the trace fields, from the first valid OpenTelemetry span context among:
//!   a [`SpanContext`](opentelemetry::trace::SpanContext) request extension,
//!   the current `tracing` span, the W3C `traceparent` header.
//!
//! # Panics
//!
//! A panic in the inner service, or in its response body, is logged and then
//! resumed with the original payload. The middleware never turns a panic into
//! a response; that stays the job of whatever sits outside it.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::convert::Infallible;
//!
//! use bytes::Bytes;
//! use cloudlog::gcp::{GcpSink, Options};
//! use cloudlog::{Logger, RequestLog};
//! use http_body_util::Full;
//! use hyper::service::service_fn;
//!
//! async fn hello(
//!     _req: http::Request<hyper::body::Incoming>,
//! ) -> Result<http::Response<Full<Bytes>>, Infallible> {
//!     Ok(http::Response::new(Full::new(Bytes::from_static(b"hello"))))
//! }
//!
//! let logger = Logger::new(GcpSink::stdout(Options::new()));
//! let svc = RequestLog::new().logger(logger).wrap(service_fn(hello));
//! # let _ = svc;
//! ```

mod body;
mod finalize;
mod stack;

use std::fmt;
use std::future::{self, Future};
use std::panic::{self, AssertUnwindSafe};
use std::pin::{Pin, pin};
use std::sync::Arc;

use futures_util::FutureExt;
use http_body::Body;
use hyper::service::Service;
use opentelemetry::trace::SpanContext;

use crate::context::{Context, ExtraAttrs};
use crate::logger::{Logger, default_logger};
use crate::trace;

pub use body::RecordedBody;

use finalize::{Finalizer, RequestInfo};
use stack::{POOL_SIZE, StackPool};

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

// ── RequestLog ────────────────────────────────────────────────────────────────

/// Builder for [`RequestLogService`].
///
/// Services wrapped by the same `RequestLog` share its logger and its pool of
/// stack-trace buffers.
#[derive(Clone)]
pub struct RequestLog {
    logger: Option<Logger>,
    stacks: Arc<StackPool>,
}

impl RequestLog {
    pub fn new() -> Self {
        stack::install_panic_hook();
        Self { logger: None, stacks: Arc::new(StackPool::new(POOL_SIZE)) }
    }

    /// Log through `logger` instead of the process-wide
    /// [default](crate::default_logger), which is looked up per request.
    pub fn logger(mut self, logger: Logger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn wrap<S>(&self, inner: S) -> RequestLogService<S> {
        RequestLogService {
            inner,
            logger: self.logger.clone(),
            stacks: Arc::clone(&self.stacks),
        }
    }
}

impl Default for RequestLog {
    fn default() -> Self { Self::new() }
}

// ── RequestLogService ─────────────────────────────────────────────────────────

/// A service that logs every request it passes to `S`.
#[derive(Clone)]
pub struct RequestLogService<S> {
    inner: S,
    logger: Option<Logger>,
    stacks: Arc<StackPool>,
}

impl<S, B, RB> Service<http::Request<B>> for RequestLogService<S>
where
    S: Service<http::Request<B>, Response = http::Response<RB>>,
    S::Future: Send + 'static,
    S::Error: fmt::Display + Send + 'static,
    RB: Body + Send + 'static,
{
    type Response = http::Response<RecordedBody<RB>>;
    type Error = S::Error;
    type Future = BoxFuture<Result<Self::Response, Self::Error>>;

    fn call(&self, mut req: http::Request<B>) -> Self::Future {
        let extra = ExtraAttrs::new();
        let mut cx = Context::background().with_extra_attrs(extra.clone());
        let span = req
            .extensions()
            .get::<SpanContext>()
            .filter(|sc| sc.is_valid())
            .cloned()
            .or_else(trace::current)
            .or_else(|| trace::from_headers(req.headers()));
        if let Some(span) = span {
            cx = cx.with_trace(span);
        }

        let info = RequestInfo::from_request(&req);
        req.extensions_mut().insert(cx.clone());

        let logger = self.logger.clone().unwrap_or_else(default_logger);
        let mut finalizer = Finalizer::new(logger, cx, extra, info, Arc::clone(&self.stacks));

        stack::clear_last_panic();
        let fut = match panic::catch_unwind(AssertUnwindSafe(|| self.inner.call(req))) {
            Ok(fut) => fut,
            Err(cause) => {
                finalizer.abort(&*cause);
                finalizer.finish();
                panic::resume_unwind(cause)
            }
        };

        Box::pin(async move {
            let mut fut = pin!(fut);
            // Each poll may land on a different worker thread.
            let polled = AssertUnwindSafe(future::poll_fn(|task| {
                stack::clear_last_panic();
                fut.as_mut().poll(task)
            }))
            .catch_unwind()
            .await;

            match polled {
                Ok(Ok(res)) => {
                    finalizer.set_status(res.status());
                    let (parts, body) = res.into_parts();
                    Ok(http::Response::from_parts(parts, RecordedBody::new(body, finalizer)))
                }
                Ok(Err(err)) => {
                    finalizer.fail(&err);
                    finalizer.finish();
                    Err(err)
                }
                Err(cause) => {
                    finalizer.abort(&*cause);
                    finalizer.finish();
                    panic::resume_unwind(cause)
                }
            }
        })
    }
}
