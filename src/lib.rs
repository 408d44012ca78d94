//! # cloudlog
//!
//! Request logging for hyper services, written in the structured JSON format
//! Google Cloud Logging understands.
//!
//! Every request that passes through [`RequestLog`] produces exactly one
//! record on stdout (or any writer you choose): method, URL, status, bytes
//! sent, latency, caller address and user agent, correlated with the request's
//! trace so Cloud Logging groups it under the right trace in Cloud Trace.
//! Trace ids come from OpenTelemetry: the current `tracing` span (through
//! `tracing-opentelemetry`) or the caller's `traceparent` header.
//!
//! What cloudlog does not try to be: a tracing backend, a metrics exporter,
//! or a web framework. It sits between the connection and your service and
//! writes down what happened.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::convert::Infallible;
//!
//! use bytes::Bytes;
//! use cloudlog::gcp::{GcpSink, Options};
//! use cloudlog::{Attr, Context, Logger, RequestLog, add_extra_attr};
//! use http_body_util::Full;
//! use hyper::service::service_fn;
//!
//! async fn get_user(
//!     req: http::Request<hyper::body::Incoming>,
//! ) -> Result<http::Response<Full<Bytes>>, Infallible> {
//!     // Shows up as a top-level field on this request's record.
//!     add_extra_attr(&Context::from_request(&req), Attr::string("user", "42"));
//!     Ok(http::Response::new(Full::new(Bytes::from_static(br#"{"id":"42"}"#))))
//! }
//!
//! let logger = Logger::new(GcpSink::stdout(Options::new().project_id("my-project")));
//! let svc = RequestLog::new().logger(logger).wrap(service_fn(get_user));
//! // hand `svc` to hyper's connection builder
//! # let _ = svc;
//! ```
//!
//! ## Modules
//!
//! - [`gcp`]: the Cloud Logging flavour of the JSON sink (field renames, trace
//!   correlation, project lookup).
//! - [`middleware`]: the request logging service.

mod attr;
mod context;
mod error;
mod json;
mod logger;
mod record;
mod sink;
mod trace;

pub mod gcp;
pub mod middleware;

#[cfg(test)]
mod testing;

pub use attr::{Attr, Source, Value};
pub use context::{Context, ExtraAttrs, add_extra_attr, add_extra_attr_to};
pub use error::Error;
pub use gcp::GcpSink;
pub use json::{JsonOptions, JsonSink};
pub use logger::{Logger, default_logger, set_default_logger};
pub use record::Record;
pub use sink::{ReplaceAttr, Sink};
pub use trace::HeaderExtractor;

pub use middleware::{RecordedBody, RequestLog, RequestLogService};
