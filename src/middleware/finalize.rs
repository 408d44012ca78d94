//! Builds and emits the one record per request.

use std::any::Any;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use http::StatusCode;
use http::header::USER_AGENT;
use tracing::Level;

use super::stack::{self, StackPool};
use crate::attr::Attr;
use crate::context::{Context, ExtraAttrs};
use crate::logger::Logger;

pub(crate) const MESSAGE: &str = "Server Request";

/// How the exchange ended.
#[derive(Debug)]
pub(crate) enum Outcome {
    Completed(StatusCode),
    Aborted { cause: String, stack_trace: String },
}

/// The request half of the `httpRequest` group, captured before the request
/// is handed to the inner service.
#[derive(Clone, Debug)]
pub(crate) struct RequestInfo {
    method: String,
    url: String,
    protocol: String,
    remote_ip: String,
    user_agent: Option<String>,
}

impl RequestInfo {
    pub(crate) fn from_request<B>(req: &http::Request<B>) -> Self {
        Self {
            method: req.method().as_str().to_owned(),
            url: req.uri().to_string(),
            protocol: format!("{:?}", req.version()),
            remote_ip: req
                .extensions()
                .get::<SocketAddr>()
                .map(ToString::to_string)
                .unwrap_or_default(),
            user_agent: req
                .headers()
                .get(USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .filter(|ua| !ua.is_empty())
                .map(str::to_owned),
        }
    }
}

struct Exchange {
    logger: Logger,
    cx: Context,
    extra: ExtraAttrs,
    info: RequestInfo,
    start: Instant,
    stacks: Arc<StackPool>,
    status: StatusCode,
    bytes_written: u64,
    error: Option<String>,
    aborted: Option<Outcome>,
}

/// Drop guard that emits the request record exactly once.
///
/// Whichever exit path comes first (body finished, body dropped, panic
/// caught, future cancelled) triggers the emission; later ones find nothing
/// left to do.
pub(crate) struct Finalizer {
    exchange: Option<Exchange>,
}

impl Finalizer {
    pub(crate) fn new(
        logger: Logger,
        cx: Context,
        extra: ExtraAttrs,
        info: RequestInfo,
        stacks: Arc<StackPool>,
    ) -> Self {
        Self {
            exchange: Some(Exchange {
                logger,
                cx,
                extra,
                info,
                start: Instant::now(),
                stacks,
                status: StatusCode::OK,
                bytes_written: 0,
                error: None,
                aborted: None,
            }),
        }
    }

    /// The response head the client will see.
    pub(crate) fn set_status(&mut self, status: StatusCode) {
        if let Some(ex) = &mut self.exchange {
            ex.status = status;
        }
    }

    pub(crate) fn record_bytes(&mut self, n: u64) {
        if let Some(ex) = &mut self.exchange {
            ex.bytes_written = ex.bytes_written.saturating_add(n);
        }
    }

    /// The inner service returned an error instead of a response.
    pub(crate) fn fail(&mut self, err: &dyn fmt::Display) {
        if let Some(ex) = &mut self.exchange {
            ex.status = StatusCode::INTERNAL_SERVER_ERROR;
            ex.error = Some(err.to_string());
        }
    }

    /// The inner service panicked. Must run on the panicking thread, right
    /// after the unwind was caught, so the hook's snapshot is still there.
    pub(crate) fn abort(&mut self, cause: &(dyn Any + Send)) {
        let captured = stack::take_last_panic();
        if let Some(ex) = &mut self.exchange {
            ex.aborted = Some(Outcome::Aborted {
                cause: stack::panic_message(cause).to_owned(),
                stack_trace: ex.stacks.render(cause, captured),
            });
        }
    }

    pub(crate) fn finish(&mut self) {
        if let Some(ex) = self.exchange.take() {
            ex.emit();
        }
    }
}

impl Drop for Finalizer {
    fn drop(&mut self) {
        self.finish();
    }
}

impl Exchange {
    fn outcome(&mut self) -> Outcome {
        self.aborted.take().unwrap_or(Outcome::Completed(self.status))
    }

    fn emit(mut self) {
        let latency = self.start.elapsed();

        // A handler can send a head and then panic. The client still sees a
        // broken response, so a panic is always logged as a 500.
        let (status, stack_trace) = match self.outcome() {
            Outcome::Completed(status) => (status, None),
            Outcome::Aborted { cause, stack_trace } => {
                tracing::debug!(%cause, "request handler panicked");
                (StatusCode::INTERNAL_SERVER_ERROR, Some(stack_trace))
            }
        };

        let info = self.info;
        let mut http = vec![
            Attr::string("requestMethod", info.method),
            Attr::string("requestUrl", info.url),
            Attr::string("protocol", info.protocol),
            Attr::string("remoteIp", info.remote_ip),
            Attr::uint("responseSize", self.bytes_written),
            Attr::string("latency", format!("{:.9}s", latency.as_secs_f64())),
        ];
        if let Some(ua) = info.user_agent {
            http.push(Attr::string("userAgent", ua));
        }
        http.push(Attr::int("status", i64::from(status.as_u16())));

        let mut attrs = vec![Attr::group("httpRequest", http)];
        if let Some(error) = self.error {
            attrs.push(Attr::string("error", error));
        }
        attrs.extend(self.extra.take());
        if let Some(stack_trace) = stack_trace {
            attrs.push(Attr::string("stack_trace", stack_trace));
        }

        self.logger.log(&self.cx, Level::INFO, MESSAGE, attrs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_info_reads_head() {
        let mut req = http::Request::builder()
            .method("POST")
            .uri("/bear?x=1")
            .header(USER_AGENT, "curl/8")
            .body(())
            .unwrap();
        req.extensions_mut().insert("192.0.2.1:1234".parse::<SocketAddr>().unwrap());

        let info = RequestInfo::from_request(&req);
        assert_eq!(info.method, "POST");
        assert_eq!(info.url, "/bear?x=1");
        assert_eq!(info.protocol, "HTTP/1.1");
        assert_eq!(info.remote_ip, "192.0.2.1:1234");
        assert_eq!(info.user_agent.as_deref(), Some("curl/8"));
    }

    #[test]
    fn missing_user_agent_and_peer() {
        let req = http::Request::new(());
        let info = RequestInfo::from_request(&req);
        assert_eq!(info.user_agent, None);
        assert_eq!(info.remote_ip, "");
    }

    #[test]
    fn outcome_prefers_abort() {
        let mut finalizer = Finalizer::new(
            crate::logger::default_logger(),
            Context::background(),
            ExtraAttrs::new(),
            RequestInfo::from_request(&http::Request::new(())),
            Arc::new(StackPool::new(1)),
        );
        finalizer.set_status(StatusCode::FOUND);

        let ex = finalizer.exchange.as_mut().unwrap();
        assert!(matches!(ex.outcome(), Outcome::Completed(StatusCode::FOUND)));

        ex.aborted = Some(Outcome::Aborted { cause: "x".into(), stack_trace: "y".into() });
        assert!(matches!(ex.outcome(), Outcome::Aborted { .. }));

        // Nothing left to emit to stdout from this test.
        finalizer.exchange = None;
    }
}
