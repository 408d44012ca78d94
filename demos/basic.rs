//! Minimal cloudlog example: a hyper server whose every request is logged in
//! Cloud Logging format on stdout.
//!
//! Run with:
//!   RUST_LOG=debug GOOGLE_CLOUD_PROJECT=my-project cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/users/42
//!   curl -H 'traceparent: 00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01' \
//!        http://localhost:3000/users/42
//!   curl http://localhost:3000/missing
//!   curl http://localhost:3000/panic

use std::convert::Infallible;
use std::net::SocketAddr;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::{Service, service_fn};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tracing::{error, info};

use cloudlog::gcp::{GcpSink, Options};
use cloudlog::{Attr, Context, Logger, RequestLog, add_extra_attr};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // cloudlog's own diagnostics go to stderr; request records go to stdout.
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let logger = Logger::new(GcpSink::stdout(Options::new().add_source()));
    let app = RequestLog::new().logger(logger).wrap(service_fn(route));

    let listener = TcpListener::bind("0.0.0.0:3000").await?;
    info!(addr = %listener.local_addr()?, "listening");

    loop {
        let (stream, peer) = tokio::select! {
            res = listener.accept() => res?,
            _ = tokio::signal::ctrl_c() => break,
        };

        let app = app.clone();
        tokio::spawn(async move {
            // The peer address becomes the record's remoteIp.
            let svc = service_fn(move |mut req: http::Request<Incoming>| {
                req.extensions_mut().insert::<SocketAddr>(peer);
                app.call(req)
            });
            if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                .serve_connection(TokioIo::new(stream), svc)
                .await
            {
                error!(%peer, "connection error: {e}");
            }
        });
    }

    info!("stopped");
    Ok(())
}

async fn route(req: http::Request<Incoming>) -> Result<http::Response<Full<Bytes>>, Infallible> {
    let path = req.uri().path();

    if let Some(id) = path.strip_prefix("/users/") {
        add_extra_attr(&Context::from_request(&req), Attr::string("user_id", id));
        let body = format!(r#"{{"id":"{id}","name":"alice"}}"#);
        return Ok(http::Response::new(Full::new(Bytes::from(body))));
    }
    if path == "/panic" {
        panic!("demo panic");
    }

    let mut res = http::Response::new(Full::new(Bytes::new()));
    *res.status_mut() = StatusCode::NOT_FOUND;
    Ok(res)
}
