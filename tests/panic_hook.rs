//! Stack traces when the application replaces the panic hook after the
//! middleware was built. Runs in its own binary: the hook is process-wide.

use std::convert::Infallible;
use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures_util::FutureExt;
use http_body_util::{Empty, Full};
use hyper::service::{Service, service_fn};
use serde_json::Value;

use cloudlog::gcp::{GcpSink, Options};
use cloudlog::{Logger, RequestLog};

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn unrelated_failure() {
    panic!("unrelated failure");
}

async fn failing(_req: http::Request<Empty<Bytes>>) -> Result<http::Response<Full<Bytes>>, Infallible> {
    panic!("handler failure")
}

#[tokio::test]
async fn stale_snapshot_is_not_reported_after_hook_is_replaced() {
    let buf = SharedBuf::default();
    let sink = GcpSink::new(buf.clone(), Options::new().project_id("test-project"));
    let svc = RequestLog::new().logger(Logger::new(sink)).wrap(service_fn(failing));

    // Leaves a snapshot in this thread's slot, then silences every hook.
    assert!(panic::catch_unwind(unrelated_failure).is_err());
    panic::set_hook(Box::new(|_| {}));

    let cause = AssertUnwindSafe(svc.call(http::Request::new(Empty::new())))
        .catch_unwind()
        .await
        .err()
        .expect("panic propagates");
    let _ = panic::take_hook();
    assert_eq!(cause.downcast_ref::<&str>(), Some(&"handler failure"));

    let out = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
    let rec: Value = serde_json::from_str(out.trim_end()).unwrap();
    let stack = rec["stack_trace"].as_str().unwrap();
    assert!(stack.starts_with("panic: handler failure"), "{stack}");
    assert!(!stack.contains("unrelated failure"), "{stack}");
    assert!(!stack.contains("panicked at"), "{stack}");
}
