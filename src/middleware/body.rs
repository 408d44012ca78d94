//! Response body wrapper that measures what the client receives.

use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use bytes::Buf;
use http_body::{Body, Frame, SizeHint};
use pin_project_lite::pin_project;

use super::finalize::Finalizer;
use super::stack;

pin_project! {
    /// Passes every frame through untouched while counting data bytes.
    ///
    /// The request record is emitted when the body reaches its end, yields an
    /// error, panics, or is dropped early, whichever happens first.
    pub struct RecordedBody<B> {
        #[pin]
        inner: B,
        finalizer: Finalizer,
    }
}

impl<B> RecordedBody<B> {
    pub(crate) fn new(inner: B, finalizer: Finalizer) -> Self {
        Self { inner, finalizer }
    }
}

impl<B: Body> Body for RecordedBody<B> {
    type Data = B::Data;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();
        let inner = this.inner;
        stack::clear_last_panic();
        let polled = panic::catch_unwind(AssertUnwindSafe(|| inner.poll_frame(cx)));

        match polled {
            Err(cause) => {
                this.finalizer.abort(&*cause);
                this.finalizer.finish();
                panic::resume_unwind(cause)
            }
            Ok(Poll::Ready(Some(Ok(frame)))) => {
                if let Some(data) = frame.data_ref() {
                    this.finalizer.record_bytes(data.remaining() as u64);
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Ok(Poll::Ready(end)) => {
                this.finalizer.finish();
                Poll::Ready(end)
            }
            Ok(Poll::Pending) => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
