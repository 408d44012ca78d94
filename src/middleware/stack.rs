//! Stack traces for panicking handlers.
//!
//! By the time `catch_unwind` returns, the stack that panicked is gone. A
//! panic hook, installed once, snapshots the location and backtrace on the
//! panicking thread; the middleware picks the snapshot up right after
//! catching the unwind on that same thread. The slot is cleared before every
//! caught call, so a snapshot left by an unrelated panic (or missing because
//! the application replaced the hook) is never attributed to a request.
//!
//! Rendering goes through a small pool of fixed-capacity buffers so a burst
//! of failing requests does not allocate a fresh scratch buffer each.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::io::{self, Write};
use std::ops::{Deref, DerefMut};
use std::panic;
use std::sync::{Mutex, Once, PoisonError};
use std::thread;

/// Stack traces are cut off at 4 KiB.
pub(crate) const STACK_CAP: usize = 4096;

/// Idle buffers kept around between panics.
pub(crate) const POOL_SIZE: usize = 16;

// ── Panic hook ────────────────────────────────────────────────────────────────

pub(crate) struct Captured {
    thread: Option<String>,
    location: Option<String>,
    backtrace: Backtrace,
}

thread_local! {
    static LAST_PANIC: RefCell<Option<Captured>> = const { RefCell::new(None) };
}

/// Chains a capturing hook in front of whatever hook is installed.
pub(crate) fn install_panic_hook() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let captured = Captured {
                thread: thread::current().name().map(str::to_owned),
                location: info.location().map(|l| l.to_string()),
                backtrace: Backtrace::force_capture(),
            };
            LAST_PANIC.with(|slot| {
                if let Ok(mut slot) = slot.try_borrow_mut() {
                    *slot = Some(captured);
                }
            });
            previous(info);
        }));
    });
}

/// Forgets any snapshot left on this thread.
pub(crate) fn clear_last_panic() {
    LAST_PANIC.with(|slot| {
        if let Ok(mut slot) = slot.try_borrow_mut() {
            *slot = None;
        }
    });
}

/// The snapshot of the latest panic on this thread, if any.
pub(crate) fn take_last_panic() -> Option<Captured> {
    LAST_PANIC.with(|slot| slot.try_borrow_mut().ok().and_then(|mut s| s.take()))
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(cause: &(dyn Any + Send)) -> &str {
    if let Some(s) = cause.downcast_ref::<&'static str>() {
        *s
    } else if let Some(s) = cause.downcast_ref::<String>() {
        s.as_str()
    } else {
        "Box<dyn Any>"
    }
}

// ── StackPool ─────────────────────────────────────────────────────────────────

/// Bounded pool of scratch buffers for rendering stack traces.
pub(crate) struct StackPool {
    idle: Mutex<Vec<Vec<u8>>>,
    max_idle: usize,
}

impl StackPool {
    pub(crate) fn new(max_idle: usize) -> Self {
        Self { idle: Mutex::new(Vec::new()), max_idle }
    }

    /// Borrows a buffer; it goes back to the pool when the guard drops.
    pub(crate) fn acquire(&self) -> PooledBuf<'_> {
        let buf = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(STACK_CAP));
        PooledBuf { buf, pool: self }
    }

    fn release(&self, mut buf: Vec<u8>) {
        buf.clear();
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len() < self.max_idle {
            idle.push(buf);
        }
    }

    #[cfg(test)]
    pub(crate) fn idle(&self) -> usize {
        self.idle.lock().unwrap().len()
    }

    /// Renders the panic `cause` with the snapshot taken by the hook, capped
    /// at [`STACK_CAP`] bytes. The result is an owned copy; the scratch buffer
    /// is back in the pool when this returns.
    pub(crate) fn render(&self, cause: &(dyn Any + Send), captured: Option<Captured>) -> String {
        let mut buf = self.acquire();

        // Writes into the capped buffer never fail.
        let _ = match &captured {
            Some(c) => writeln!(
                buf,
                "thread '{}' panicked at {}:\n{}\n{}",
                c.thread.as_deref().unwrap_or("<unnamed>"),
                c.location.as_deref().unwrap_or("<unknown>"),
                panic_message(cause),
                c.backtrace,
            ),
            None => writeln!(buf, "panic: {}\n{}", panic_message(cause), Backtrace::force_capture()),
        };

        String::from_utf8_lossy(&buf).into_owned()
    }
}

/// A buffer on loan from a [`StackPool`].
pub(crate) struct PooledBuf<'a> {
    buf: Vec<u8>,
    pool: &'a StackPool,
}

impl Deref for PooledBuf<'_> {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> { &self.buf }
}

impl DerefMut for PooledBuf<'_> {
    fn deref_mut(&mut self) -> &mut Vec<u8> { &mut self.buf }
}

/// Silently truncates at [`STACK_CAP`].
impl Write for PooledBuf<'_> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let room = STACK_CAP.saturating_sub(self.buf.len());
        self.buf.extend_from_slice(&data[..data.len().min(room)]);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for PooledBuf<'_> {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buf));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_are_reused_and_bounded() {
        let pool = StackPool::new(1);
        {
            let _a = pool.acquire();
            let _b = pool.acquire();
        }
        assert_eq!(pool.idle(), 1);

        let mut buf = pool.acquire();
        assert!(buf.is_empty());
        assert!(buf.capacity() >= STACK_CAP);
        buf.write_all(b"leftover").unwrap();
        drop(buf);

        assert!(pool.acquire().is_empty());
    }

    #[test]
    fn writes_are_capped() {
        let pool = StackPool::new(1);
        let mut buf = pool.acquire();
        buf.write_all(&vec![b'x'; STACK_CAP * 2]).unwrap();
        assert_eq!(buf.len(), STACK_CAP);
    }

    fn explode() {
        panic!("boom");
    }

    #[test]
    fn renders_hook_snapshot() {
        install_panic_hook();
        let pool = StackPool::new(1);

        let cause = panic::catch_unwind(explode).unwrap_err();
        let trace = pool.render(&*cause, take_last_panic());

        assert!(trace.contains("boom"), "{trace}");
        assert!(trace.contains("stack.rs"), "{trace}");
        assert!(trace.len() <= STACK_CAP);
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn cleared_slot_has_no_snapshot() {
        install_panic_hook();
        let _ = panic::catch_unwind(explode);
        clear_last_panic();
        assert!(take_last_panic().is_none());
    }

    #[test]
    fn renders_without_snapshot() {
        let pool = StackPool::new(1);
        let cause: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let trace = pool.render(&*cause, None);
        assert!(trace.starts_with("panic: owned"));
    }

    #[test]
    fn unknown_payloads_have_placeholder_message() {
        let cause: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(&*cause), "Box<dyn Any>");
    }
}
