//! Blocking facade (spec §9 "Coroutine/async layering"): every primitive
//! operation is `async fn` on the core, so a synchronous caller needs
//! one generic way to drive a future to completion rather than a
//! hand-duplicated sync method per primitive, the way the teacher's own
//! `tokio::runtime::Handle::current().block_on(...)` call sites do it in
//! `core/persistence/aof_rewriter.rs` and `core/commands/generic/backup.rs`.

use std::future::Future;

use tokio::runtime::Handle;

/// Wraps a runtime [`Handle`] so any async primitive call can be driven
/// synchronously. Build one per thread that needs it; `Blocking::block_on`
/// panics if called from within that same runtime's own worker thread
/// (mirrors `Handle::block_on`'s own restriction — use
/// `tokio::task::block_in_place` at the call site if that's unavoidable).
pub struct Blocking {
    handle: Handle,
}

impl Blocking {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Captures the handle of whichever runtime is current when this is
    /// called. Typically built once at startup from the thread that also
    /// called [`tokio::runtime::Runtime::block_on`] to enter the runtime.
    pub fn current() -> Self {
        Self { handle: Handle::current() }
    }

    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.handle.block_on(future)
    }
}
