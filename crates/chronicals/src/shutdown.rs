//! Shutdown coordination.
//!
//! The coordinator is a latch: once tripped, START_TRANSACTION and
//! OPEN_PAGE are refused while in-flight conversations run to completion.
//! The drain itself waits on the io-response registry emptying (see
//! `safely_close` on the host session).

use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
pub(crate) struct ShutdownCoordinator {
    shutting_down: AtomicBool,
}

impl ShutdownCoordinator {
    /// Trip the latch. Idempotent; returns `true` on the first trip.
    pub fn begin(&self) -> bool {
        !self.shutting_down.swap(true, Ordering::SeqCst)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }
}
