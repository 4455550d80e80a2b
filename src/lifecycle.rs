use std::cell::Cell;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

const CLOSED: u8 = 0;
const OPEN: u8 = 1;

thread_local! {
    // Set while a data callback of any endpoint runs on this thread.
    static DELIVERING: Cell<bool> = const { Cell::new(false) };
}

/// The Open/Closed state machine shared by streams, datagram sockets and acceptors.
///
/// Closing is a single compare-and-swap, so the application, a callback and the background
/// tasks may all race to close and teardown still runs once. Callbacks that deliver data are
/// fenced by `delivery`: once `close` has returned no new delivery starts. A `close` issued
/// from inside a callback skips the fence, so a callback may close its own endpoint or
/// another one whose callback is closing it back.
pub(crate) struct Lifecycle {
    state: AtomicU8,
    shutdown: CancellationToken,
    delivery: Mutex<()>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(CLOSED),
            shutdown: CancellationToken::new(),
            delivery: Mutex::new(()),
        }
    }

    pub(crate) fn open(&self) {
        self.state.store(OPEN, Ordering::Release);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.load(Ordering::Acquire) == CLOSED
    }

    /// Resolves once `close` has run.
    pub(crate) fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.shutdown.cancelled()
    }

    /// Runs `f` unless the endpoint is closed. Returns whether it ran.
    pub(crate) fn deliver(&self, f: impl FnOnce()) -> bool {
        let _fence = lock(&self.delivery);
        if self.is_closed() {
            return false;
        }
        let outer = DELIVERING.with(|delivering| delivering.replace(true));
        f();
        DELIVERING.with(|delivering| delivering.set(outer));
        true
    }

    /// Transitions Open -> Closed. Returns `true` for the single caller that won the
    /// transition; that caller is responsible for firing `on_close`.
    pub(crate) fn close(&self) -> bool {
        if self
            .state
            .compare_exchange(OPEN, CLOSED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        self.shutdown.cancel();

        // Wait out a delivery in flight, unless we are being called from inside one.
        if !DELIVERING.with(Cell::get) {
            drop(lock(&self.delivery));
        }

        true
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
