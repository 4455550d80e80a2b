use std::future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::{self, Instant};

/// A rolling idle deadline. Every successful I/O operation calls `renew`; if nothing renews
/// it before it elapses, `expired` resolves.
pub(crate) struct IdleDeadline {
    origin: Instant,
    timeout_ms: AtomicU64,
    expires_ms: AtomicU64,
}

impl IdleDeadline {
    pub(crate) fn new(timeout: Duration) -> Self {
        let deadline = Self {
            origin: Instant::now(),
            timeout_ms: AtomicU64::new(millis(timeout)),
            expires_ms: AtomicU64::new(0),
        };
        deadline.renew();
        deadline
    }

    pub(crate) fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::Relaxed))
    }

    /// Takes effect at the next renewal.
    pub(crate) fn set_timeout(&self, timeout: Duration) {
        self.timeout_ms.store(millis(timeout), Ordering::Relaxed);
    }

    pub(crate) fn renew(&self) {
        let now = millis(self.origin.elapsed());
        let timeout = self.timeout_ms.load(Ordering::Relaxed);
        self.expires_ms
            .store(now.saturating_add(timeout), Ordering::Relaxed);
    }

    pub(crate) fn is_disabled(&self) -> bool {
        self.timeout_ms.load(Ordering::Relaxed) == 0
    }

    pub(crate) fn expires_at(&self) -> Instant {
        self.origin + Duration::from_millis(self.expires_ms.load(Ordering::Relaxed))
    }

    /// Resolves once the deadline passes without being renewed. Never resolves when disabled.
    pub(crate) async fn expired(&self) {
        if self.is_disabled() {
            return future::pending().await;
        }
        loop {
            let at = self.expires_at();
            time::sleep_until(at).await;
            if self.expires_at() <= Instant::now() {
                return;
            }
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
