//! Counting completion signal for fanned-out plugin invocations.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    pending: AtomicUsize,
    notify: Notify,
}

/// Tracks outstanding units of work and lets one caller wait for all of them.
///
/// Each unit holds a [`CompletionGuard`]; the count drops when the guard is
/// dropped, whether the unit ran to completion, panicked, or was never run
/// because its submission was rejected.
#[derive(Debug, Clone, Default)]
pub struct CompletionGroup {
    inner: Arc<Inner>,
}

impl CompletionGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one outstanding unit.
    pub fn guard(&self) -> CompletionGuard {
        self.inner.pending.fetch_add(1, Ordering::AcqRel);
        CompletionGuard {
            inner: self.inner.clone(),
        }
    }

    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::Acquire)
    }

    /// Wait until no unit is outstanding.
    pub async fn wait(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Marks one unit of a [`CompletionGroup`] as done when dropped.
#[derive(Debug)]
pub struct CompletionGuard {
    inner: Arc<Inner>,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if self.inner.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.notify.notify_waiters();
        }
    }
}
