//! # Count-Down Latch
//!
//! Single-use async countdown barrier. The count only ever decreases; once it
//! reaches zero every current and future waiter is released.
//!
//! The count is an atomic decremented with compare-and-swap so that concurrent
//! `count_down` calls from independent notifier tasks never lose a decrement,
//! and waiters register with the [`Notify`] before re-checking the count so a
//! release racing with a new waiter is never missed.

use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;

#[derive(Debug)]
pub struct CountDownLatch {
    count: AtomicUsize,
    released: Notify,
}

impl CountDownLatch {
    pub fn new(count: usize) -> Self {
        Self {
            count: AtomicUsize::new(count),
            released: Notify::new(),
        }
    }

    /// Decrement the count, releasing all waiters when it reaches zero.
    ///
    /// Returns the remaining count. Counting down an open latch is a no-op.
    pub fn count_down(&self) -> usize {
        let mut current = self.count.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return 0;
            }
            match self.count.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    let remaining = current - 1;
                    if remaining == 0 {
                        self.released.notify_waiters();
                    }
                    return remaining;
                }
                Err(actual) => current = actual,
            }
        }
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn is_open(&self) -> bool {
        self.count() == 0
    }

    /// Wait until the count reaches zero. Returns immediately for an open latch.
    pub async fn wait(&self) {
        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            // Register interest before checking, otherwise a release between the
            // check and the await would be lost.
            notified.as_mut().enable();

            if self.is_open() {
                return;
            }

            notified.await;
        }
    }
}
