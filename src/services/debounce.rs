//! Debounced write scheduling
//!
//! At most one timer is pending at a time. Scheduling again aborts the
//! sleeping timer and starts a fresh one, so a burst of mutations inside the
//! window produces a single write. Once a timer fires its write runs as a
//! detached task, which later schedules can no longer abort.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;

struct PendingWrite {
    generation: u64,
    timer: JoinHandle<()>,
}

/// Single pending-timer scheduler
pub struct Debouncer {
    window: Duration,
    pending: Mutex<Option<PendingWrite>>,
    generation: AtomicU64,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Run `write` once the window passes without another call
    ///
    /// `write` receives its generation and should pass it to
    /// [`Debouncer::finish`] when done. Must be called inside a tokio runtime.
    pub fn schedule<F, Fut>(&self, write: F)
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut pending = self.lock();
        if let Some(previous) = pending.take() {
            previous.timer.abort();
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let window = self.window;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            tokio::spawn(write(generation));
        });

        *pending = Some(PendingWrite { generation, timer });
    }

    /// Whether a write is scheduled or still running
    pub fn is_pending(&self) -> bool {
        self.lock().is_some()
    }

    /// Drop the pending write, stopping its timer if it has not fired
    ///
    /// Returns whether anything was pending.
    pub fn cancel(&self) -> bool {
        match self.lock().take() {
            Some(pending) => {
                pending.timer.abort();
                true
            }
            None => false,
        }
    }

    /// Mark the write of `generation` as done
    ///
    /// Ignored when a newer write has been scheduled since.
    pub fn finish(&self, generation: u64) {
        let mut pending = self.lock();
        if pending.as_ref().map(|p| p.generation) == Some(generation) {
            *pending = None;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<PendingWrite>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        if let Some(pending) = self.lock().take() {
            pending.timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn counting_write(
        debouncer: &Arc<Debouncer>,
        runs: &Arc<AtomicUsize>,
    ) -> impl FnOnce(u64) -> std::pin::Pin<Box<dyn Future<Output = ()> + Send>> + Send + 'static {
        let debouncer = Arc::clone(debouncer);
        let runs = Arc::clone(runs);
        move |generation| {
            Box::pin(async move {
                runs.fetch_add(1, Ordering::SeqCst);
                debouncer.finish(generation);
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesces_to_one_write() {
        let debouncer = Arc::new(Debouncer::new(Duration::from_millis(500)));
        let runs = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            debouncer.schedule(counting_write(&debouncer, &runs));
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(debouncer.is_pending());

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!debouncer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_windows_write_separately() {
        let debouncer = Arc::new(Debouncer::new(Duration::from_millis(500)));
        let runs = Arc::new(AtomicUsize::new(0));

        debouncer.schedule(counting_write(&debouncer, &runs));
        tokio::time::sleep(Duration::from_millis(600)).await;
        debouncer.schedule(counting_write(&debouncer, &runs));
        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_timer() {
        let debouncer = Arc::new(Debouncer::new(Duration::from_millis(500)));
        let runs = Arc::new(AtomicUsize::new(0));

        debouncer.schedule(counting_write(&debouncer, &runs));
        assert!(debouncer.cancel());
        assert!(!debouncer.cancel());

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stale_finish_ignored() {
        let debouncer = Debouncer::new(Duration::from_secs(60));
        debouncer.schedule(|_| async {});
        debouncer.finish(0);
        assert!(debouncer.is_pending());
        debouncer.finish(1);
        assert!(!debouncer.is_pending());
    }
}
