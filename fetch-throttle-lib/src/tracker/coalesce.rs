use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;

/// Collapses bursts of notifications into a single delayed flush.
///
/// The first [`Coalescer::schedule`] call arms a timer; calls made while
/// the timer is armed are absorbed. When the window elapses the timer is
/// disarmed and the flush runs, so it always observes the latest state.
///
/// Outside of a tokio runtime there is nothing to wait on and the flush
/// runs immediately.
#[derive(Debug, Clone)]
pub struct Coalescer {
    window: Duration,
    armed: Arc<AtomicBool>,
}

impl Coalescer {
    /// Create a coalescer with the given window
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            armed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The coalescing window
    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    /// Whether a flush is pending
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    /// Run `flush` once the window has elapsed, unless a flush is already
    /// pending. Returns `true` if this call armed the timer.
    pub fn schedule<F>(&self, flush: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if self.armed.swap(true, Ordering::AcqRel) {
            return false;
        }

        let armed = Arc::clone(&self.armed);
        match Handle::try_current() {
            Ok(runtime) => {
                let window = self.window;
                runtime.spawn(async move {
                    tokio::time::sleep(window).await;
                    armed.store(false, Ordering::Release);
                    flush();
                });
            }
            Err(_) => {
                armed.store(false, Ordering::Release);
                flush();
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> Box<dyn FnOnce() + Send>) {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = Arc::clone(&count);
        let make = move || -> Box<dyn FnOnce() + Send> {
            let count = Arc::clone(&handle);
            Box::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        (count, make)
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_is_flushed_once() {
        let coalescer = Coalescer::new(Duration::from_millis(50));
        let (count, flush) = counter();

        assert!(coalescer.schedule(flush()));
        for _ in 0..9 {
            assert!(!coalescer.schedule(flush()));
        }
        assert!(coalescer.is_armed());
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!coalescer.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearms_after_flush() {
        let coalescer = Coalescer::new(Duration::from_millis(50));
        let (count, flush) = counter();

        coalescer.schedule(flush());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(coalescer.schedule(flush()));
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_without_runtime_flushes_inline() {
        let coalescer = Coalescer::new(Duration::from_secs(60));
        let (count, flush) = counter();

        assert!(coalescer.schedule(flush()));
        assert!(coalescer.schedule(flush()));
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(!coalescer.is_armed());
    }
}
