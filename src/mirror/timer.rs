use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{error, warn};

/// A cancellable one-shot timer. Arming spawns a named thread that waits out
/// the delay and then runs the callback on that thread; the cycle body
/// therefore runs to completion before anything else can be armed on it.
///
/// Cancelling a pending timer prevents the fire outright. A callback already
/// running cannot be preempted; `join` waits for it to finish. Dropping the
/// handle without joining cancels a pending fire (the channel disconnects)
/// and detaches the thread.
pub struct OneShotTimer {
    cancel_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl OneShotTimer {
    /// Arm a timer named `<name>-timer`. Returns `None` when the thread
    /// cannot be spawned.
    pub fn arm<F>(name: &str, delay: Duration, callback: F) -> Option<OneShotTimer>
    where
        F: FnOnce() + Send + 'static,
    {
        let (cancel_tx, cancel_rx) = mpsc::channel();
        let spawned = std::thread::Builder::new()
            .name(format!("{name}-timer"))
            .spawn(move || {
                // Only an undisturbed timeout fires; a cancel send or a
                // disconnect (owner dropped) both suppress the callback.
                if cancel_rx.recv_timeout(delay) == Err(RecvTimeoutError::Timeout) {
                    callback()
                }
            });

        match spawned {
            Ok(handle) => Some(OneShotTimer {
                cancel_tx,
                handle: Some(handle),
            }),
            Err(e) => {
                error!("Cannot spawn timer thread for {:?}: {}", name, e);
                None
            }
        }
    }

    /// Request cancellation of a pending fire. No effect once the callback
    /// has started.
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(());
    }

    /// Wait for the timer thread to finish, including any callback currently
    /// running on it.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Timer thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc::channel;
    use std::sync::Arc;

    #[test]
    fn test_timer_fires_after_delay() {
        let (tx, rx) = channel();
        let _timer = OneShotTimer::arm("test", Duration::from_millis(10), move || {
            tx.send(()).unwrap();
        })
        .unwrap();

        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
    }

    #[test]
    fn test_cancel_prevents_fire() {
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        let timer = OneShotTimer::arm("test", Duration::from_millis(50), move || {
            fired_clone.store(true, Ordering::SeqCst);
        })
        .unwrap();

        timer.cancel();
        timer.join();
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_join_waits_for_running_callback() {
        let done = Arc::new(AtomicBool::new(false));
        let done_clone = done.clone();
        let (started_tx, started_rx) = channel();
        let timer = OneShotTimer::arm("test", Duration::from_millis(1), move || {
            started_tx.send(()).unwrap();
            std::thread::sleep(Duration::from_millis(50));
            done_clone.store(true, Ordering::SeqCst);
        })
        .unwrap();

        started_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        // Cancel after the fire is a no-op; join must still wait it out.
        timer.cancel();
        timer.join();
        assert!(done.load(Ordering::SeqCst));
    }

    #[test]
    fn test_drop_cancels_pending_fire() {
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        let timer = OneShotTimer::arm("test", Duration::from_millis(30), move || {
            fired_clone.store(true, Ordering::SeqCst);
        })
        .unwrap();

        drop(timer);
        std::thread::sleep(Duration::from_millis(100));
        assert!(!fired.load(Ordering::SeqCst));
    }
}
