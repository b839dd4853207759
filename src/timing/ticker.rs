use crossbeam::channel::{self, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

/// Runs a task on a dedicated thread every `interval` until stopped.
///
/// `stop` wakes the thread immediately and joins it, so once it returns
/// the task will not run again.
pub struct Ticker {
    name: &'static str,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    pub fn spawn<F>(name: &'static str, interval: Duration, mut task: F) -> std::io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let (stop_tx, stop_rx) = channel::bounded::<()>(1);

        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                loop {
                    task();
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })?;

        tracing::debug!(name, ?interval, "ticker spawned");
        Ok(Self {
            name,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn stop(&mut self) {
        // Dropping the sender disconnects the channel and wakes the loop.
        self.stop_tx.take();

        let Some(handle) = self.handle.take() else {
            return;
        };

        if handle.thread().id() == std::thread::current().id() {
            // Stopped from inside its own task: the loop exits after this
            // iteration, joining here would deadlock.
            return;
        }

        if handle.join().is_err() {
            tracing::error!(name = self.name, "ticker thread panicked");
        } else {
            tracing::debug!(name = self.name, "ticker stopped");
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_ticker_runs_until_stopped() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();

        let mut ticker = Ticker::spawn("test-ticker", Duration::from_millis(2), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        std::thread::sleep(Duration::from_millis(30));
        ticker.stop();
        assert!(!ticker.is_running());

        let after_stop = count.load(Ordering::SeqCst);
        assert!(after_stop >= 2);

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(count.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn test_stop_wakes_long_interval() {
        let mut ticker = Ticker::spawn("slow-ticker", Duration::from_secs(60), || {}).unwrap();
        let started = std::time::Instant::now();
        ticker.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
