use crate::error::{EngineError, SinkError};
use crate::events::TriggerEvent;
use crate::timing::{Clock, Ticker};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Receives triggers at the moment they fire.
pub trait TriggerSink: Send + Sync {
    fn trigger(&self, event: &TriggerEvent) -> Result<(), SinkError>;

    /// Called after pending events are cleared so the transport can cut
    /// anything still sounding.
    fn silence(&self) {}
}

/// Pending triggers shared between the scheduling side and the poll loop.
/// Appends never wait on a poll for longer than one partition.
#[derive(Debug, Clone, Default)]
pub struct EventQueue {
    inner: Arc<Mutex<Vec<TriggerEvent>>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: TriggerEvent) {
        self.inner.lock().push(event);
    }

    /// Removes and returns every event due at `now`, in insertion order.
    pub fn take_due(&self, now: f64) -> Vec<TriggerEvent> {
        let mut events = self.inner.lock();
        if !events.iter().any(|e| e.is_due(now)) {
            return Vec::new();
        }

        let (due, pending): (Vec<_>, Vec<_>) = events.drain(..).partition(|e| e.is_due(now));
        *events = pending;
        due
    }

    /// Discards everything pending. Returns how many events were dropped.
    pub fn clear(&self) -> usize {
        let mut events = self.inner.lock();
        let dropped = events.len();
        events.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// Fires due events through the sink. A failing or panicking event is
/// logged and the rest still fire.
fn fire_due(queue: &EventQueue, sink: &dyn TriggerSink, now: f64) -> usize {
    let due = queue.take_due(now);
    for event in &due {
        tracing::trace!(timestamp = event.timestamp, now, "firing trigger");
        match panic::catch_unwind(AssertUnwindSafe(|| sink.trigger(event))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(timestamp = event.timestamp, error = %e, "trigger sink failed")
            }
            Err(_) => tracing::error!(timestamp = event.timestamp, "trigger sink panicked"),
        }
    }
    due.len()
}

/// Holds timestamped triggers and fires each one exactly once, at or
/// after its timestamp. Late events fire immediately rather than being
/// dropped.
pub struct Dispatcher {
    clock: Arc<Clock>,
    sink: Arc<dyn TriggerSink>,
    queue: EventQueue,
    running: Arc<AtomicBool>,
    poll_interval: Duration,
    poller: Option<Ticker>,
}

impl Dispatcher {
    pub fn new(clock: Arc<Clock>, sink: Arc<dyn TriggerSink>, poll_interval: Duration) -> Self {
        Self {
            clock,
            sink,
            queue: EventQueue::new(),
            running: Arc::new(AtomicBool::new(false)),
            poll_interval,
            poller: None,
        }
    }

    /// Handle for scheduling from another thread.
    pub fn queue(&self) -> EventQueue {
        self.queue.clone()
    }

    pub fn schedule(&self, event: TriggerEvent) {
        self.queue.push(event);
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// One poll iteration at `now`. Returns how many events fired.
    pub fn poll(&self, now: f64) -> usize {
        fire_due(&self.queue, self.sink.as_ref(), now)
    }

    pub fn start(&mut self) -> Result<(), EngineError> {
        if self.poller.is_some() {
            return Ok(());
        }

        self.running.store(true, Ordering::Release);

        let clock = Arc::clone(&self.clock);
        let sink = Arc::clone(&self.sink);
        let queue = self.queue.clone();
        let running = Arc::clone(&self.running);

        let poller = Ticker::spawn("tactus-dispatch", self.poll_interval, move || {
            if !running.load(Ordering::Acquire) {
                return;
            }
            fire_due(&queue, sink.as_ref(), clock.now());
        })
        .map_err(|source| {
            self.running.store(false, Ordering::Release);
            EngineError::Spawn {
                name: "dispatcher",
                source,
            }
        })?;

        self.poller = Some(poller);
        tracing::debug!(interval = ?self.poll_interval, "dispatcher started");
        Ok(())
    }

    /// Halts the poll loop. Pending events stay queued; see [`Dispatcher::clear`].
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(mut poller) = self.poller.take() {
            poller.stop();
            tracing::debug!("dispatcher stopped");
        }
    }

    /// Discards pending events without firing them and silences the sink.
    pub fn clear(&self) {
        let dropped = self.queue.clear();
        if dropped > 0 {
            tracing::debug!(dropped, "cleared pending triggers");
        }
        self.sink.silence();
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
