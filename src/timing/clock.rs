use crate::error::ClockError;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

/// Seconds of one step at `bpm` beats per minute split into `division`
/// steps per beat. Callers validate `bpm > 0` and `division > 0`.
pub fn step_duration(bpm: f64, division: u32) -> f64 {
    (60.0 / bpm) / division as f64
}

/// A monotonic time source in seconds.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> f64;

    /// Probed once when a [`Clock`] is built. An error here is fatal.
    fn check(&self) -> Result<(), ClockError> {
        Ok(())
    }

    fn is_suspended(&self) -> bool {
        false
    }

    fn resume(&self) -> Result<(), ClockError> {
        Ok(())
    }
}

/// Lock-free `f64` cell stored as raw bits.
#[derive(Debug)]
struct AtomicF64(AtomicU64);

impl AtomicF64 {
    fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Release);
    }
}

static HOST_CLOCK: Mutex<Option<Arc<HostClock>>> = parking_lot::const_mutex(None);

/// Process-wide `Instant`-backed clock. While suspended the reading
/// freezes; after [`TimeSource::resume`] it continues from real elapsed
/// time, which callers observe as a jump forward.
#[derive(Debug)]
pub struct HostClock {
    origin: Instant,
    suspended: AtomicBool,
    frozen_at: AtomicF64,
}

impl HostClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            suspended: AtomicBool::new(false),
            frozen_at: AtomicF64::new(0.0),
        }
    }

    /// Returns the shared instance, creating it on first use. Every
    /// session borrows the same origin until [`HostClock::shutdown`].
    pub fn shared() -> Result<Arc<HostClock>, ClockError> {
        let mut slot = HOST_CLOCK.lock();
        if let Some(clock) = slot.as_ref() {
            return Ok(Arc::clone(clock));
        }

        let clock = Arc::new(HostClock::new());
        clock.check()?;
        tracing::debug!("host clock initialised");
        *slot = Some(Arc::clone(&clock));
        Ok(clock)
    }

    /// Releases the shared instance. Sessions already holding it keep
    /// their borrow; the next [`HostClock::shared`] starts a new origin.
    pub fn shutdown() {
        if HOST_CLOCK.lock().take().is_some() {
            tracing::debug!("host clock shut down");
        }
    }

    pub fn suspend(&self) {
        self.frozen_at.store(self.origin.elapsed().as_secs_f64());
        self.suspended.store(true, Ordering::Release);
    }
}

impl Default for HostClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for HostClock {
    fn now(&self) -> f64 {
        if self.suspended.load(Ordering::Acquire) {
            self.frozen_at.load()
        } else {
            self.origin.elapsed().as_secs_f64()
        }
    }

    fn check(&self) -> Result<(), ClockError> {
        let first = self.origin.elapsed();
        let second = self.origin.elapsed();
        if second < first {
            return Err(ClockError::Unavailable(
                "Instant went backwards while probing".into(),
            ));
        }
        Ok(())
    }

    fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Acquire)
    }

    fn resume(&self) -> Result<(), ClockError> {
        self.suspended.store(false, Ordering::Release);
        Ok(())
    }
}

/// Hand-driven time source for deterministic tests and offline rendering.
#[derive(Debug)]
pub struct ManualClock {
    time: AtomicF64,
    suspended: AtomicBool,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            time: AtomicF64::new(start),
            suspended: AtomicBool::new(false),
        }
    }

    pub fn set(&self, seconds: f64) {
        self.time.store(seconds);
    }

    pub fn advance(&self, seconds: f64) {
        self.time.store(self.time.load() + seconds);
    }

    pub fn suspend(&self) {
        self.suspended.store(true, Ordering::Release);
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> f64 {
        self.time.load()
    }

    fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Acquire)
    }

    fn resume(&self) -> Result<(), ClockError> {
        self.suspended.store(false, Ordering::Release);
        Ok(())
    }
}

/// Musical clock state for one playback session: time origin, tempo,
/// step subdivision, cycle length and running flag. Tempo is a single
/// atomic scalar so writers never synchronise with readers.
pub struct Clock {
    source: Arc<dyn TimeSource>,
    latest: AtomicF64,
    origin: AtomicF64,
    bpm: AtomicF64,
    division: AtomicU32,
    total_steps: AtomicUsize,
    running: AtomicBool,
}

impl Clock {
    pub fn new(
        source: Arc<dyn TimeSource>,
        bpm: f64,
        division: u32,
        total_steps: usize,
    ) -> Result<Self, ClockError> {
        source.check()?;

        Ok(Self {
            source,
            latest: AtomicF64::new(f64::NEG_INFINITY),
            origin: AtomicF64::new(0.0),
            bpm: AtomicF64::new(bpm),
            division: AtomicU32::new(division),
            total_steps: AtomicUsize::new(total_steps),
            running: AtomicBool::new(false),
        })
    }

    /// Current time; never smaller than any value previously returned. A
    /// source suspended by the host is resumed before it is read.
    pub fn now(&self) -> f64 {
        if self.source.is_suspended() {
            match self.source.resume() {
                Ok(()) => tracing::debug!("resumed suspended time source"),
                Err(e) => tracing::warn!(error = %e, "failed to resume time source"),
            }
        }

        let reading = self.source.now();
        let mut seen = self.latest.0.load(Ordering::Acquire);
        loop {
            let seen_time = f64::from_bits(seen);
            if reading <= seen_time {
                return seen_time;
            }
            match self.latest.0.compare_exchange_weak(
                seen,
                reading.to_bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return reading,
                Err(actual) => seen = actual,
            }
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.source.is_suspended()
    }

    /// Resumes the underlying source if the host suspended it.
    pub fn resume(&self) -> Result<(), ClockError> {
        if self.source.is_suspended() {
            tracing::debug!("resuming suspended time source");
            self.source.resume()?;
        }
        Ok(())
    }

    /// Moves the origin to now and sets the running flag. Returns the new
    /// origin so the first step can be stamped with the same instant.
    pub fn start(&self) -> f64 {
        let origin = self.reset();
        self.running.store(true, Ordering::Release);
        origin
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Moves the origin to now without touching the running flag.
    pub fn reset(&self) -> f64 {
        let origin = self.now();
        self.origin.store(origin);
        origin
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn origin(&self) -> f64 {
        self.origin.load()
    }

    pub fn elapsed(&self) -> f64 {
        (self.now() - self.origin.load()).max(0.0)
    }

    pub fn bpm(&self) -> f64 {
        self.bpm.load()
    }

    /// Ignores a tempo that is not finite and positive, keeping the current
    /// one. [`PlaybackEngine::set_tempo`](crate::PlaybackEngine::set_tempo)
    /// reports the rejection instead.
    pub fn set_bpm(&self, bpm: f64) -> bool {
        if !(bpm.is_finite() && bpm > 0.0) {
            tracing::warn!(bpm, "ignoring invalid tempo");
            return false;
        }
        self.bpm.store(bpm);
        true
    }

    pub fn division(&self) -> u32 {
        self.division.load(Ordering::Acquire)
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps.load(Ordering::Acquire)
    }

    pub fn step_duration(&self) -> f64 {
        step_duration(self.bpm(), self.division())
    }

    /// Whole steps elapsed since the origin, wrapped to the cycle, and the
    /// fractional progress into the current step.
    pub fn position(&self) -> (usize, f64) {
        let steps = self.elapsed() / self.step_duration();
        let whole = steps.floor();
        let total = self.total_steps().max(1);
        ((whole as usize) % total, steps - whole)
    }
}

impl std::fmt::Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Clock")
            .field("origin", &self.origin())
            .field("bpm", &self.bpm())
            .field("division", &self.division())
            .field("total_steps", &self.total_steps())
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenSource;

    impl TimeSource for BrokenSource {
        fn now(&self) -> f64 {
            0.0
        }

        fn check(&self) -> Result<(), ClockError> {
            Err(ClockError::Unavailable("no timer".into()))
        }
    }

    fn manual_clock(start: f64) -> (Arc<ManualClock>, Clock) {
        let source = Arc::new(ManualClock::new(start));
        let clock = Clock::new(source.clone(), 120.0, 2, 16).unwrap();
        (source, clock)
    }

    #[test]
    fn test_step_duration() {
        assert_eq!(step_duration(120.0, 2), 0.25);
        assert_eq!(step_duration(60.0, 1), 1.0);
        assert!((step_duration(90.0, 4) - 0.1666666).abs() < 1e-6);
    }

    #[test]
    fn test_broken_source_is_fatal() {
        let result = Clock::new(Arc::new(BrokenSource), 120.0, 4, 16);
        assert!(matches!(result, Err(ClockError::Unavailable(_))));
    }

    #[test]
    fn test_now_never_goes_backwards() {
        let (source, clock) = manual_clock(10.0);
        assert_eq!(clock.now(), 10.0);

        source.set(4.0);
        assert_eq!(clock.now(), 10.0);

        source.set(10.5);
        assert_eq!(clock.now(), 10.5);
    }

    #[test]
    fn test_resume_suspended_source() {
        let (source, clock) = manual_clock(0.0);
        source.suspend();
        assert!(clock.is_suspended());

        clock.resume().unwrap();
        assert!(!clock.is_suspended());
    }

    #[test]
    fn test_host_clock_freezes_while_suspended() {
        let host = HostClock::new();
        host.suspend();
        let frozen = host.now();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(host.now(), frozen);

        host.resume().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert!(host.now() > frozen);
    }

    #[test]
    fn test_shared_host_clock_lifecycle() {
        let first = HostClock::shared().unwrap();
        let second = HostClock::shared().unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        HostClock::shutdown();
        let third = HostClock::shared().unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[test]
    fn test_position_and_tempo_change() {
        let (source, clock) = manual_clock(10.0);
        clock.start();
        assert_eq!(clock.origin(), 10.0);
        assert_eq!(clock.step_duration(), 0.25);

        source.set(10.6);
        let (step, progress) = clock.position();
        assert_eq!(step, 2);
        assert!((progress - 0.4).abs() < 1e-9);

        source.set(14.1);
        assert_eq!(clock.position().0, 0);

        clock.set_bpm(60.0);
        assert_eq!(clock.step_duration(), 0.5);
    }

    #[test]
    fn test_now_resumes_suspended_source() {
        let (source, clock) = manual_clock(3.0);
        source.suspend();

        assert_eq!(clock.now(), 3.0);
        assert!(!source.is_suspended());
    }

    #[test]
    fn test_set_bpm_rejects_invalid_tempo() {
        let (_source, clock) = manual_clock(0.0);
        assert!(!clock.set_bpm(0.0));
        assert!(!clock.set_bpm(-90.0));
        assert!(!clock.set_bpm(f64::NAN));
        assert!(!clock.set_bpm(f64::INFINITY));
        assert_eq!(clock.bpm(), 120.0);

        assert!(clock.set_bpm(90.0));
        assert_eq!(clock.bpm(), 90.0);
    }

    #[test]
    fn test_start_stop_flag() {
        let (_source, clock) = manual_clock(0.0);
        assert!(!clock.is_running());
        clock.start();
        assert!(clock.is_running());
        clock.stop();
        assert!(!clock.is_running());
    }
}
