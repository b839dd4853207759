use crate::config::{EngineConfig, validate_bpm};
use crate::dispatcher::{Dispatcher, EventQueue, TriggerSink};
use crate::error::EngineError;
use crate::events::TriggerEvent;
use crate::pattern::{PatternSource, TrackResolver};
use crate::timing::{Clock, ScheduledStep, Scheduler, Ticker, TimeSource};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicIsize, Ordering};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    #[default]
    Stopped,
    /// Waiting for a suspended time source to resume.
    Starting,
    Running,
}

impl PlaybackState {
    pub fn is_running(&self) -> bool {
        matches!(self, PlaybackState::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MusicalPosition {
    pub current_step: Option<usize>,
    /// Fraction of the current step elapsed, 0.0 -> 1.0
    pub progress: f64,
}

const NO_STEP: isize = -1;

/// Turns scheduled steps into triggers, reading the latest pattern and
/// track parameters on every call.
struct StepRouter {
    pattern: Arc<dyn PatternSource>,
    resolver: Arc<dyn TrackResolver>,
    queue: EventQueue,
    current_step: AtomicIsize,
}

impl StepRouter {
    fn on_schedule_step(&self, step: ScheduledStep) {
        let mut scheduled = 0;
        for track in self.pattern.active_tracks(step.index) {
            match self.resolver.resolve(track) {
                Some(params) => {
                    self.queue.push(TriggerEvent::new(step.timestamp, params));
                    scheduled += 1;
                }
                None => tracing::trace!(track, step = step.index, "track unconfigured, skipped"),
            }
        }
        if scheduled > 0 {
            tracing::trace!(step = step.index, scheduled, "triggers queued");
        }
        self.current_step.store(step.index as isize, Ordering::Release);
    }

    fn current_step(&self) -> Option<usize> {
        let step = self.current_step.load(Ordering::Acquire);
        (step != NO_STEP).then_some(step as usize)
    }

    fn reset_position(&self) {
        self.current_step.store(NO_STEP, Ordering::Release);
    }
}

/// Owns one playback session: the clock, the lookahead scheduler and its
/// tick thread, and the dispatcher with its poll thread.
pub struct PlaybackEngine {
    config: EngineConfig,
    clock: Arc<Clock>,
    scheduler: Arc<Mutex<Scheduler>>,
    scheduler_ticker: Option<Ticker>,
    dispatcher: Dispatcher,
    router: Arc<StepRouter>,
    state: PlaybackState,
}

impl PlaybackEngine {
    /// Fails only if the time source is unusable. Tempo and step settings
    /// are validated by [`PlaybackEngine::start`].
    pub fn new(
        config: EngineConfig,
        time_source: Arc<dyn TimeSource>,
        pattern: Arc<dyn PatternSource>,
        resolver: Arc<dyn TrackResolver>,
        sink: Arc<dyn TriggerSink>,
    ) -> Result<Self, EngineError> {
        let clock = Arc::new(Clock::new(
            time_source,
            config.bpm,
            config.division,
            config.total_steps,
        )?);
        let dispatcher = Dispatcher::new(Arc::clone(&clock), sink, config.poll_interval());
        let router = Arc::new(StepRouter {
            pattern,
            resolver,
            queue: dispatcher.queue(),
            current_step: AtomicIsize::new(NO_STEP),
        });
        let scheduler = Scheduler::with_lookahead(config.total_steps, config.lookahead);

        Ok(Self {
            config,
            clock,
            scheduler: Arc::new(Mutex::new(scheduler)),
            scheduler_ticker: None,
            dispatcher,
            router,
            state: PlaybackState::Stopped,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn clock(&self) -> Arc<Clock> {
        Arc::clone(&self.clock)
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    pub fn bpm(&self) -> f64 {
        self.clock.bpm()
    }

    /// Picked up by the scheduler on its next tick.
    pub fn set_tempo(&mut self, bpm: f64) -> Result<(), EngineError> {
        validate_bpm(bpm)?;
        self.clock.set_bpm(bpm);
        self.config.bpm = bpm;
        tracing::debug!(bpm, "tempo changed");
        Ok(())
    }

    /// Last step handed to the dispatcher. Runs ahead of the audible step
    /// by up to the lookahead.
    pub fn current_step(&self) -> Option<usize> {
        self.router.current_step()
    }

    pub fn musical_position(&self) -> MusicalPosition {
        if !self.is_running() {
            return MusicalPosition {
                current_step: None,
                progress: 0.0,
            };
        }

        let (step, progress) = self.clock.position();
        MusicalPosition {
            current_step: Some(step),
            progress,
        }
    }

    pub fn pending_events(&self) -> usize {
        self.dispatcher.pending()
    }

    pub fn start(&mut self) -> Result<(), EngineError> {
        if self.state != PlaybackState::Stopped {
            tracing::debug!(state = ?self.state, "start ignored, already playing");
            return Ok(());
        }

        self.config.validate()?;
        validate_bpm(self.clock.bpm())?;

        self.state = PlaybackState::Starting;
        if let Err(e) = self.clock.resume() {
            self.state = PlaybackState::Stopped;
            return Err(e.into());
        }

        self.router.reset_position();
        let origin = self.clock.start();

        // The dispatcher must accept events before the first step is emitted.
        let started = self
            .dispatcher
            .start()
            .and_then(|()| self.spawn_scheduler(origin));
        if let Err(e) = started {
            tracing::error!(error = %e, "failed to start playback");
            self.stop();
            return Err(e);
        }

        self.state = PlaybackState::Running;
        tracing::info!(
            bpm = self.clock.bpm(),
            division = self.config.division,
            total_steps = self.config.total_steps,
            "playback started"
        );
        Ok(())
    }

    fn spawn_scheduler(&mut self, origin: f64) -> Result<(), EngineError> {
        self.scheduler.lock().start(origin)?;

        let clock = Arc::clone(&self.clock);
        let scheduler = Arc::clone(&self.scheduler);
        let router = Arc::clone(&self.router);

        let ticker = Ticker::spawn("tactus-scheduler", self.config.tick_interval(), move || {
            if !clock.is_running() {
                return;
            }
            let now = clock.now();
            let step_duration = clock.step_duration();
            scheduler
                .lock()
                .tick(now, step_duration, |step| router.on_schedule_step(step));
        })
        .map_err(|source| EngineError::Spawn {
            name: "scheduler",
            source,
        })?;

        self.scheduler_ticker = Some(ticker);
        Ok(())
    }

    /// Stops the scheduler, then the dispatcher (clearing its queue), then
    /// the clock. Once this returns no trigger fires and no step is
    /// scheduled.
    pub fn stop(&mut self) {
        let was_active = self.state != PlaybackState::Stopped;

        if let Some(mut ticker) = self.scheduler_ticker.take() {
            ticker.stop();
        }
        self.scheduler.lock().stop();

        self.dispatcher.stop();
        self.dispatcher.clear();

        self.clock.stop();
        self.state = PlaybackState::Stopped;

        if was_active {
            tracing::info!("playback stopped");
        }
    }

    /// Stops and resets the position. Playback resumes from step 0 only if
    /// it was running.
    pub fn restart(&mut self) -> Result<(), EngineError> {
        let was_running = self.is_running();
        self.stop();
        self.router.reset_position();

        if was_running {
            tracing::info!("restarting playback");
            self.start()?;
        }
        Ok(())
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.stop();
    }
}
