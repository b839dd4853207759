use crate::error::SchedulerError;

/// Seconds of future steps recognised on each tick. Must exceed the worst
/// expected delay between ticks.
pub const LOOKAHEAD: f64 = 0.1;

/// A step index paired with the exact time it should sound.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledStep {
    pub index: usize,
    pub timestamp: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
}

#[derive(Debug, Clone, Copy)]
struct Cursor {
    /// `None` until the first step of the session has been emitted.
    next_step_index: Option<usize>,
    next_step_timestamp: f64,
    /// Time into the current step, kept in `[0, step_duration)`. Only used
    /// for position reporting; emission is driven by timestamps alone.
    accumulator: f64,
    last_tick: f64,
}

/// Fixed-timestep lookahead scheduler. Each tick emits every step whose
/// timestamp falls before `now + lookahead`, stamping it with its musical
/// time rather than the time of the tick.
#[derive(Debug)]
pub struct Scheduler {
    total_steps: usize,
    lookahead: f64,
    cursor: Option<Cursor>,
}

impl Scheduler {
    pub fn new(total_steps: usize) -> Self {
        Self::with_lookahead(total_steps, LOOKAHEAD)
    }

    pub fn with_lookahead(total_steps: usize, lookahead: f64) -> Self {
        Self {
            total_steps,
            lookahead,
            cursor: None,
        }
    }

    pub fn state(&self) -> SchedulerState {
        if self.cursor.is_some() {
            SchedulerState::Running
        } else {
            SchedulerState::Idle
        }
    }

    pub fn is_running(&self) -> bool {
        self.cursor.is_some()
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    pub fn lookahead(&self) -> f64 {
        self.lookahead
    }

    pub fn accumulator(&self) -> Option<f64> {
        self.cursor.map(|c| c.accumulator)
    }

    /// Timestamp the next emitted step will carry.
    pub fn next_step_timestamp(&self) -> Option<f64> {
        self.cursor.map(|c| c.next_step_timestamp)
    }

    pub fn start(&mut self, now: f64) -> Result<(), SchedulerError> {
        if self.total_steps == 0 {
            return Err(SchedulerError::EmptyPattern);
        }

        self.cursor = Some(Cursor {
            next_step_index: None,
            next_step_timestamp: now,
            accumulator: 0.0,
            last_tick: now,
        });
        tracing::debug!(now, total_steps = self.total_steps, "scheduler started");
        Ok(())
    }

    /// Discards the cursor. Nothing emitted by later ticks until `start`.
    pub fn stop(&mut self) {
        if self.cursor.take().is_some() {
            tracing::debug!("scheduler stopped");
        }
    }

    pub fn restart(&mut self, now: f64) -> Result<(), SchedulerError> {
        self.stop();
        self.start(now)
    }

    /// Emits all steps due before `now + lookahead` and returns how many
    /// were emitted. `step_duration` is read fresh each tick so tempo
    /// changes apply from the next unemitted step on.
    pub fn tick<F>(&mut self, now: f64, step_duration: f64, mut emit: F) -> usize
    where
        F: FnMut(ScheduledStep),
    {
        let total_steps = self.total_steps;
        let lookahead = self.lookahead;
        let Some(cursor) = self.cursor.as_mut() else {
            return 0;
        };

        if !(step_duration.is_finite() && step_duration > 0.0) {
            tracing::warn!(step_duration, "skipping tick with invalid step duration");
            return 0;
        }

        let mut emitted = 0;
        while cursor.next_step_timestamp < now + lookahead {
            let index = match cursor.next_step_index {
                Some(previous) => (previous + 1) % total_steps,
                None => 0,
            };
            cursor.next_step_index = Some(index);

            let step = ScheduledStep {
                index,
                timestamp: cursor.next_step_timestamp,
            };
            tracing::trace!(index, timestamp = step.timestamp, "step scheduled");
            emit(step);

            cursor.next_step_timestamp += step_duration;
            emitted += 1;
        }

        cursor.accumulator =
            (cursor.accumulator + (now - cursor.last_tick).max(0.0)).rem_euclid(step_duration);
        cursor.last_tick = now;

        emitted
    }
}
