use serde::{Deserialize, Serialize};

/// Resolved parameters for one track, handed to the trigger sink when the
/// event fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TriggerParams {
    Midi {
        /// 0-15
        channel: u8,
        note: u8,
        velocity: u8,
        /// Seconds
        duration: f64,
    },
    Sample {
        sample_id: String,
        /// 0.0 -> 1.0
        velocity: f32,
    },
}

/// A trigger due at `timestamp` (seconds, clock domain). Owned by the
/// dispatcher queue until it fires or is cleared.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerEvent {
    pub timestamp: f64,
    pub payload: TriggerParams,
}

impl TriggerEvent {
    pub fn new(timestamp: f64, payload: TriggerParams) -> Self {
        Self { timestamp, payload }
    }

    pub fn is_due(&self, now: f64) -> bool {
        self.timestamp <= now
    }
}
