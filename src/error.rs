use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClockError {
    #[error("Monotonic time source unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to resume time source: {0}")]
    Resume(String),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Pattern must contain at least one step")]
    EmptyPattern,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to access preset: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse preset: {0}")]
    Parse(#[from] ron::error::SpannedError),

    #[error("Failed to serialize preset: {0}")]
    Serialize(#[from] ron::Error),

    #[error("Tempo must be a positive number of beats per minute, got {0}")]
    InvalidTempo(f64),

    #[error("Step division must be at least 1")]
    InvalidDivision,

    #[error("Pattern must contain at least one step")]
    EmptyPattern,

    #[error("Lookahead must be a positive number of seconds, got {0}")]
    InvalidLookahead(f64),

    #[error("{name} interval must be at least 1 ms")]
    InvalidInterval { name: &'static str },

    #[error("Track {track} note duration must be a non-negative number of seconds, got {duration}")]
    InvalidNoteDuration { track: usize, duration: f64 },
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Transport rejected message: {0}")]
    Transport(String),

    #[error("Sink disconnected")]
    Disconnected,

    #[error("No MIDI output port matching {0:?}")]
    NoPort(String),
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Clock(#[from] ClockError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("Failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}
