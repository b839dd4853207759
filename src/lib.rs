pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod events;
pub mod pattern;
pub mod preset;
pub mod sinks;
pub mod timing;

pub use config::EngineConfig;
pub use dispatcher::{Dispatcher, EventQueue, TriggerSink};
pub use engine::{MusicalPosition, PlaybackEngine, PlaybackState};
pub use error::{ClockError, ConfigError, EngineError, SchedulerError, SinkError};
pub use events::{TriggerEvent, TriggerParams};
pub use pattern::{Pattern, PatternSource, TrackResolver};
pub use preset::Preset;
pub use sinks::{ChannelSink, LogSink, MidiSink};
pub use timing::{
    Clock, HostClock, LOOKAHEAD, ManualClock, ScheduledStep, Scheduler, SchedulerState,
    TimeSource, step_duration,
};
