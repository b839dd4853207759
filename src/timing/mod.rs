mod clock;
mod scheduler;
mod ticker;

pub use clock::{Clock, HostClock, ManualClock, TimeSource, step_duration};
pub use scheduler::{LOOKAHEAD, ScheduledStep, Scheduler, SchedulerState};
pub use ticker::Ticker;
