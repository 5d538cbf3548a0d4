//! Capture -> classify -> publish loop and its lifecycle

mod clock;
mod lifecycle;
mod scheduler;
mod sink;
mod token;

pub use clock::RefreshClock;
pub use lifecycle::{Lifecycle, PipelineConfig};
pub use scheduler::{InferenceScheduler, SchedulerState};
pub use sink::ResultSink;
pub use token::LoopToken;
