pub mod converter;
pub mod motion_events;
pub mod scheduler;
pub mod snapshot;
#[cfg(test)]
mod tests;

pub use converter::{ConversionParams, Converter, FfmpegConverter};
pub use motion_events::MotionEventProcessor;
pub use scheduler::{PollScheduler, SchedulerState};
pub use snapshot::SnapshotService;
