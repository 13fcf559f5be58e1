pub mod config;
pub mod db;
pub mod device_manager;
pub mod error;
pub mod messaging;
pub mod services;

// Re-export main components for easier use
pub use config::{load_config, Config};
pub use error::{Error, Result};
pub use services::{MotionEventProcessor, PollScheduler, SnapshotService};
