use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Camera identifier as assigned by the recorder
pub type CameraId = i64;

/// Recording identifier, increasing per camera
pub type EventId = i64;

/// A camera known to the recorder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraDescriptor {
    pub id: CameraId,
    pub name: String,
    pub model: Option<String>,
    pub vendor: Option<String>,
    pub ip: Option<String>,
    pub enabled: bool,
}

/// One motion-triggered recording reported by the recorder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraEvent {
    pub id: EventId,
    pub camera_id: CameraId,
    pub camera_name: String,
    /// Path of the recording on the recorder's volume
    pub file_path: PathBuf,
    pub start_time: Option<DateTime<Utc>>,
}
