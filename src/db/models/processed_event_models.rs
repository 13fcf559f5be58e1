use crate::device_manager::models::{CameraId, EventId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ledger row: the highest event already published for one camera
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProcessedEvent {
    /// Stored as text for compatibility with existing ledger files
    pub camera_id: String,
    pub last_event_id: EventId,
    pub processed_date: DateTime<Utc>,
}

impl ProcessedEvent {
    pub fn camera(&self) -> Option<CameraId> {
        self.camera_id.parse().ok()
    }
}
