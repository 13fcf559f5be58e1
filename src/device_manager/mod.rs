pub mod models;
pub mod surveillance_station;

pub use models::{CameraDescriptor, CameraEvent, CameraId, EventId};
pub use surveillance_station::SurveillanceStationClient;

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

/// Capability the poll cycle needs from a video recorder.
///
/// Session handling belongs to the implementation: a lost session surfaces as
/// [`crate::Error::Authentication`] and is recovered with [`EventSource::authenticate`].
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Open (or reopen) an authenticated session
    async fn authenticate(&self) -> Result<()>;

    /// Close the session, best effort
    async fn logout(&self) -> Result<()>;

    /// Current camera roster
    async fn list_cameras(&self) -> Result<Vec<CameraDescriptor>>;

    /// Recordings of `camera_id` started at or after `since`, ascending by id
    async fn list_events(&self, camera_id: CameraId, since: DateTime<Local>) -> Result<Vec<CameraEvent>>;

    /// Download a recording into `dest_dir`, returning the local file
    async fn fetch_recording(&self, event_id: EventId, dest_dir: &Path) -> Result<PathBuf>;

    /// Current still image of a camera
    async fn fetch_snapshot(&self, camera_id: CameraId) -> Result<Bytes>;
}
