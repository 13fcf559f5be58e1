use crate::config::CameraConfig;
use crate::device_manager::EventSource;
use crate::error::{Error, Result};
use crate::messaging::{OutgoingMessage, Publisher};
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;

/// Publishes a fresh still image on every tick; no ledger involved.
pub struct SnapshotService {
    source: Arc<dyn EventSource>,
    publisher: Arc<dyn Publisher>,
    working_dir: PathBuf,
    base_topic: String,
}

impl SnapshotService {
    pub fn new(
        source: Arc<dyn EventSource>,
        publisher: Arc<dyn Publisher>,
        working_dir: impl Into<PathBuf>,
        base_topic: impl Into<String>,
    ) -> Self {
        Self {
            source,
            publisher,
            working_dir: working_dir.into(),
            base_topic: base_topic.into(),
        }
    }

    /// Fetch and publish one snapshot; failures are logged only
    pub async fn snap_camera(&self, camera: &CameraConfig) {
        match self.publish_snapshot(camera).await {
            Ok(topic) => info!("Published snapshot of camera {} to {}", camera.id, topic),
            Err(e) => error!("Snapshot of camera {} not published: {}", camera.id, e),
        }
    }

    async fn publish_snapshot(&self, camera: &CameraConfig) -> Result<String> {
        let image = self.source.fetch_snapshot(camera.id).await?;

        // Same encoding rule as recordings, so the image lands on disk first
        let path = self.working_dir.join(format!("{}_snapshot.jpg", camera.id));
        tokio::fs::write(&path, &image)
            .await
            .map_err(|e| Error::Io(format!("Failed to write {}: {}", path.display(), e)))?;

        let message =
            OutgoingMessage::from_artifact(camera.topic(&self.base_topic), camera.encoding, &path).await?;
        self.publisher.publish(&message).await?;

        Ok(message.topic)
    }
}
