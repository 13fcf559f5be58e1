use crate::config::{CameraConfig, CameraMode};
use crate::device_manager::models::CameraDescriptor;
use crate::device_manager::EventSource;
use crate::error::Result;
use crate::services::motion_events::MotionEventProcessor;
use crate::services::snapshot::SnapshotService;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Polling,
    Stopped,
}

/// Drives the per-camera cycles at a fixed interval
pub struct PollScheduler {
    source: Arc<dyn EventSource>,
    /// Static configuration; empty means every discovered camera
    cameras: Vec<CameraConfig>,
    motion_events: Arc<MotionEventProcessor>,
    snapshots: Arc<SnapshotService>,
    interval: Duration,
    state: RwLock<SchedulerState>,
    reported_ledger_faults: AtomicU64,
}

impl PollScheduler {
    /// Create a new poll scheduler
    pub fn new(
        source: Arc<dyn EventSource>,
        cameras: Vec<CameraConfig>,
        motion_events: Arc<MotionEventProcessor>,
        snapshots: Arc<SnapshotService>,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            cameras,
            motion_events,
            snapshots,
            interval,
            state: RwLock::new(SchedulerState::Idle),
            reported_ledger_faults: AtomicU64::new(0),
        }
    }

    pub async fn state(&self) -> SchedulerState {
        *self.state.read().await
    }

    async fn set_state(&self, state: SchedulerState) {
        *self.state.write().await = state;
    }

    /// Open the event source session. A failure here is fatal for the process.
    pub async fn start(&self) -> Result<()> {
        info!(
            "Starting poll scheduler with interval of {} seconds",
            self.interval.as_secs()
        );
        self.source.authenticate().await
    }

    /// Poll until `shutdown` is cancelled. A running tick finishes its
    /// current camera before the loop stops.
    pub async fn run(&self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(self.interval) => {}
            }

            self.tick(&shutdown).await;
        }

        self.set_state(SchedulerState::Stopped).await;
        info!("Poll scheduler stopped");
    }

    /// One pass over every camera
    pub async fn tick(&self, shutdown: &CancellationToken) {
        self.set_state(SchedulerState::Polling).await;

        match self.source.list_cameras().await {
            Ok(roster) => {
                for camera in self.resolve_cameras(&roster) {
                    if shutdown.is_cancelled() {
                        info!("Shutdown requested, ending tick early");
                        break;
                    }

                    match camera.mode {
                        CameraMode::EventToGif => self.motion_events.poll_camera(&camera).await,
                        CameraMode::Snapshot => self.snapshots.snap_camera(&camera).await,
                    }
                }

                self.report_ledger_faults();
            }
            Err(e) if e.is_auth() => {
                warn!("Event source session lost, no cameras this tick: {}", e);
                match self.source.authenticate().await {
                    Ok(()) => info!("Re-authenticated with the event source"),
                    Err(e) => error!("Re-authentication failed, retrying next tick: {}", e),
                }
            }
            Err(e) => {
                error!("Failed to refresh camera roster: {}", e);
            }
        }

        self.set_state(SchedulerState::Idle).await;
    }

    /// Cameras to poll this tick, in roster order
    pub fn resolve_cameras(&self, roster: &[CameraDescriptor]) -> Vec<CameraConfig> {
        if self.cameras.is_empty() {
            return roster
                .iter()
                .filter(|camera| camera.enabled)
                .map(CameraConfig::discovered)
                .collect();
        }

        roster
            .iter()
            .filter_map(|descriptor| {
                let config = self.cameras.iter().find(|camera| camera.id == descriptor.id);
                if config.is_none() {
                    debug!(
                        "Camera {} ({}) has no configuration, skipped",
                        descriptor.id, descriptor.name
                    );
                }
                config.cloned()
            })
            .collect()
    }

    fn report_ledger_faults(&self) {
        let total = self.motion_events.ledger_faults();
        let reported = self.reported_ledger_faults.swap(total, Ordering::Relaxed);
        if total > reported {
            error!(
                "{} published event(s) could not be recorded in the ledger ({} since start); they will be delivered again",
                total - reported,
                total
            );
        }
    }
}
