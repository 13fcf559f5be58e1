use crate::config::CameraConfig;
use crate::db::repositories::ProcessedEventsRepository;
use crate::device_manager::models::CameraEvent;
use crate::device_manager::EventSource;
use crate::error::{Error, Result};
use crate::messaging::{OutgoingMessage, Publisher};
use crate::services::converter::{ConversionParams, Converter};
use chrono::{DateTime, Local, NaiveTime, TimeZone, Utc};
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// What happened to one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    AlreadyHandled,
    Published,
}

/// Midnight of `now`'s calendar day in local time
pub fn start_of_local_day(now: DateTime<Local>) -> DateTime<Local> {
    start_of_day(&now)
}

/// First instant of `now`'s calendar day in its own time zone. On days where
/// midnight falls in a DST gap, the day starts at the first valid hour after it.
pub fn start_of_day<Tz: TimeZone>(now: &DateTime<Tz>) -> DateTime<Tz> {
    let tz = now.timezone();
    let midnight = now.date_naive().and_time(NaiveTime::MIN);

    tz.from_local_datetime(&midnight)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(midnight + chrono::Duration::hours(1))).earliest())
        .unwrap_or_else(|| now.clone())
}

/// Per-camera event cycle: dedup check, fetch, convert, publish, ledger advance.
pub struct MotionEventProcessor {
    source: Arc<dyn EventSource>,
    ledger: ProcessedEventsRepository,
    converter: Arc<dyn Converter>,
    publisher: Arc<dyn Publisher>,
    working_dir: PathBuf,
    base_topic: String,
    fps: u32,
    /// Publishes that succeeded but could not be recorded
    ledger_faults: AtomicU64,
}

impl MotionEventProcessor {
    pub fn new(
        source: Arc<dyn EventSource>,
        ledger: ProcessedEventsRepository,
        converter: Arc<dyn Converter>,
        publisher: Arc<dyn Publisher>,
        working_dir: impl Into<PathBuf>,
        base_topic: impl Into<String>,
        fps: u32,
    ) -> Self {
        Self {
            source,
            ledger,
            converter,
            publisher,
            working_dir: working_dir.into(),
            base_topic: base_topic.into(),
            fps,
            ledger_faults: AtomicU64::new(0),
        }
    }

    /// Total count of published-but-unrecorded events since start
    pub fn ledger_faults(&self) -> u64 {
        self.ledger_faults.load(Ordering::Relaxed)
    }

    /// Run one cycle for `camera` covering today's recordings
    pub async fn poll_camera(&self, camera: &CameraConfig) {
        self.poll_camera_since(camera, start_of_local_day(Local::now())).await
    }

    /// Run one cycle for `camera` over the recordings started since `since`.
    ///
    /// Failures are logged per event and never abort later events.
    pub async fn poll_camera_since(&self, camera: &CameraConfig, since: DateTime<Local>) {
        info!(
            "Start getting camera events for camera {} {}",
            camera.id, camera.topic_name
        );

        let events = match self.source.list_events(camera.id, since).await {
            Ok(events) => events,
            Err(e) => {
                error!("Failed to list events for camera {}: {}", camera.id, e);
                return;
            }
        };

        if events.is_empty() {
            info!("No event found for camera {} {}", camera.id, camera.topic_name);
            return;
        }

        let params = ConversionParams::for_camera(camera, self.fps);

        for event in &events {
            if event.camera_id != camera.id {
                debug!(
                    "Event {} belongs to camera {}, not {}",
                    event.id, event.camera_id, camera.id
                );
                continue;
            }

            match self.process_event(camera, &params, event).await {
                Ok(EventOutcome::AlreadyHandled) => {
                    debug!("Event {} already processed", event.id);
                }
                Ok(EventOutcome::Published) => {
                    info!("Done processing event {} of camera {}", event.id, camera.id);
                }
                Err(e @ Error::Ledger(_)) => {
                    error!("Event {} of camera {}: {}", event.id, camera.id, e);
                }
                Err(e) => {
                    error!(
                        "Event {} of camera {} not published, will retry next cycle: {}",
                        event.id, camera.id, e
                    );
                }
            }
        }
    }

    /// The five-step sequence for one event; the ledger only moves after an acknowledged publish.
    pub async fn process_event(
        &self,
        camera: &CameraConfig,
        params: &ConversionParams,
        event: &CameraEvent,
    ) -> Result<EventOutcome> {
        if self.ledger.is_already_handled(camera.id, event.id).await? {
            return Ok(EventOutcome::AlreadyHandled);
        }

        info!(
            "Downloading event {} ({}) of camera {}",
            event.id,
            event.file_path.display(),
            event.camera_name
        );
        let raw = self.source.fetch_recording(event.id, &self.working_dir).await?;

        let converted = self.converter.convert(&raw, params).await?;

        let message =
            OutgoingMessage::from_artifact(camera.topic(&self.base_topic), camera.encoding, &converted)
                .await?;
        info!(
            "Publishing event {} to {} ({})",
            event.id,
            message.topic,
            message.summary()
        );
        self.publisher.publish(&message).await?;

        if let Err(e) = self.ledger.record_handled(camera.id, event.id, Utc::now()).await {
            self.ledger_faults.fetch_add(1, Ordering::Relaxed);
            warn!(
                "Event {} was published but not recorded; it will be published again",
                event.id
            );
            return Err(e);
        }

        Ok(EventOutcome::Published)
    }
}
