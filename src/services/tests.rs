use super::converter::{ConversionParams, Converter};
use super::motion_events::MotionEventProcessor;
use super::scheduler::{PollScheduler, SchedulerState};
use super::snapshot::SnapshotService;
use crate::config::{CameraConfig, CameraMode, MessageEncoding};
use crate::db::repositories::ProcessedEventsRepository;
use crate::db::DatabaseService;
use crate::device_manager::models::{CameraDescriptor, CameraEvent, CameraId, EventId};
use crate::device_manager::EventSource;
use crate::error::{Error, Result};
use crate::messaging::{OutgoingMessage, Publisher};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Local, Utc};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct FakeSource {
    cameras: Mutex<Vec<CameraDescriptor>>,
    events: Mutex<Vec<CameraEvent>>,
    failing_downloads: Mutex<Vec<EventId>>,
    failing_listings: Mutex<Vec<CameraId>>,
    session_lost: AtomicBool,
    reject_login: AtomicBool,
    authenticate_calls: AtomicUsize,
    fetched: Mutex<Vec<EventId>>,
    snapshots: AtomicUsize,
}

#[async_trait]
impl EventSource for FakeSource {
    async fn authenticate(&self) -> Result<()> {
        self.authenticate_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject_login.load(Ordering::SeqCst) {
            return Err(Error::Authentication(
                "Surveillance Station login failed: no such account or incorrect password (code 400)".into(),
            ));
        }
        self.session_lost.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        Ok(())
    }

    async fn list_cameras(&self) -> Result<Vec<CameraDescriptor>> {
        if self.session_lost.load(Ordering::SeqCst) {
            return Err(Error::Authentication("session timeout (code 106)".into()));
        }
        Ok(self.cameras.lock().unwrap().clone())
    }

    async fn list_events(&self, camera_id: CameraId, _since: DateTime<Local>) -> Result<Vec<CameraEvent>> {
        if self.failing_listings.lock().unwrap().contains(&camera_id) {
            return Err(Error::SourceQuery(format!(
                "SYNO.SurveillanceStation.Recording.List returned HTTP 502 for camera {}",
                camera_id
            )));
        }
        Ok(self.events.lock().unwrap().clone())
    }

    async fn fetch_recording(&self, event_id: EventId, dest_dir: &Path) -> Result<PathBuf> {
        self.fetched.lock().unwrap().push(event_id);
        if self.failing_downloads.lock().unwrap().contains(&event_id) {
            return Err(Error::Download(format!("Incomplete transfer for {}", event_id)));
        }

        let path = dest_dir.join(format!("{}.mp4", event_id));
        tokio::fs::write(&path, b"mp4").await.unwrap();
        Ok(path)
    }

    async fn fetch_snapshot(&self, _camera_id: CameraId) -> Result<Bytes> {
        self.snapshots.fetch_add(1, Ordering::SeqCst);
        Ok(Bytes::from_static(b"JFIF"))
    }
}

#[derive(Default)]
struct FakeConverter {
    fail: AtomicBool,
}

#[async_trait]
impl Converter for FakeConverter {
    async fn convert(&self, input: &Path, _params: &ConversionParams) -> Result<PathBuf> {
        tokio::fs::remove_file(input).await.unwrap();
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Conversion("ffmpeg exited with exit status: 1".into()));
        }

        let output = input.with_extension("gif");
        tokio::fs::write(&output, b"GIF89a").await.unwrap();
        Ok(output)
    }
}

#[derive(Default)]
struct FakePublisher {
    fail: AtomicBool,
    attempts: AtomicUsize,
    delivered: Mutex<Vec<OutgoingMessage>>,
}

impl FakePublisher {
    fn delivered(&self) -> Vec<OutgoingMessage> {
        self.delivered.lock().unwrap().clone()
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Publisher for FakePublisher {
    async fn publish(&self, message: &OutgoingMessage) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Publish("no acknowledgment".into()));
        }
        self.delivered.lock().unwrap().push(message.clone());
        Ok(())
    }
}

struct Harness {
    source: Arc<FakeSource>,
    converter: Arc<FakeConverter>,
    publisher: Arc<FakePublisher>,
    pool: Arc<sqlx::SqlitePool>,
    ledger: ProcessedEventsRepository,
    processor: Arc<MotionEventProcessor>,
    snapshots: Arc<SnapshotService>,
    dir: tempfile::TempDir,
}

impl Harness {
    async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = DatabaseService::in_memory().await.unwrap();
        let ledger = ProcessedEventsRepository::new(db.pool.clone());

        let source = Arc::new(FakeSource::default());
        let converter = Arc::new(FakeConverter::default());
        let publisher = Arc::new(FakePublisher::default());

        let processor = Arc::new(MotionEventProcessor::new(
            source.clone(),
            ledger.clone(),
            converter.clone(),
            publisher.clone(),
            dir.path(),
            "base",
            15,
        ));
        let snapshots = Arc::new(SnapshotService::new(
            source.clone(),
            publisher.clone(),
            dir.path(),
            "base",
        ));

        Self {
            source,
            converter,
            publisher,
            pool: db.pool.clone(),
            ledger,
            processor,
            snapshots,
            dir,
        }
    }

    fn with_events(self, events: Vec<CameraEvent>) -> Self {
        *self.source.events.lock().unwrap() = events;
        self
    }

    fn fetched(&self) -> Vec<EventId> {
        self.source.fetched.lock().unwrap().clone()
    }

    async fn ledger_entry(&self, camera_id: CameraId) -> Option<EventId> {
        self.ledger
            .get_by_camera(camera_id)
            .await
            .unwrap()
            .map(|entry| entry.last_event_id)
    }

    fn scheduler(&self, cameras: Vec<CameraConfig>, interval: Duration) -> PollScheduler {
        PollScheduler::new(
            self.source.clone(),
            cameras,
            self.processor.clone(),
            self.snapshots.clone(),
            interval,
        )
    }
}

fn event(id: EventId, camera_id: CameraId) -> CameraEvent {
    CameraEvent {
        id,
        camera_id,
        camera_name: format!("camera{}", camera_id),
        file_path: PathBuf::from(format!("/volume1/surveillance/{}.mp4", id)),
        start_time: None,
    }
}

fn event_camera(id: CameraId, topic_name: &str, encoding: MessageEncoding) -> CameraConfig {
    CameraConfig {
        id,
        mode: CameraMode::EventToGif,
        topic_name: topic_name.to_string(),
        encoding,
        scale: 320,
        skip_first_secs: None,
        max_length_secs: None,
    }
}

fn snapshot_camera(id: CameraId, topic_name: &str) -> CameraConfig {
    CameraConfig {
        mode: CameraMode::Snapshot,
        ..event_camera(id, topic_name, MessageEncoding::EmbeddedBinary)
    }
}

fn descriptor(id: CameraId, name: &str) -> CameraDescriptor {
    CameraDescriptor {
        id,
        name: name.to_string(),
        model: None,
        vendor: None,
        ip: None,
        enabled: true,
    }
}

#[tokio::test]
async fn new_event_is_published_then_recorded() {
    let h = Harness::new().await.with_events(vec![event(501, 7)]);
    let camera = event_camera(7, "topic7", MessageEncoding::InlineReference);

    h.processor.poll_camera(&camera).await;

    let delivered = h.publisher.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].topic, "base/topic7");
    assert_eq!(delivered[0].payload, b"501.gif");
    assert_eq!(h.ledger_entry(7).await, Some(501));
    assert!(!h.dir.path().join("501.mp4").exists());
}

#[tokio::test]
async fn failed_publish_leaves_ledger_untouched_and_retries() {
    let h = Harness::new().await.with_events(vec![event(501, 7)]);
    let camera = event_camera(7, "topic7", MessageEncoding::InlineReference);
    h.publisher.fail.store(true, Ordering::SeqCst);

    h.processor.poll_camera(&camera).await;
    assert_eq!(h.publisher.attempts(), 1);
    assert_eq!(h.ledger_entry(7).await, None);

    // next cycle goes through fetch, convert and publish again
    h.processor.poll_camera(&camera).await;
    assert_eq!(h.fetched(), vec![501, 501]);
    assert_eq!(h.publisher.attempts(), 2);
    assert_eq!(h.ledger_entry(7).await, None);

    h.publisher.fail.store(false, Ordering::SeqCst);
    h.processor.poll_camera(&camera).await;
    assert_eq!(h.ledger_entry(7).await, Some(501));
    assert_eq!(h.publisher.delivered().len(), 1);
}

#[tokio::test]
async fn handled_events_are_not_fetched_again() {
    let h = Harness::new().await.with_events(vec![event(501, 7)]);
    let camera = event_camera(7, "topic7", MessageEncoding::InlineReference);
    h.ledger.record_handled(7, 501, Utc::now()).await.unwrap();

    h.processor.poll_camera(&camera).await;
    h.processor.poll_camera(&camera).await;

    assert!(h.fetched().is_empty());
    assert_eq!(h.publisher.attempts(), 0);
}

#[tokio::test]
async fn repeated_cycles_publish_once() {
    let h = Harness::new().await.with_events(vec![event(501, 7), event(502, 7)]);
    let camera = event_camera(7, "topic7", MessageEncoding::InlineReference);

    h.processor.poll_camera(&camera).await;
    h.processor.poll_camera(&camera).await;

    assert_eq!(h.publisher.attempts(), 2);
    assert_eq!(h.fetched(), vec![501, 502]);
    assert_eq!(h.ledger_entry(7).await, Some(502));
}

#[tokio::test]
async fn conversion_failure_skips_publish_and_removes_recording() {
    let h = Harness::new().await.with_events(vec![event(501, 7)]);
    let camera = event_camera(7, "topic7", MessageEncoding::InlineReference);
    h.converter.fail.store(true, Ordering::SeqCst);

    h.processor.poll_camera(&camera).await;

    assert_eq!(h.fetched(), vec![501]);
    assert_eq!(h.publisher.attempts(), 0);
    assert_eq!(h.ledger_entry(7).await, None);
    assert!(!h.dir.path().join("501.mp4").exists());
}

#[cfg(unix)]
#[tokio::test]
async fn ffmpeg_failure_removes_recording_from_working_dir() {
    let h = Harness::new().await.with_events(vec![event(501, 7)]);
    let processor = MotionEventProcessor::new(
        h.source.clone(),
        h.ledger.clone(),
        Arc::new(super::FfmpegConverter::new("false")),
        h.publisher.clone(),
        h.dir.path(),
        "base",
        15,
    );

    processor
        .poll_camera(&event_camera(7, "topic7", MessageEncoding::InlineReference))
        .await;

    assert_eq!(h.fetched(), vec![501]);
    assert!(!h.dir.path().join("501.mp4").exists());
    assert_eq!(h.publisher.attempts(), 0);
    assert_eq!(h.ledger_entry(7).await, None);
}

#[tokio::test]
async fn events_of_other_cameras_are_ignored() {
    let h = Harness::new().await.with_events(vec![event(600, 8), event(501, 7)]);
    let camera = event_camera(7, "topic7", MessageEncoding::InlineReference);

    h.processor.poll_camera(&camera).await;

    assert_eq!(h.fetched(), vec![501]);
    assert_eq!(h.ledger_entry(7).await, Some(501));
    assert_eq!(h.ledger_entry(8).await, None);
}

#[tokio::test]
async fn later_success_shadows_earlier_failure() {
    let h = Harness::new().await.with_events(vec![event(501, 7), event(502, 7)]);
    let camera = event_camera(7, "topic7", MessageEncoding::InlineReference);
    h.source.failing_downloads.lock().unwrap().push(501);

    h.processor.poll_camera(&camera).await;

    // 501 failing does not keep 502 from being published
    assert_eq!(h.fetched(), vec![501, 502]);
    assert_eq!(h.publisher.delivered()[0].payload, b"502.gif");
    assert_eq!(h.ledger_entry(7).await, Some(502));

    // the per-camera ceiling now covers 501 even though it never went out
    h.source.failing_downloads.lock().unwrap().clear();
    h.processor.poll_camera(&camera).await;
    assert_eq!(h.fetched(), vec![501, 502]);
    assert_eq!(h.publisher.attempts(), 1);
}

#[tokio::test]
async fn embedded_encoding_carries_gif_bytes() {
    let h = Harness::new().await.with_events(vec![event(501, 7)]);
    let camera = event_camera(7, "topic7", MessageEncoding::EmbeddedBinary);

    h.processor.poll_camera(&camera).await;

    let delivered = h.publisher.delivered();
    assert_eq!(delivered[0].payload, b"GIF89a");
    assert_eq!(delivered[0].encoding, MessageEncoding::EmbeddedBinary);
}

#[tokio::test]
async fn unrecorded_publish_is_counted() {
    let h = Harness::new().await.with_events(vec![event(501, 7)]);
    let camera = event_camera(7, "topic7", MessageEncoding::InlineReference);

    // reads keep working, writes fail
    sqlx::query(
        "CREATE TRIGGER reject_ledger_writes BEFORE INSERT ON processed_events \
         BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END;",
    )
    .execute(&*h.pool)
    .await
    .unwrap();

    h.processor.poll_camera(&camera).await;

    assert_eq!(h.publisher.delivered().len(), 1);
    assert_eq!(h.ledger_entry(7).await, None);
    assert_eq!(h.processor.ledger_faults(), 1);
}

#[tokio::test]
async fn snapshot_always_fetches_and_publishes_once() {
    let h = Harness::new().await;
    let camera = snapshot_camera(7, "topic7");
    h.ledger.record_handled(7, 501, Utc::now()).await.unwrap();

    h.snapshots.snap_camera(&camera).await;
    assert_eq!(h.source.snapshots.load(Ordering::SeqCst), 1);
    assert_eq!(h.publisher.attempts(), 1);

    h.snapshots.snap_camera(&camera).await;
    assert_eq!(h.source.snapshots.load(Ordering::SeqCst), 2);
    assert_eq!(h.publisher.attempts(), 2);

    let delivered = h.publisher.delivered();
    assert_eq!(delivered[0].topic, "base/topic7");
    assert_eq!(delivered[0].payload, b"JFIF");

    // ledger untouched
    let entries = h.ledger.list_all().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].last_event_id, 501);
}

#[tokio::test]
async fn snapshot_publish_failure_is_not_fatal() {
    let h = Harness::new().await;
    h.publisher.fail.store(true, Ordering::SeqCst);

    h.snapshots.snap_camera(&snapshot_camera(7, "topic7")).await;

    assert_eq!(h.publisher.attempts(), 1);
    assert!(h.ledger.list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn static_configuration_filters_roster() {
    let h = Harness::new().await;
    let scheduler = h.scheduler(
        vec![
            event_camera(7, "topic7", MessageEncoding::InlineReference),
            snapshot_camera(8, "garden"),
        ],
        Duration::from_secs(10),
    );

    let resolved = scheduler.resolve_cameras(&[
        descriptor(9, "Attic"),
        descriptor(8, "Garden"),
        descriptor(7, "Driveway"),
    ]);

    assert_eq!(resolved.iter().map(|c| c.id).collect::<Vec<_>>(), vec![8, 7]);
    assert_eq!(resolved[0].mode, CameraMode::Snapshot);
}

#[tokio::test]
async fn empty_configuration_polls_discovered_cameras() {
    let h = Harness::new().await;
    let scheduler = h.scheduler(vec![], Duration::from_secs(10));

    let mut disabled = descriptor(9, "Attic");
    disabled.enabled = false;
    let resolved = scheduler.resolve_cameras(&[descriptor(7, "Front Door"), disabled]);

    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].topic_name, "front_door");
    assert_eq!(resolved[0].mode, CameraMode::EventToGif);
}

#[tokio::test]
async fn tick_dispatches_by_mode() {
    let h = Harness::new().await.with_events(vec![event(501, 7)]);
    *h.source.cameras.lock().unwrap() = vec![descriptor(7, "Driveway"), descriptor(8, "Garden")];
    let scheduler = h.scheduler(
        vec![
            event_camera(7, "topic7", MessageEncoding::InlineReference),
            snapshot_camera(8, "garden"),
        ],
        Duration::from_secs(10),
    );

    scheduler.tick(&CancellationToken::new()).await;

    let topics: Vec<String> = h.publisher.delivered().into_iter().map(|m| m.topic).collect();
    assert_eq!(topics, vec!["base/topic7".to_string(), "base/garden".to_string()]);
    assert_eq!(h.ledger_entry(7).await, Some(501));
    assert_eq!(h.ledger_entry(8).await, None);
    assert_eq!(scheduler.state().await, SchedulerState::Idle);
}

#[tokio::test]
async fn tick_continues_after_camera_listing_failure() {
    let h = Harness::new().await.with_events(vec![event(501, 7), event(601, 8)]);
    *h.source.cameras.lock().unwrap() = vec![descriptor(7, "Driveway"), descriptor(8, "Porch")];
    h.source.failing_listings.lock().unwrap().push(7);
    let scheduler = h.scheduler(
        vec![
            event_camera(7, "topic7", MessageEncoding::InlineReference),
            event_camera(8, "topic8", MessageEncoding::InlineReference),
        ],
        Duration::from_secs(10),
    );

    scheduler.tick(&CancellationToken::new()).await;

    let topics: Vec<String> = h.publisher.delivered().into_iter().map(|m| m.topic).collect();
    assert_eq!(topics, vec!["base/topic8".to_string()]);
    assert_eq!(h.fetched(), vec![601]);
    assert_eq!(h.ledger_entry(7).await, None);
    assert_eq!(h.ledger_entry(8).await, Some(601));
    assert_eq!(scheduler.state().await, SchedulerState::Idle);
}

#[tokio::test]
async fn start_fails_when_authentication_rejected() {
    let h = Harness::new().await;
    h.source.reject_login.store(true, Ordering::SeqCst);
    let scheduler = h.scheduler(vec![], Duration::from_secs(10));

    let err = scheduler.start().await.unwrap_err();

    assert!(err.is_auth());
    assert_eq!(h.source.authenticate_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn lost_session_skips_tick_and_reauthenticates() {
    let h = Harness::new().await.with_events(vec![event(501, 7)]);
    *h.source.cameras.lock().unwrap() = vec![descriptor(7, "Driveway")];
    h.source.session_lost.store(true, Ordering::SeqCst);
    let scheduler = h.scheduler(
        vec![event_camera(7, "topic7", MessageEncoding::InlineReference)],
        Duration::from_secs(10),
    );

    scheduler.tick(&CancellationToken::new()).await;
    assert_eq!(h.source.authenticate_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.publisher.attempts(), 0);

    scheduler.tick(&CancellationToken::new()).await;
    assert_eq!(h.publisher.attempts(), 1);
}

#[tokio::test]
async fn cancelled_tick_polls_nothing() {
    let h = Harness::new().await.with_events(vec![event(501, 7)]);
    *h.source.cameras.lock().unwrap() = vec![descriptor(7, "Driveway")];
    let scheduler = h.scheduler(
        vec![event_camera(7, "topic7", MessageEncoding::InlineReference)],
        Duration::from_secs(10),
    );

    let token = CancellationToken::new();
    token.cancel();
    scheduler.tick(&token).await;

    assert!(h.fetched().is_empty());
}

#[tokio::test]
async fn run_polls_until_cancelled() {
    let h = Harness::new().await.with_events(vec![event(501, 7)]);
    *h.source.cameras.lock().unwrap() = vec![descriptor(7, "Driveway")];
    let scheduler = Arc::new(h.scheduler(
        vec![event_camera(7, "topic7", MessageEncoding::InlineReference)],
        Duration::from_millis(10),
    ));

    scheduler.start().await.unwrap();
    assert_eq!(h.source.authenticate_calls.load(Ordering::SeqCst), 1);

    let token = CancellationToken::new();
    let runner = {
        let scheduler = scheduler.clone();
        let token = token.clone();
        tokio::spawn(async move { scheduler.run(token).await })
    };

    tokio::time::sleep(Duration::from_millis(200)).await;
    token.cancel();
    tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(scheduler.state().await, SchedulerState::Stopped);
    // many ticks, one publish
    assert_eq!(h.publisher.attempts(), 1);
    assert_eq!(h.ledger_entry(7).await, Some(501));
}
