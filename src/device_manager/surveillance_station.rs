// Synology Surveillance Station Web API client
//
// Only the handful of calls the relay needs: login/logout, camera list,
// recording list, recording download and camera snapshot.

use crate::config::SurveillanceConfig;
use crate::device_manager::models::{CameraDescriptor, CameraEvent, CameraId, EventId};
use crate::device_manager::EventSource;
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Local, TimeZone, Utc};
use futures_util::StreamExt;
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use url::Url;

const AUTH_API: &str = "SYNO.API.Auth";
const CAMERA_API: &str = "SYNO.SurveillanceStation.Camera";
const RECORDING_API: &str = "SYNO.SurveillanceStation.Recording";
const SESSION_NAME: &str = "SurveillanceStation";

/// Generic envelope of every JSON answer
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: i64,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    sid: String,
}

#[derive(Debug, Deserialize)]
struct CameraListData {
    #[serde(default)]
    cameras: Vec<CameraEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CameraEntry {
    id: CameraId,
    #[serde(default)]
    new_name: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    vendor: Option<String>,
    #[serde(default)]
    ip: Option<String>,
    #[serde(default)]
    enabled: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RecordingListData {
    #[serde(default)]
    recordings: Vec<RecordingEntry>,
    /// Recordings matching the query across all pages
    #[serde(default)]
    total: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordingEntry {
    id: EventId,
    camera_id: CameraId,
    #[serde(default)]
    camera_name: String,
    #[serde(default)]
    file_path: String,
    /// Unix seconds
    #[serde(default)]
    start_time: Option<i64>,
}

impl From<CameraEntry> for CameraDescriptor {
    fn from(entry: CameraEntry) -> Self {
        Self {
            id: entry.id,
            name: entry
                .new_name
                .or(entry.name)
                .unwrap_or_else(|| format!("camera{}", entry.id)),
            model: entry.model,
            vendor: entry.vendor,
            ip: entry.ip,
            enabled: entry.enabled.unwrap_or(true),
        }
    }
}

impl From<RecordingEntry> for CameraEvent {
    fn from(entry: RecordingEntry) -> Self {
        Self {
            id: entry.id,
            camera_id: entry.camera_id,
            camera_name: entry.camera_name,
            file_path: PathBuf::from(entry.file_path),
            start_time: entry
                .start_time
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        }
    }
}

/// Session-class failures: the sid is gone and a new login is required.
fn is_session_error(code: i64) -> bool {
    matches!(code, 105 | 106 | 107 | 119)
}

/// Map a Surveillance Station error code to the crate taxonomy.
fn classify_api_error(code: i64, what: &str, fallback: fn(String) -> Error) -> Error {
    if is_session_error(code) {
        Error::Authentication(format!("{} rejected, session no longer valid (code {})", what, code))
    } else {
        fallback(format!("{} failed with API error code {}", what, code))
    }
}

fn login_error_message(code: i64) -> &'static str {
    match code {
        400 => "no such account or incorrect password",
        401 => "account disabled",
        402 => "permission denied",
        403 => "2-step verification code required",
        404 => "failed to authenticate 2-step verification code",
        _ => "login refused",
    }
}

/// Recordings in ascending id order, each id once
fn into_events(recordings: Vec<RecordingEntry>) -> Vec<CameraEvent> {
    let mut events: Vec<CameraEvent> = recordings.into_iter().map(CameraEvent::from).collect();
    events.sort_by_key(|event| event.id);
    // pages shift when a recording lands between two requests
    events.dedup_by_key(|event| event.id);
    events
}

fn is_json(response: &reqwest::Response) -> bool {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map_or(false, |value| value.contains("json"))
}

/// Surveillance Station implementation of [`EventSource`]
pub struct SurveillanceStationClient {
    http: reqwest::Client,
    base_url: Url,
    username: String,
    password: String,
    event_page_limit: u32,
    sid: RwLock<Option<String>>,
}

impl SurveillanceStationClient {
    pub fn new(config: &SurveillanceConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url())
            .map_err(|e| Error::Config(format!("Invalid surveillance station address: {}", e)))?;

        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(!config.verify_tls)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url,
            username: config.username.clone(),
            password: config.password.clone(),
            event_page_limit: config.event_page_limit,
            sid: RwLock::new(None),
        })
    }

    fn endpoint(&self, cgi: &str) -> Result<Url> {
        self.base_url
            .join(&format!("webapi/{}", cgi))
            .map_err(|e| Error::Config(format!("Invalid API endpoint {}: {}", cgi, e)))
    }

    async fn session(&self) -> Result<String> {
        self.sid
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::Authentication("No active Surveillance Station session".to_string()))
    }

    async fn invalidate_session(&self) {
        if self.sid.write().await.take().is_some() {
            warn!("Surveillance Station session invalidated");
        }
    }

    /// Error handling shared by every sid-bearing call
    async fn fail(&self, err: Error) -> Error {
        if err.is_auth() {
            self.invalidate_session().await;
        }
        err
    }

    /// GET `webapi/entry.cgi` with the session id attached
    async fn request(
        &self,
        api: &str,
        method: &str,
        version: u32,
        params: &[(&str, String)],
        fallback: fn(String) -> Error,
    ) -> Result<reqwest::Response> {
        let sid = self.session().await?;
        let what = format!("{}.{}", api, method);

        let response = self
            .http
            .get(self.endpoint("entry.cgi")?)
            .query(&[
                ("api", api.to_string()),
                ("method", method.to_string()),
                ("version", version.to_string()),
                ("_sid", sid),
            ])
            .query(params)
            .send()
            .await
            .map_err(|e| fallback(format!("{} request failed: {}", what, e)))?;

        if !response.status().is_success() {
            return Err(fallback(format!("{} returned HTTP {}", what, response.status())));
        }

        Ok(response)
    }

    /// Decode the JSON envelope of an answer
    async fn call<T: DeserializeOwned>(
        &self,
        api: &str,
        method: &str,
        version: u32,
        params: &[(&str, String)],
        fallback: fn(String) -> Error,
    ) -> Result<T> {
        let what = format!("{}.{}", api, method);
        let response = self.request(api, method, version, params, fallback).await?;

        let body: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| fallback(format!("{} returned an unreadable body: {}", what, e)))?;

        if !body.success {
            let code = body.error.map_or(-1, |e| e.code);
            return Err(self.fail(classify_api_error(code, &what, fallback)).await);
        }

        body.data
            .ok_or_else(|| fallback(format!("{} returned no data", what)))
    }

    /// Binary resource; a JSON answer means the API refused.
    async fn get_binary(
        &self,
        api: &str,
        method: &str,
        version: u32,
        params: &[(&str, String)],
        fallback: fn(String) -> Error,
    ) -> Result<reqwest::Response> {
        let what = format!("{}.{}", api, method);
        let response = self.request(api, method, version, params, fallback).await?;

        if is_json(&response) {
            let body: ApiResponse<serde_json::Value> = response
                .json()
                .await
                .map_err(|e| fallback(format!("{} returned an unreadable body: {}", what, e)))?;
            let code = body.error.map_or(-1, |e| e.code);
            return Err(self.fail(classify_api_error(code, &what, fallback)).await);
        }

        Ok(response)
    }

    async fn stream_to_file(response: reqwest::Response, path: &Path) -> Result<u64> {
        let expected = response.content_length();
        let mut file = tokio::fs::File::create(path)
            .await
            .map_err(|e| Error::Download(format!("Failed to create {}: {}", path.display(), e)))?;

        let mut written: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::Download(format!("Transfer interrupted: {}", e)))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| Error::Download(format!("Failed to write {}: {}", path.display(), e)))?;
            written += chunk.len() as u64;
        }

        file.flush()
            .await
            .map_err(|e| Error::Download(format!("Failed to flush {}: {}", path.display(), e)))?;

        match expected {
            Some(expected) if expected != written => Err(Error::Download(format!(
                "Incomplete transfer: {} of {} bytes",
                written, expected
            ))),
            _ if written == 0 => Err(Error::Download("Empty recording".to_string())),
            _ => Ok(written),
        }
    }
}

#[async_trait]
impl EventSource for SurveillanceStationClient {
    async fn authenticate(&self) -> Result<()> {
        let response = self
            .http
            .get(self.endpoint("auth.cgi")?)
            .query(&[
                ("api", AUTH_API),
                ("version", "6"),
                ("method", "login"),
                ("account", self.username.as_str()),
                ("passwd", self.password.as_str()),
                ("session", SESSION_NAME),
                ("format", "sid"),
            ])
            .send()
            .await
            .map_err(|e| Error::Authentication(format!("Login request failed: {}", e)))?;

        let body: ApiResponse<LoginData> = response
            .json()
            .await
            .map_err(|e| Error::Authentication(format!("Unreadable login response: {}", e)))?;

        match (body.success, body.data) {
            (true, Some(data)) => {
                info!("Surveillance Station login ok for {}", self.username);
                *self.sid.write().await = Some(data.sid);
                Ok(())
            }
            _ => {
                let code = body.error.map_or(-1, |e| e.code);
                self.invalidate_session().await;
                Err(Error::Authentication(format!(
                    "Surveillance Station login failed: {} (code {})",
                    login_error_message(code),
                    code
                )))
            }
        }
    }

    async fn logout(&self) -> Result<()> {
        let Some(sid) = self.sid.write().await.take() else {
            return Ok(());
        };

        self.http
            .get(self.endpoint("auth.cgi")?)
            .query(&[
                ("api", AUTH_API),
                ("version", "6"),
                ("method", "logout"),
                ("session", SESSION_NAME),
                ("_sid", sid.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::Authentication(format!("Logout request failed: {}", e)))?;

        info!("Surveillance Station session closed");
        Ok(())
    }

    async fn list_cameras(&self) -> Result<Vec<CameraDescriptor>> {
        let data: CameraListData = self
            .call(CAMERA_API, "List", 9, &[], Error::SourceQuery)
            .await?;

        Ok(data.cameras.into_iter().map(CameraDescriptor::from).collect())
    }

    async fn list_events(&self, camera_id: CameraId, since: DateTime<Local>) -> Result<Vec<CameraEvent>> {
        let limit = self.event_page_limit.max(1) as usize;
        let mut recordings = Vec::new();

        loop {
            let params = [
                ("cameraIds", camera_id.to_string()),
                ("fromTime", since.timestamp().to_string()),
                ("offset", recordings.len().to_string()),
                ("limit", limit.to_string()),
            ];
            let page: RecordingListData = self
                .call(RECORDING_API, "List", 6, &params, Error::SourceQuery)
                .await?;

            let received = page.recordings.len();
            recordings.extend(page.recordings);

            let done = match page.total {
                Some(total) => recordings.len() >= total,
                None => received < limit,
            };
            if received == 0 || done {
                break;
            }

            debug!(
                "Camera {} recording list continues at offset {} (total {:?})",
                camera_id,
                recordings.len(),
                page.total
            );
        }

        let events = into_events(recordings);
        debug!("Camera {} has {} recordings since {}", camera_id, events.len(), since);
        Ok(events)
    }

    async fn fetch_recording(&self, event_id: EventId, dest_dir: &Path) -> Result<PathBuf> {
        let response = self
            .get_binary(
                RECORDING_API,
                "Download",
                6,
                &[("id", event_id.to_string())],
                Error::Download,
            )
            .await?;

        let path = dest_dir.join(format!("{}.mp4", event_id));
        match Self::stream_to_file(response, &path).await {
            Ok(bytes) => {
                debug!("Downloaded recording {} ({} bytes) to {}", event_id, bytes, path.display());
                Ok(path)
            }
            Err(e) => {
                if let Err(remove_err) = tokio::fs::remove_file(&path).await {
                    debug!("No partial download to remove at {}: {}", path.display(), remove_err);
                }
                Err(e)
            }
        }
    }

    async fn fetch_snapshot(&self, camera_id: CameraId) -> Result<Bytes> {
        let response = self
            .get_binary(
                CAMERA_API,
                "GetSnapshot",
                9,
                &[("id", camera_id.to_string())],
                Error::Snapshot,
            )
            .await?;

        let image = response
            .bytes()
            .await
            .map_err(|e| Error::Snapshot(format!("Snapshot transfer failed: {}", e)))?;

        if image.is_empty() {
            return Err(Error::Snapshot(format!("Camera {} returned an empty snapshot", camera_id)));
        }

        Ok(image)
    }
}
