use crate::db::models::ProcessedEvent;
use crate::device_manager::models::{CameraId, EventId};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use log::debug;
use sqlx::SqlitePool;
use std::sync::Arc;

/// Durable per-camera record of the highest event already published
#[derive(Clone)]
pub struct ProcessedEventsRepository {
    pool: Arc<SqlitePool>,
}

impl ProcessedEventsRepository {
    /// Create a new processed events repository
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    /// True when the camera's recorded ceiling is at or above `event_id`.
    ///
    /// This is a ceiling check, not set membership: anything at or below the
    /// last published id counts as handled.
    pub async fn is_already_handled(&self, camera_id: CameraId, event_id: EventId) -> Result<bool> {
        let ceiling: Option<EventId> = sqlx::query_scalar(
            r#"
            SELECT last_event_id
            FROM processed_events
            WHERE camera_id = ? AND last_event_id >= ?
            "#,
        )
        .bind(camera_id.to_string())
        .bind(event_id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Ledger(format!("Failed to query processed events: {}", e)))?;

        if let Some(ceiling) = ceiling {
            debug!(
                "Event {} of camera {} already processed (ledger at {})",
                event_id, camera_id, ceiling
            );
        }

        Ok(ceiling.is_some())
    }

    /// Replace the camera's row with `event_id`. Committed before returning.
    pub async fn record_handled(
        &self,
        camera_id: CameraId,
        event_id: EventId,
        processed_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            REPLACE INTO processed_events (camera_id, last_event_id, processed_date)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(camera_id.to_string())
        .bind(event_id)
        .bind(processed_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| {
            Error::Ledger(format!(
                "Failed to record event {} for camera {}: {}",
                event_id, camera_id, e
            ))
        })?;

        Ok(())
    }

    /// Ledger row of a camera, if any
    pub async fn get_by_camera(&self, camera_id: CameraId) -> Result<Option<ProcessedEvent>> {
        sqlx::query_as::<_, ProcessedEvent>(
            r#"
            SELECT camera_id, last_event_id, processed_date
            FROM processed_events
            WHERE camera_id = ?
            "#,
        )
        .bind(camera_id.to_string())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Ledger(format!("Failed to get ledger entry for camera {}: {}", camera_id, e)))
    }

    /// Every ledger row
    pub async fn list_all(&self) -> Result<Vec<ProcessedEvent>> {
        sqlx::query_as::<_, ProcessedEvent>(
            r#"
            SELECT camera_id, last_event_id, processed_date
            FROM processed_events
            ORDER BY camera_id
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Ledger(format!("Failed to list ledger entries: {}", e)))
    }
}
