use sqlx::{Executor, SqlitePool};

/// Ledger table. `id` is a surrogate key; `camera_id` is the natural one.
const CREATE_PROCESSED_EVENTS: &str = r#"
CREATE TABLE IF NOT EXISTS processed_events (
    id integer PRIMARY KEY,
    camera_id text NOT NULL,
    last_event_id int NOT NULL,
    processed_date timestamp NOT NULL
);
"#;

/// At most one row per camera
const CREATE_PROCESSED_EVENTS_CAMERA_INDEX: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS idx_processed_events_camera ON processed_events (camera_id);
"#;

const MIGRATIONS: &[(&str, &str)] = &[
    ("create_processed_events", CREATE_PROCESSED_EVENTS),
    ("create_processed_events_camera_index", CREATE_PROCESSED_EVENTS_CAMERA_INDEX),
];

/// Apply every migration in order. Safe to run against an existing ledger.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for (name, sql) in MIGRATIONS {
        log::debug!("Applying migration: {}", name);
        pool.execute(*sql).await?;
    }

    Ok(())
}
