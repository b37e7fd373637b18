use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::domain::import_job::{ImportJob, LogLevel};

/// Kind of a live import event, also used verbatim as the SSE event name.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    StatusUpdate,
    ProgressUpdate,
    Log,
    Connected,
}

/// In-memory event delivered to currently-attached subscribers; never
/// persisted.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ImportEvent {
    pub job_id: Option<Uuid>,
    #[serde(rename = "event_type")]
    pub kind: EventKind,
    pub data: serde_json::Value,
}

impl ImportEvent {
    pub fn status_update(job: &ImportJob) -> Self {
        ImportEvent {
            job_id: Some(job.id),
            kind: EventKind::StatusUpdate,
            data: json!({
                "job_id": job.id,
                "status": job.status,
                "started_at": job.started_at,
                "finished_at": job.finished_at,
                "total_rows": job.total_rows,
                "processed_rows": job.processed_rows,
                "error_rows": job.error_rows,
            }),
        }
    }

    pub fn progress_update(
        job_id: Uuid,
        processed_rows: i32,
        error_rows: i32,
        total_rows: Option<i32>,
    ) -> Self {
        ImportEvent {
            job_id: Some(job_id),
            kind: EventKind::ProgressUpdate,
            data: json!({
                "job_id": job_id,
                "processed_rows": processed_rows,
                "error_rows": error_rows,
                "total_rows": total_rows,
            }),
        }
    }

    pub fn log(job_id: Uuid, level: LogLevel, message: &str, created_at: DateTime<Utc>) -> Self {
        ImportEvent {
            job_id: Some(job_id),
            kind: EventKind::Log,
            data: json!({
                "job_id": job_id,
                "level": level,
                "message": message,
                "created_at": created_at,
            }),
        }
    }

    pub fn connected(job_id: Option<Uuid>) -> Self {
        ImportEvent {
            job_id,
            kind: EventKind::Connected,
            data: json!({ "job_id": job_id }),
        }
    }
}
