use std::io::Write;

use chrono::{DateTime, Utc};
use diesel::deserialize::FromSql;
use diesel::pg::{Pg, PgValue};
use diesel::prelude::*;
use diesel::serialize::{IsNull, Output, ToSql};
use diesel::{deserialize, serialize, AsExpression, FromSqlRow};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::{import_job_logs, import_jobs};

pub type PK = Uuid;

#[derive(
    AsExpression,
    FromSqlRow,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
)]
#[diesel(sql_type = crate::schema::sql_types::ImportJobStatus)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl ToSql<crate::schema::sql_types::ImportJobStatus, Pg> for JobStatus {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        match *self {
            JobStatus::Pending => out.write_all(b"pending")?,
            JobStatus::Processing => out.write_all(b"processing")?,
            JobStatus::Completed => out.write_all(b"completed")?,
            JobStatus::Failed => out.write_all(b"failed")?,
        }
        Ok(IsNull::No)
    }
}

impl FromSql<crate::schema::sql_types::ImportJobStatus, Pg> for JobStatus {
    fn from_sql(bytes: PgValue) -> deserialize::Result<Self> {
        match bytes.as_bytes() {
            b"pending" => Ok(JobStatus::Pending),
            b"processing" => Ok(JobStatus::Processing),
            b"completed" => Ok(JobStatus::Completed),
            b"failed" => Ok(JobStatus::Failed),
            _ => {
                let unrecognized_value = String::from_utf8_lossy(bytes.as_bytes());
                Err(format!("Unrecognized enum variant: {}", unrecognized_value).into())
            }
        }
    }
}

#[derive(
    AsExpression,
    FromSqlRow,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
)]
#[diesel(sql_type = crate::schema::sql_types::ImportLogLevel)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl ToSql<crate::schema::sql_types::ImportLogLevel, Pg> for LogLevel {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        match *self {
            LogLevel::Info => out.write_all(b"info")?,
            LogLevel::Warning => out.write_all(b"warning")?,
            LogLevel::Error => out.write_all(b"error")?,
        }
        Ok(IsNull::No)
    }
}

impl FromSql<crate::schema::sql_types::ImportLogLevel, Pg> for LogLevel {
    fn from_sql(bytes: PgValue) -> deserialize::Result<Self> {
        match bytes.as_bytes() {
            b"info" => Ok(LogLevel::Info),
            b"warning" => Ok(LogLevel::Warning),
            b"error" => Ok(LogLevel::Error),
            _ => {
                let unrecognized_value = String::from_utf8_lossy(bytes.as_bytes());
                Err(format!("Unrecognized enum variant: {}", unrecognized_value).into())
            }
        }
    }
}

/// One ingestion of one uploaded file.
///
/// Counters are mutated only through the repository's delta updates so they
/// never regress; `started_at` is set the first time the job enters
/// processing and `finished_at` exactly once on the terminal transition.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone, PartialEq)]
#[diesel(table_name = import_jobs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ImportJob {
    pub id: PK,
    pub filename: String,
    pub status: JobStatus,
    pub total_rows: Option<i32>,
    pub processed_rows: i32,
    pub error_rows: i32,
    pub mapping: Option<serde_json::Value>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ImportJob {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = import_jobs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewImportJob {
    pub filename: String,
    pub status: JobStatus,
    pub mapping: Option<serde_json::Value>,
}

/// Append-only log line attached to a job. Never mutated.
#[derive(Queryable, Selectable, Identifiable, Associations, Debug, Clone, PartialEq)]
#[diesel(table_name = import_job_logs)]
#[diesel(belongs_to(ImportJob, foreign_key = job_id))]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ImportLogLine {
    pub id: Uuid,
    pub job_id: PK,
    pub level: LogLevel,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = import_job_logs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewImportLogLine {
    pub job_id: PK,
    pub level: LogLevel,
    pub message: String,
}
