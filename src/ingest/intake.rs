//! Job intake: accepts a candidate file, creates the durable job record,
//! stages the bytes, pre-counts rows, and enqueues the work item.
//!
//! The effect order is deliberate and each step is checkpointed: a queue
//! message is only published once durable state and bytes exist, so a
//! received message always refers to a loadable job. A failure partway
//! leaves a `pending` job with partial side effects; the worker tolerates
//! both a missing staged file and a missing total.

use axum::extract::FromRef;
use tracing::{debug, info, instrument};

use crate::db::import_jobs;
use crate::domain::app_state::{AppPool, AppQueue, AppStaging, AppState};
use crate::domain::import_job::{ImportJob, JobStatus, NewImportJob};
use crate::domain::mapping::MappingConfig;
use crate::ingest::processor::file_extension;
use crate::queue::JobMessage;
use crate::reader::{self, SheetFormat};
use crate::{Error, ErrorKind, Result};

pub struct IntakeService {
    pool: AppPool,
    queue: AppQueue,
    staging: AppStaging,
    max_upload_bytes: usize,
}

impl FromRef<AppState> for IntakeService {
    fn from_ref(state: &AppState) -> Self {
        Self {
            pool: AppPool::from_ref(state),
            queue: AppQueue::from_ref(state),
            staging: AppStaging::from_ref(state),
            max_upload_bytes: state.settings.import.max_upload_bytes,
        }
    }
}

impl IntakeService {
    /// Accepts a submission and returns the new job in `pending` state.
    #[instrument(skip(self, bytes, mapping), fields(filename = %filename, size = bytes.len()))]
    pub fn submit(
        &self,
        filename: &str,
        bytes: &[u8],
        mapping: MappingConfig,
    ) -> Result<ImportJob> {
        let extension = file_extension(filename).ok_or_else(|| {
            Error::from((
                ErrorKind::UnsupportedFormat,
                "filename has no recognizable extension",
                filename.to_string(),
            ))
        })?;
        if SheetFormat::from_extension(&extension).is_none() {
            return Err((
                ErrorKind::UnsupportedFormat,
                "unsupported spreadsheet format",
                extension,
            )
                .into());
        }
        if bytes.len() > self.max_upload_bytes {
            return Err((
                ErrorKind::PayloadTooLarge,
                "upload exceeds the configured size ceiling",
                format!("{} > {} bytes", bytes.len(), self.max_upload_bytes),
            )
                .into());
        }

        let mut conn = self.pool.get()?;

        // 1. Durable record first: a queue message must always reference a
        //    loadable job.
        let job = import_jobs::create(
            &mut conn,
            NewImportJob {
                filename: filename.to_string(),
                status: JobStatus::Pending,
                mapping: Some(serde_json::to_value(&mapping)?),
            },
        )?;
        debug!(job_id = %job.id, "created import job");

        // 2. Stage the bytes under the job's deterministic key.
        self.staging.put(&job.id, &extension, bytes)?;

        // 3. Pre-count rows in one streaming pass and persist the total.
        let path = self.staging.path_for(&job.id, &extension);
        let total = reader::count_rows(&path)? as i32;
        let job = import_jobs::set_total_rows(&mut conn, &job.id, total)?;

        // 4. Enqueue the work item.
        self.queue.publish(&JobMessage { job_id: job.id })?;

        info!(job_id = %job.id, total, "accepted import submission");
        Ok(job)
    }
}
