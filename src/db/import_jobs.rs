//! Database access layer for import jobs.
//!
//! The job row is the durable record of one ingestion. All writes funnel
//! through this module: status transitions are guarded so a terminal job is
//! never resurrected, and counter updates are single-statement deltas so
//! they cannot regress under concurrent redelivery.

use chrono::Utc;
use diesel::prelude::*;
use diesel::sql_types::Integer;

use crate::db::DbConn;
use crate::domain::error::{ErrorKind, Result};
use crate::domain::import_job::{ImportJob, JobStatus, NewImportJob, PK};
use crate::schema::import_jobs::dsl::*;

/// Creates a new import job record.
pub fn create(conn: &mut DbConn, entity: NewImportJob) -> Result<ImportJob> {
	let job = diesel::insert_into(import_jobs)
		.values(entity)
		.returning(ImportJob::as_returning())
		.get_result(conn)?;
	Ok(job)
}

/// Attempts to find a job by its ID.
pub fn find_by_id(conn: &mut DbConn, job_id: &PK) -> Result<Option<ImportJob>> {
	let job: Option<ImportJob> = import_jobs.find(job_id).first(conn).optional()?;
	Ok(job)
}

/// Retrieves a job by its ID, failing with `JobNotFound` when absent.
pub fn get_by_id(conn: &mut DbConn, job_id: &PK) -> Result<ImportJob> {
	find_by_id(conn, job_id)?.ok_or_else(|| {
		(
			ErrorKind::JobNotFound,
			"import job not found",
			job_id.to_string(),
		)
			.into()
	})
}

/// Lists jobs newest first with pagination and an optional status filter.
pub fn list(
	conn: &mut DbConn,
	skip: i64,
	page_size: i64,
	status_filter: Option<JobStatus>,
) -> Result<Vec<ImportJob>> {
	let mut query = import_jobs.select(ImportJob::as_select()).into_boxed();
	if let Some(wanted) = status_filter {
		query = query.filter(status.eq(wanted));
	}
	let jobs = query
		.order_by(created_at.desc())
		.offset(skip)
		.limit(page_size)
		.load(conn)?;
	Ok(jobs)
}

/// Stores the pre-counted row total for a job.
pub fn set_total_rows(conn: &mut DbConn, job_id: &PK, total: i32) -> Result<ImportJob> {
	let job = diesel::update(import_jobs.find(job_id))
		.set(total_rows.eq(Some(total)))
		.returning(ImportJob::as_returning())
		.get_result(conn)?;
	Ok(job)
}

/// Transitions a job into `processing`, setting `started_at` on the first
/// entry only. A terminal job is returned unchanged so that redelivered
/// queue messages become no-ops.
pub fn mark_processing(conn: &mut DbConn, job_id: &PK) -> Result<ImportJob> {
	conn.transaction(|conn| {
		let job: ImportJob = import_jobs.find(job_id).for_update().first(conn)?;
		if job.status.is_terminal() {
			return Ok(job);
		}
		let job = diesel::update(import_jobs.find(job_id))
			.set((
				status.eq(JobStatus::Processing),
				started_at.eq(job.started_at.or_else(|| Some(Utc::now()))),
			))
			.returning(ImportJob::as_returning())
			.get_result(conn)?;
		Ok(job)
	})
}

/// Transitions a job into `completed`.
pub fn mark_completed(conn: &mut DbConn, job_id: &PK) -> Result<ImportJob> {
	mark_terminal(conn, job_id, JobStatus::Completed)
}

/// Transitions a job into `failed`.
pub fn mark_failed(conn: &mut DbConn, job_id: &PK) -> Result<ImportJob> {
	mark_terminal(conn, job_id, JobStatus::Failed)
}

fn mark_terminal(conn: &mut DbConn, job_id: &PK, final_status: JobStatus) -> Result<ImportJob> {
	conn.transaction(|conn| {
		let job: ImportJob = import_jobs.find(job_id).for_update().first(conn)?;
		if job.status.is_terminal() {
			// Terminal states are never overwritten.
			return Ok(job);
		}
		let job = diesel::update(import_jobs.find(job_id))
			.set((
				status.eq(final_status),
				finished_at.eq(Some(Utc::now())),
			))
			.returning(ImportJob::as_returning())
			.get_result(conn)?;
		Ok(job)
	})
}

diesel::define_sql_function! {
	fn greatest(a: Integer, b: Integer) -> Integer;
}

/// Records the running totals of the current processing pass in a single
/// statement. `GREATEST` keeps the counters monotonic when a redelivered
/// job is re-processed from the top after a crash: the stored value never
/// regresses below what an earlier partial pass already reported, and a
/// completed pass's totals win.
pub fn record_progress(
	conn: &mut DbConn,
	job_id: &PK,
	processed_total: i32,
	error_total: i32,
) -> Result<ImportJob> {
	let job = diesel::update(import_jobs.find(job_id))
		.set((
			processed_rows.eq(greatest(processed_rows, processed_total)),
			error_rows.eq(greatest(error_rows, error_total)),
		))
		.returning(ImportJob::as_returning())
		.get_result(conn)?;
	Ok(job)
}
