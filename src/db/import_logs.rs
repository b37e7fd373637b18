//! Append-only job log lines.

use diesel::prelude::*;
use unicode_segmentation::UnicodeSegmentation;

use crate::db::DbConn;
use crate::domain::error::Result;
use crate::domain::import_job::{ImportLogLine, LogLevel, NewImportLogLine, PK};
use crate::schema::import_job_logs::dsl::*;

/// Upper bound on a stored log message, in grapheme clusters.
pub const MAX_MESSAGE_GRAPHEMES: usize = 500;

/// Appends a log line to a job, truncating overlong messages.
pub fn append(
	conn: &mut DbConn,
	job: &PK,
	log_level: LogLevel,
	text: &str,
) -> Result<ImportLogLine> {
	let line = diesel::insert_into(import_job_logs)
		.values(NewImportLogLine {
			job_id: *job,
			level: log_level,
			message: truncate_message(text),
		})
		.returning(ImportLogLine::as_returning())
		.get_result(conn)?;
	Ok(line)
}

/// Retrieves all log lines for a job in append order.
pub fn for_job(conn: &mut DbConn, job: &PK) -> Result<Vec<ImportLogLine>> {
	let lines = import_job_logs
		.filter(job_id.eq(job))
		.order_by(created_at.asc())
		.select(ImportLogLine::as_select())
		.load(conn)?;
	Ok(lines)
}

/// Truncates a message to [`MAX_MESSAGE_GRAPHEMES`] without splitting a
/// grapheme cluster.
pub fn truncate_message(text: &str) -> String {
	let mut graphemes = text.grapheme_indices(true);
	match graphemes.nth(MAX_MESSAGE_GRAPHEMES) {
		Some((boundary, _)) => format!("{}…", &text[..boundary]),
		None => text.to_string(),
	}
}
