use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::import_job::{ImportJob, ImportLogLine, JobStatus, LogLevel};
use crate::domain::template::MappingTemplate;

/// Response for a freshly accepted submission
#[derive(Serialize, Deserialize, Debug)]
pub struct SubmitImportBody {
	pub job_id: Uuid,
	pub status: JobStatus,
}

/// One job summary as exposed over the API
#[derive(Serialize, Deserialize, Debug)]
pub struct ImportJobBody {
	pub job_id: Uuid,
	pub filename: String,
	pub status: JobStatus,
	pub total_rows: Option<i32>,
	pub processed_rows: i32,
	pub error_rows: i32,
	pub started_at: Option<DateTime<Utc>>,
	pub finished_at: Option<DateTime<Utc>>,
	pub created_at: DateTime<Utc>,
}

pub type ImportJobListBody = Vec<ImportJobBody>;

impl From<ImportJob> for ImportJobBody {
	fn from(job: ImportJob) -> Self {
		Self {
			job_id: job.id,
			filename: job.filename,
			status: job.status,
			total_rows: job.total_rows,
			processed_rows: job.processed_rows,
			error_rows: job.error_rows,
			started_at: job.started_at,
			finished_at: job.finished_at,
			created_at: job.created_at,
		}
	}
}

#[derive(Serialize, Deserialize, Debug)]
pub struct LogLineBody {
	pub level: LogLevel,
	pub message: String,
	pub created_at: DateTime<Utc>,
}

impl From<ImportLogLine> for LogLineBody {
	fn from(line: ImportLogLine) -> Self {
		Self {
			level: line.level,
			message: line.message,
			created_at: line.created_at,
		}
	}
}

/// Job summary plus its full log history
#[derive(Serialize, Deserialize, Debug)]
pub struct ImportJobDetailBody {
	#[serde(flatten)]
	pub job: ImportJobBody,
	pub logs: Vec<LogLineBody>,
}

#[derive(Deserialize, Debug, Default)]
pub struct ListImportsQuery {
	pub skip: Option<i64>,
	pub limit: Option<i64>,
	pub status: Option<JobStatus>,
}

#[derive(Deserialize, Debug, Default)]
pub struct StreamQuery {
	pub job_id: Option<Uuid>,
}

/// Struct for creating a new mapping template
#[derive(Serialize, Deserialize, Debug)]
pub struct NewTemplatePayload {
	pub name: String,
	pub config: serde_json::Value,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct TemplateBody {
	pub id: Uuid,
	pub name: String,
	pub created_at: DateTime<Utc>,
}

pub type TemplateListBody = Vec<TemplateBody>;

impl From<MappingTemplate> for TemplateBody {
	fn from(template: MappingTemplate) -> Self {
		Self {
			id: template.id,
			name: template.name,
			created_at: template.created_at,
		}
	}
}
