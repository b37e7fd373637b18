mod handlers;
mod models;
mod routes;

pub use models::{
	ImportJobBody, ImportJobDetailBody, ImportJobListBody, ListImportsQuery, LogLineBody,
	NewTemplatePayload, StreamQuery, SubmitImportBody, TemplateBody, TemplateListBody,
};
pub use routes::{import_routes, import_stream_routes};
