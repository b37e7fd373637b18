use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};

use crate::configuration::Settings;
use crate::controllers::imports::handlers::{
	create_template, get_import, list_imports, list_templates, stream_imports, submit_import,
};
use crate::domain::app_state::AppState;

/// Slack for multipart framing on top of the configured upload ceiling.
const UPLOAD_OVERHEAD_BYTES: usize = 64 * 1024;

/// Request/response routes of the import surface. The SSE stream lives in
/// [`import_stream_routes`] so the router can exempt it from timeouts.
pub fn import_routes(settings: &Settings) -> Router<AppState> {
	let body_limit = settings.import.max_upload_bytes + UPLOAD_OVERHEAD_BYTES;

	Router::new().nest(
		"/imports",
		Router::new()
			.route("/", post(submit_import).get(list_imports))
			.route("/templates", post(create_template).get(list_templates))
			.route("/{id}", get(get_import))
			.layer(DefaultBodyLimit::max(body_limit)),
	)
}

/// The long-lived SSE stream route.
pub fn import_stream_routes() -> Router<AppState> {
	Router::new().route("/imports/stream", get(stream_imports))
}
