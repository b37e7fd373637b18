use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderName, StatusCode, header};
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{Json, debug_handler};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::controllers::imports::models::{
    ImportJobBody, ImportJobDetailBody, ImportJobListBody, ListImportsQuery, LogLineBody,
    NewTemplatePayload, StreamQuery, SubmitImportBody, TemplateBody, TemplateListBody,
};
use crate::db::{import_jobs, import_logs, templates};
use crate::domain::app_state::{AppPool, AppState};
use crate::domain::event::ImportEvent;
use crate::domain::mapping::MappingConfig;
use crate::domain::template::NewMappingTemplate;
use crate::ingest::intake::IntakeService;
use crate::ErrorKind;

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 200;

// === SUBMISSION === //

#[instrument(skip(intake, pool, multipart))]
#[debug_handler(state = AppState)]
pub(super) async fn submit_import(
    State(intake): State<IntakeService>,
    State(pool): State<AppPool>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<SubmitImportBody>), StatusCode> {
    debug!("Starting import submission");

    let mut file: Option<(String, Vec<u8>)> = None;
    let mut mapping_config: Option<String> = None;
    let mut template_id: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        warn!(error = %err, "Malformed multipart payload");
        StatusCode::BAD_REQUEST
    })? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let filename = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or(StatusCode::BAD_REQUEST)?;
                let bytes = field.bytes().await.map_err(|err| {
                    warn!(error = %err, "Failed to read upload body");
                    StatusCode::BAD_REQUEST
                })?;
                file = Some((filename, bytes.to_vec()));
            }
            Some("mapping_config") => {
                mapping_config =
                    Some(field.text().await.map_err(|_| StatusCode::BAD_REQUEST)?);
            }
            Some("template_id") => {
                template_id = Some(field.text().await.map_err(|_| StatusCode::BAD_REQUEST)?);
            }
            _ => {}
        }
    }

    let (filename, bytes) = file.ok_or_else(|| {
        warn!("Submission is missing the file field");
        StatusCode::BAD_REQUEST
    })?;
    if mapping_config.is_some() && template_id.is_some() {
        warn!("Submission carries both mapping_config and template_id");
        return Err(StatusCode::BAD_REQUEST);
    }

    let mapping = resolve_mapping(&pool, mapping_config, template_id)?;

    let job = intake.submit(&filename, &bytes, mapping).map_err(|err| {
        match err.kind() {
            Some(
                ErrorKind::UnsupportedFormat
                | ErrorKind::PayloadTooLarge
                | ErrorKind::InvalidMapping,
            ) => {
                warn!(error = %err, "Rejected import submission");
                StatusCode::BAD_REQUEST
            }
            _ => {
                error!(error = %err, "Failed to accept import submission");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    })?;

    info!(job_id = %job.id, filename = %job.filename, "Accepted import submission");

    Ok((
        StatusCode::CREATED,
        Json(SubmitImportBody {
            job_id: job.id,
            status: job.status,
        }),
    ))
}

/// Resolves the mapping for a submission: explicit JSON wins, then a stored
/// template, then the built-in vehicle preset.
fn resolve_mapping(
    pool: &AppPool,
    mapping_config: Option<String>,
    template_id: Option<String>,
) -> Result<MappingConfig, StatusCode> {
    if let Some(raw) = mapping_config {
        let value = serde_json::from_str(&raw).map_err(|err| {
            warn!(error = %err, "mapping_config is not valid JSON");
            StatusCode::BAD_REQUEST
        })?;
        return MappingConfig::parse(value).map_err(|err| {
            warn!(error = %err, "Invalid mapping_config");
            StatusCode::BAD_REQUEST
        });
    }

    if let Some(raw_id) = template_id {
        let template_key = Uuid::parse_str(raw_id.trim()).map_err(|_| StatusCode::BAD_REQUEST)?;
        let mut conn = pool.get().map_err(|err| {
            error!(error = %err, "Failed to get database connection");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
        let template = templates::get_by_id(&mut conn, &template_key).map_err(|err| {
            warn!(error = %err, "Unknown template");
            StatusCode::BAD_REQUEST
        })?;
        return MappingConfig::parse(template.config).map_err(|err| {
            warn!(error = %err, "Stored template no longer parses");
            StatusCode::INTERNAL_SERVER_ERROR
        });
    }

    Ok(MappingConfig::vehicle_preset())
}

// === LISTING === //

#[instrument(skip(pool))]
#[debug_handler(state = AppState)]
pub(super) async fn list_imports(
    State(pool): State<AppPool>,
    Query(query): Query<ListImportsQuery>,
) -> Result<Json<ImportJobListBody>, StatusCode> {
    let mut conn = pool.get().map_err(|err| {
        error!(error = %err, "Failed to get database connection");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let skip = query.skip.unwrap_or(0).max(0);
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);

    let jobs = import_jobs::list(&mut conn, skip, limit, query.status).map_err(|err| {
        error!(error = %err, "Failed to list import jobs");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(jobs.into_iter().map(ImportJobBody::from).collect()))
}

#[instrument(skip(pool), fields(job_id = ?job_id))]
#[debug_handler(state = AppState)]
pub(super) async fn get_import(
    State(pool): State<AppPool>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<ImportJobDetailBody>, StatusCode> {
    let mut conn = pool.get().map_err(|err| {
        error!(error = %err, "Failed to get database connection");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let job = import_jobs::get_by_id(&mut conn, &job_id).map_err(|err| {
        debug!(error = %err, "Import job lookup failed");
        StatusCode::NOT_FOUND
    })?;
    let logs = import_logs::for_job(&mut conn, &job_id).map_err(|err| {
        error!(error = %err, "Failed to load job logs");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(ImportJobDetailBody {
        job: ImportJobBody::from(job),
        logs: logs.into_iter().map(LogLineBody::from).collect(),
    }))
}

// === LIVE STREAM === //

#[instrument(skip(state))]
#[debug_handler(state = AppState)]
pub(super) async fn stream_imports(
    state: AppState,
    Query(query): Query<StreamQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    // Subscribe before snapshotting so no event falls between the two.
    let subscription = state.event_bus.subscribe(query.job_id);

    let mut initial: Vec<Event> = Vec::new();
    if let Some(job_id) = query.job_id {
        let mut conn = state.db_pool.get().map_err(|err| {
            error!(error = %err, "Failed to get database connection");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
        let job = import_jobs::get_by_id(&mut conn, &job_id).map_err(|err| {
            debug!(error = %err, "Stream requested for unknown job");
            StatusCode::NOT_FOUND
        })?;
        let snapshot = serde_json::to_string(&ImportJobBody::from(job))
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        initial.push(Event::default().event("job_status").data(snapshot));
    }
    let connected = ImportEvent::connected(query.job_id);
    initial.push(
        Event::default()
            .event(connected.kind.to_string())
            .data(connected.data.to_string()),
    );

    let (rx, guard) = subscription.into_parts();
    let live = ReceiverStream::new(rx).map(move |event| {
        // The guard keeps the subscription registered for the lifetime of
        // this stream; dropping the stream unregisters it.
        let _registered = &guard;
        Ok::<Event, Infallible>(
            Event::default()
                .event(event.kind.to_string())
                .data(event.data.to_string()),
        )
    });
    let stream = tokio_stream::iter(initial.into_iter().map(Ok::<Event, Infallible>)).chain(live);

    let heartbeat = Duration::from_secs(state.settings.import.sse_heartbeat_sec);
    let sse = Sse::new(stream).keep_alive(KeepAlive::new().interval(heartbeat).text("heartbeat"));

    Ok((
        [
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        sse,
    ))
}

// === TEMPLATES === //

#[instrument(skip(pool, payload), fields(name = %payload.name))]
#[debug_handler(state = AppState)]
pub(super) async fn create_template(
    State(pool): State<AppPool>,
    Json(payload): Json<NewTemplatePayload>,
) -> Result<(StatusCode, Json<TemplateBody>), StatusCode> {
    if payload.name.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    // Stored templates must parse so submissions can rely on them.
    let config = MappingConfig::parse(payload.config).map_err(|err| {
        warn!(error = %err, "Rejected invalid template config");
        StatusCode::BAD_REQUEST
    })?;

    let mut conn = pool.get().map_err(|err| {
        error!(error = %err, "Failed to get database connection");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let template = templates::create(
        &mut conn,
        NewMappingTemplate {
            name: payload.name.trim().to_string(),
            config: serde_json::to_value(&config)
                .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?,
        },
    )
    .map_err(|err| {
        if err.is_unique_violation() {
            StatusCode::CONFLICT
        } else {
            error!(error = %err, "Failed to store template");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    })?;

    info!(template_id = %template.id, "Stored mapping template");

    Ok((StatusCode::CREATED, Json(TemplateBody::from(template))))
}

#[instrument(skip(pool))]
#[debug_handler(state = AppState)]
pub(super) async fn list_templates(
    State(pool): State<AppPool>,
) -> Result<Json<TemplateListBody>, StatusCode> {
    let mut conn = pool.get().map_err(|err| {
        error!(error = %err, "Failed to get database connection");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let all = templates::list(&mut conn).map_err(|err| {
        error!(error = %err, "Failed to list templates");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(all.into_iter().map(TemplateBody::from).collect()))
}
