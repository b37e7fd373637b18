//! Per-chunk validation, duplicate resolution, bulk insertion, counter
//! maintenance and event emission.
//!
//! One `process_job` call drives a queued job from `processing` to a
//! terminal state. Row-level failures are accumulated and logged, never
//! fatal; job-level failures transition the job to `failed` with an ERROR
//! log line. Re-entry is idempotent: a terminal job is a no-op, and the
//! cross-file duplicate probe keeps a partially processed file from double
//! inserting on redelivery.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use axum::extract::FromRef;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::db::{DbConn, import_jobs, import_logs};
use crate::domain::app_state::{AppEvents, AppPool, AppStaging, AppState};
use crate::domain::event::ImportEvent;
use crate::domain::import_job::{ImportJob, LogLevel};
use crate::domain::mapping::{ColumnMapping, ColumnType, MappingConfig, OnMissing};
use crate::ingest::coerce::{self, FieldValue};
use crate::ingest::target::{NormalizedRow, ProbeResult, TargetTable};
use crate::reader;
use crate::{Error, ErrorKind, Result};

pub struct RowProcessor {
    pool: AppPool,
    bus: AppEvents,
    staging: AppStaging,
    batch_size: usize,
    throttle: Duration,
}

impl FromRef<AppState> for RowProcessor {
    fn from_ref(state: &AppState) -> Self {
        Self {
            pool: AppPool::from_ref(state),
            bus: AppEvents::from_ref(state),
            staging: AppStaging::from_ref(state),
            batch_size: state.settings.import.batch_size,
            throttle: Duration::from_millis(state.settings.import.progress_throttle_ms),
        }
    }
}

impl RowProcessor {
    /// Drives one job to a terminal state.
    ///
    /// Returns `Ok(())` when the message may be acknowledged: the job
    /// completed, failed and was recorded as failed, or was already
    /// terminal. Returns `Err` only when even the failure could not be
    /// recorded; the caller then leaves the message for redelivery.
    #[instrument(skip(self))]
    pub async fn process_job(&self, job_id: Uuid) -> Result<()> {
        let mut conn = self.pool.get()?;

        let Some(job) = import_jobs::find_by_id(&mut conn, &job_id)? else {
            warn!(%job_id, "queue message references an unknown job, dropping");
            return Ok(());
        };
        if job.status.is_terminal() {
            debug!(%job_id, status = %job.status, "job already terminal, redelivery is a no-op");
            return Ok(());
        }

        let job = import_jobs::mark_processing(&mut conn, &job_id)?;
        self.bus.publish(job_id, ImportEvent::status_update(&job));

        match self.run_pipeline(&mut conn, &job) {
            Ok(()) => {
                let job = import_jobs::mark_completed(&mut conn, &job_id)?;
                info!(
                    %job_id,
                    processed = job.processed_rows,
                    errors = job.error_rows,
                    "import completed"
                );
                self.bus.publish(job_id, ImportEvent::status_update(&job));
                self.delete_staged(&job);
            }
            Err(err) => {
                warn!(%job_id, "import failed: {}", err);
                let message = format!("import failed: {err}");
                let line =
                    import_logs::append(&mut conn, &job_id, LogLevel::Error, &message)?;
                self.bus.publish(
                    job_id,
                    ImportEvent::log(job_id, line.level, &line.message, line.created_at),
                );
                let job = import_jobs::mark_failed(&mut conn, &job_id)?;
                self.bus.publish(job_id, ImportEvent::status_update(&job));
                self.delete_staged(&job);
            }
        }

        Ok(())
    }

    /// Best-effort removal of the staged file on terminal transitions.
    fn delete_staged(&self, job: &ImportJob) {
        let Some(extension) = file_extension(&job.filename) else {
            return;
        };
        if let Err(err) = self.staging.delete(&job.id, &extension) {
            warn!(job_id = %job.id, "failed to delete staged file: {}", err);
        }
    }

    fn run_pipeline(&self, conn: &mut DbConn, job: &ImportJob) -> Result<()> {
        let mapping_value = job.mapping.clone().ok_or_else(|| {
            Error::from((
                ErrorKind::InvalidMapping,
                "job carries no mapping configuration",
            ))
        })?;
        let mapping = MappingConfig::parse(mapping_value)?;

        let extension = file_extension(&job.filename).ok_or_else(|| {
            Error::from((
                ErrorKind::UnsupportedFormat,
                "job filename has no recognizable extension",
                job.filename.clone(),
            ))
        })?;

        // Fail early and descriptively when intake crashed before staging.
        drop(self.staging.open(&job.id, &extension)?);
        let path = self.staging.path_for(&job.id, &extension);

        // Tolerate a submission that crashed before the pre-count landed.
        if job.total_rows.is_none() {
            let total = reader::count_rows(&path)? as i32;
            import_jobs::set_total_rows(conn, &job.id, total)?;
            debug!(job_id = %job.id, total, "recounted rows for job without a total");
        }

        let required = mapping.required_columns();
        let missing = reader::validate_header(&path, &required)?;
        if !missing.is_empty() {
            return Err((
                ErrorKind::InvalidHeader,
                "header is missing required columns",
                missing.join(", "),
            )
                .into());
        }

        let target = TargetTable::for_mapping(&mapping);
        if mapping.create_table {
            target.provision(conn, &mapping)?;
        }

        // Intra-file uniqueness keys, carried across chunks.
        let mut seen: HashMap<String, HashSet<String>> = HashMap::new();
        let mut fk_cache: FkCache = HashMap::new();
        let mut throttle = ProgressThrottle::new(self.throttle);
        let mut row_offset = 0usize;
        let mut total_inserted = 0usize;
        // Running totals of this pass; persisted as monotonic absolutes so
        // a crashed-and-redelivered pass cannot inflate the counters.
        let mut run_processed = 0usize;
        let mut run_rejected = 0usize;
        let mut last_unemitted: Option<ImportJob> = None;

        for chunk in reader::read_chunks(&path, self.batch_size)? {
            let chunk = chunk?;
            let outcome = self.process_chunk(
                conn,
                job,
                &mapping,
                &target,
                &mut seen,
                &mut fk_cache,
                &chunk,
                row_offset,
            )?;
            row_offset += chunk.len();
            total_inserted += outcome.inserted;
            run_processed += outcome.inserted + outcome.already_present;
            run_rejected += outcome.rejected;

            let updated = import_jobs::record_progress(
                conn,
                &job.id,
                run_processed as i32,
                run_rejected as i32,
            )?;

            if throttle.should_emit() {
                self.publish_progress(&updated);
                last_unemitted = None;
            } else {
                last_unemitted = Some(updated);
            }
        }

        // The final chunk's progress always goes out, throttle or not.
        if let Some(job) = last_unemitted {
            self.publish_progress(&job);
        }

        let summary = format!(
            "import finished: {total_inserted} rows imported, {run_rejected} rejected"
        );
        let line = import_logs::append(conn, &job.id, LogLevel::Info, &summary)?;
        self.bus.publish(
            job.id,
            ImportEvent::log(job.id, line.level, &line.message, line.created_at),
        );

        Ok(())
    }

    fn publish_progress(&self, job: &ImportJob) {
        self.bus.publish(
            job.id,
            ImportEvent::progress_update(
                job.id,
                job.processed_rows,
                job.error_rows,
                job.total_rows,
            ),
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn process_chunk(
        &self,
        conn: &mut DbConn,
        job: &ImportJob,
        mapping: &MappingConfig,
        target: &TargetTable,
        seen: &mut HashMap<String, HashSet<String>>,
        fk_cache: &mut FkCache,
        rows: &[reader::SheetRow],
        offset: usize,
    ) -> Result<ChunkOutcome> {
        // One batched cross-file duplicate probe per unique column.
        let mut existing: HashMap<String, ProbeResult> = HashMap::new();
        for column in mapping.unique_columns() {
            let keys: Vec<String> = rows
                .iter()
                .filter_map(|row| row.get(&column.source_column))
                .map(coerce::normalize_key)
                .filter(|key| !key.is_empty())
                .collect();
            let found = target.probe_existing(conn, &job.id, &column.db_column, &keys)?;
            existing.insert(column.db_column.clone(), found);
        }

        let mut buffer: Vec<NormalizedRow> = Vec::new();
        let mut rejected = 0usize;
        let mut already_present = 0usize;

        for (index, row) in rows.iter().enumerate() {
            let row_number = offset + index;
            let mut reasons: Vec<String> = Vec::new();
            let mut values = Vec::with_capacity(mapping.columns.len());
            let mut keys: Vec<(String, String)> = Vec::new();

            for column in &mapping.columns {
                let raw = row.get(&column.source_column);
                match coerce::coerce_field(raw, column) {
                    Ok(mut value) => {
                        if column.column_type == ColumnType::Fk && !value.is_null() {
                            match self.resolve_fk(conn, column, &value, fk_cache)? {
                                Ok(resolved) => value = resolved,
                                Err(reason) => {
                                    reasons.push(reason);
                                    continue;
                                }
                            }
                        }
                        if column.unique {
                            if let Some(raw_cell) = raw {
                                let key = coerce::normalize_key(raw_cell);
                                if !key.is_empty() {
                                    keys.push((column.db_column.clone(), key));
                                }
                            }
                        }
                        values.push((column.db_column.clone(), value));
                    }
                    Err(reason) => reasons.push(reason),
                }
            }

            // A key this job already inserted marks a row an earlier
            // delivery of the same message fully processed: skip it without
            // inserting or counting an error. It still claims its keys so
            // later in-file repeats are rejected as duplicates.
            if reasons.is_empty()
                && keys.iter().any(|(db_column, key)| {
                    existing
                        .get(db_column)
                        .is_some_and(|found| found.own.contains(key))
                })
            {
                already_present += 1;
                for (db_column, key) in &keys {
                    seen.entry(db_column.clone()).or_default().insert(key.clone());
                }
                continue;
            }

            // Duplicate check against the database probe and the running
            // intra-file set; only rows that passed validation claim keys.
            if reasons.is_empty() {
                for (db_column, key) in &keys {
                    let in_db = existing
                        .get(db_column)
                        .is_some_and(|found| found.foreign.contains(key));
                    let in_file = seen
                        .get(db_column)
                        .is_some_and(|found| found.contains(key));
                    if in_db || in_file {
                        reasons.push(format!("duplicate {db_column} '{key}'"));
                    }
                }
            }

            if reasons.is_empty() {
                for (db_column, key) in &keys {
                    seen.entry(db_column.clone()).or_default().insert(key.clone());
                }
                buffer.push(NormalizedRow {
                    row_number,
                    values,
                    keys,
                });
            } else {
                rejected += 1;
                self.log_rejection(conn, job, row_number, &reasons.join("; "))?;
            }
        }

        let (inserted, failures) = target.write_chunk(conn, &job.id, &buffer)?;
        for (row_number, reason) in &failures {
            rejected += 1;
            self.log_rejection(conn, job, *row_number, reason)?;
        }

        Ok(ChunkOutcome {
            inserted,
            already_present,
            rejected,
        })
    }

    fn log_rejection(
        &self,
        conn: &mut DbConn,
        job: &ImportJob,
        row_number: usize,
        reason: &str,
    ) -> Result<()> {
        let message = format!("row {row_number}: {reason}");
        let line = import_logs::append(conn, &job.id, LogLevel::Warning, &message)?;
        self.bus.publish(
            job.id,
            ImportEvent::log(job.id, line.level, &line.message, line.created_at),
        );
        Ok(())
    }

    /// Resolves one foreign-key cell. The outer `Result` is a job-level
    /// database failure; the inner one is a row-level rejection reason.
    fn resolve_fk(
        &self,
        conn: &mut DbConn,
        column: &ColumnMapping,
        value: &FieldValue,
        cache: &mut FkCache,
    ) -> Result<std::result::Result<FieldValue, String>> {
        let Some(fk) = column.fk.as_ref() else {
            // Unreachable for parsed mappings; treat as a row error.
            return Ok(Err(format!("{} has no fk resolution", column.db_column)));
        };
        let FieldValue::Text(lookup_value) = value else {
            return Ok(Err(format!("invalid {} lookup value", fk.table)));
        };

        let cache_key = (column.db_column.clone(), lookup_value.clone());
        let found = match cache.get(&cache_key) {
            Some(found) => *found,
            None => {
                let found = crate::db::dynamic_targets::lookup_fk(
                    conn,
                    &fk.table,
                    &fk.lookup_column,
                    lookup_value,
                )?;
                cache.insert(cache_key.clone(), found);
                found
            }
        };

        match (found, fk.on_missing) {
            (Some(fk_id), _) => Ok(Ok(FieldValue::Key(fk_id))),
            (None, OnMissing::Error) => Ok(Err(format!(
                "missing {} '{}'",
                fk.table, lookup_value
            ))),
            (None, OnMissing::Ignore) => Ok(Ok(FieldValue::Null)),
            (None, OnMissing::Create) => {
                let fk_id = crate::db::dynamic_targets::create_fk_placeholder(
                    conn,
                    &fk.table,
                    &fk.lookup_column,
                    lookup_value,
                )?;
                cache.insert(cache_key, Some(fk_id));
                Ok(Ok(FieldValue::Key(fk_id)))
            }
        }
    }
}

type FkCache = HashMap<(String, String), Option<Uuid>>;

struct ChunkOutcome {
    inserted: usize,
    /// Rows an earlier delivery of this same job already inserted.
    already_present: usize,
    rejected: usize,
}

/// Suppresses progress events closer together than the configured interval.
struct ProgressThrottle {
    min_interval: Duration,
    last: Option<Instant>,
}

impl ProgressThrottle {
    fn new(min_interval: Duration) -> Self {
        ProgressThrottle {
            min_interval,
            last: None,
        }
    }

    fn should_emit(&mut self) -> bool {
        let now = Instant::now();
        match self.last {
            Some(last) if now.duration_since(last) < self.min_interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// Lower-cased extension of an uploaded filename.
pub fn file_extension(filename: &str) -> Option<String> {
    std::path::Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
}
