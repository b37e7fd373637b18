//! DDL and DML for dynamically provisioned target tables.
//!
//! Mapping-defined tables cannot go through the static diesel schema, so this
//! module builds the statements by hand. Two guarantees make that safe:
//! identifiers were validated against `^[a-z_][a-z0-9_]*$` at mapping parse
//! time, and values are rendered from the closed [`FieldValue`] set with
//! single-quote doubling. Untyped string literals let PostgreSQL coerce each
//! value to the provisioned column type.

use diesel::prelude::*;
use diesel::sql_types::{Array, Text};
use uuid::Uuid;

use crate::db::DbConn;
use crate::domain::error::Result;
use crate::domain::import_job::PK;
use crate::domain::mapping::MappingConfig;
use crate::ingest::coerce::FieldValue;

#[derive(QueryableByName)]
struct OwnedValueRow {
	#[diesel(sql_type = Text)]
	value: String,
	#[diesel(sql_type = diesel::sql_types::Uuid)]
	job_id: Uuid,
}

#[derive(QueryableByName)]
struct IdRow {
	#[diesel(sql_type = diesel::sql_types::Uuid)]
	id: Uuid,
}

/// Provisions the target table described by the mapping, if absent.
///
/// Every provisioned table carries `id`, `job_id` and `created_at` alongside
/// the mapped columns; unique mappings become UNIQUE constraints so the
/// database stays authoritative for duplicate detection.
pub fn create_table(conn: &mut DbConn, mapping: &MappingConfig) -> Result<()> {
	let mut columns = Vec::with_capacity(mapping.columns.len() + 3);
	columns.push("id UUID PRIMARY KEY DEFAULT gen_random_uuid()".to_string());
	for column in &mapping.columns {
		let mut definition = format!("{} {}", column.db_column, column.column_type.sql_type());
		if column.unique {
			definition.push_str(" UNIQUE");
		}
		// Fk columns stay plain UUIDs: the referenced table may itself be
		// provisioned lazily, so no REFERENCES clause.
		columns.push(definition);
	}
	columns.push("job_id UUID NOT NULL REFERENCES import_jobs (id)".to_string());
	columns.push("created_at TIMESTAMPTZ NOT NULL DEFAULT now()".to_string());

	let statement = format!(
		"CREATE TABLE IF NOT EXISTS {} ({})",
		mapping.target_table,
		columns.join(", ")
	);
	diesel::sql_query(statement).execute(conn)?;
	Ok(())
}

/// One batched lookup: which of these normalized keys already exist in
/// `column` of `table`, and which job inserted each of them? Comparison
/// happens on `upper(trim(...))` so it matches the processor's key
/// normalization.
pub fn existing_values(
	conn: &mut DbConn,
	table: &str,
	column: &str,
	keys: &[String],
) -> Result<Vec<(String, Uuid)>> {
	if keys.is_empty() {
		return Ok(Vec::new());
	}
	let statement = format!(
		"SELECT upper(trim({column}::text)) AS value, job_id FROM {table} \
		 WHERE upper(trim({column}::text)) = ANY($1)"
	);
	let rows: Vec<OwnedValueRow> = diesel::sql_query(statement)
		.bind::<Array<Text>, _>(keys)
		.load(conn)?;
	Ok(rows.into_iter().map(|row| (row.value, row.job_id)).collect())
}

/// Bulk insert of a chunk's buffer in a single multi-row statement.
pub fn insert_rows(
	conn: &mut DbConn,
	table: &str,
	columns: &[String],
	rows: &[Vec<FieldValue>],
	job: &PK,
) -> Result<usize> {
	if rows.is_empty() {
		return Ok(0);
	}
	let mut tuples = Vec::with_capacity(rows.len());
	for row in rows {
		let mut rendered: Vec<String> = row.iter().map(render_literal).collect();
		rendered.push(quote_text(&job.to_string()));
		tuples.push(format!("({})", rendered.join(", ")));
	}
	let statement = format!(
		"INSERT INTO {} ({}, job_id) VALUES {}",
		table,
		columns.join(", "),
		tuples.join(", ")
	);
	let inserted = diesel::sql_query(statement).execute(conn)?;
	Ok(inserted)
}

/// Single-row insert used by the savepoint fallback path.
pub fn insert_row(
	conn: &mut DbConn,
	table: &str,
	columns: &[String],
	row: &[FieldValue],
	job: &PK,
) -> Result<usize> {
	insert_rows(conn, table, columns, std::slice::from_ref(&row.to_vec()), job)
}

/// Looks up a foreign-key target row by its lookup column.
pub fn lookup_fk(
	conn: &mut DbConn,
	table: &str,
	lookup_column: &str,
	value: &str,
) -> Result<Option<Uuid>> {
	let statement = format!(
		"SELECT id FROM {table} WHERE {lookup_column} = {} LIMIT 1",
		quote_text(value)
	);
	let rows: Vec<IdRow> = diesel::sql_query(statement).load(conn)?;
	Ok(rows.into_iter().next().map(|row| row.id))
}

/// Creates a placeholder foreign-key target row carrying only the lookup
/// value, returning its id.
pub fn create_fk_placeholder(
	conn: &mut DbConn,
	table: &str,
	lookup_column: &str,
	value: &str,
) -> Result<Uuid> {
	let statement = format!(
		"INSERT INTO {table} ({lookup_column}) VALUES ({}) RETURNING id",
		quote_text(value)
	);
	let rows: Vec<IdRow> = diesel::sql_query(statement).load(conn)?;
	rows.into_iter().next().map(|row| row.id).ok_or_else(|| {
		(
			crate::ErrorKind::TargetTableError,
			"placeholder insert returned no id",
			table.to_string(),
		)
			.into()
	})
}

/// Renders a coerced value as a SQL literal. Text-like values rely on
/// PostgreSQL coercing untyped string literals to the column type.
fn render_literal(value: &FieldValue) -> String {
	match value {
		FieldValue::Text(text) => quote_text(text),
		FieldValue::Int(i) => i.to_string(),
		FieldValue::Float(f) if f.is_finite() => f.to_string(),
		FieldValue::Float(_) => "NULL".to_string(),
		FieldValue::Decimal(d) => d.to_string(),
		FieldValue::Date(d) => quote_text(&d.format("%Y-%m-%d").to_string()),
		FieldValue::DateTime(dt) => quote_text(&dt.format("%Y-%m-%d %H:%M:%S").to_string()),
		FieldValue::Bool(true) => "TRUE".to_string(),
		FieldValue::Bool(false) => "FALSE".to_string(),
		FieldValue::Key(id) => quote_text(&id.to_string()),
		FieldValue::Null => "NULL".to_string(),
	}
}

/// Quotes a string literal, doubling embedded single quotes and dropping
/// NUL bytes (PostgreSQL rejects them in text anyway).
fn quote_text(text: &str) -> String {
	let cleaned: String = text.chars().filter(|c| *c != '\0').collect();
	format!("'{}'", cleaned.replace('\'', "''"))
}
