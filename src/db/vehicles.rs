//! Database access layer for the fixed-schema `vehicles` target table.
//!
//! Plates are stored normalized (trimmed, upper-cased), so the batched
//! duplicate probe can compare keys with plain equality. The UNIQUE
//! constraint on `placa` remains authoritative; the probe is advisory.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::db::DbConn;
use crate::domain::error::Result;
use crate::domain::import_job::PK;
use crate::schema::vehicles::dsl::*;

#[derive(Queryable, Selectable, Identifiable, Debug, Clone, PartialEq)]
#[diesel(table_name = crate::schema::vehicles)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Vehicle {
	pub id: Uuid,
	pub modelo: String,
	pub placa: String,
	pub ano: Option<i32>,
	pub valor_fipe: Option<BigDecimal>,
	pub job_id: PK,
	pub created_at: DateTime<Utc>,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::vehicles)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewVehicle {
	pub modelo: String,
	pub placa: String,
	pub ano: Option<i32>,
	pub valor_fipe: Option<BigDecimal>,
	pub job_id: PK,
}

/// One batched lookup: which of these normalized plates already exist, and
/// which job inserted each of them?
pub fn existing_plates(conn: &mut DbConn, keys: &[String]) -> Result<Vec<(String, PK)>> {
	let found: Vec<(String, PK)> = vehicles
		.filter(placa.eq_any(keys))
		.select((placa, job_id))
		.load(conn)?;
	Ok(found)
}

/// Bulk insert of a chunk's buffer in a single statement.
pub fn insert_batch(conn: &mut DbConn, rows: &[NewVehicle]) -> Result<usize> {
	let inserted = diesel::insert_into(vehicles).values(rows).execute(conn)?;
	Ok(inserted)
}

/// Single-row insert used by the savepoint fallback path.
pub fn insert_one(conn: &mut DbConn, row: &NewVehicle) -> Result<usize> {
	let inserted = diesel::insert_into(vehicles).values(row).execute(conn)?;
	Ok(inserted)
}

/// Counts rows attributable to one import job.
pub fn count_for_job(conn: &mut DbConn, job: &PK) -> Result<i64> {
	let count = vehicles.filter(job_id.eq(job)).count().get_result(conn)?;
	Ok(count)
}

/// Retrieves all rows created by one import job, insertion order.
pub fn for_job(conn: &mut DbConn, job: &PK) -> Result<Vec<Vehicle>> {
	let rows = vehicles
		.filter(job_id.eq(job))
		.order_by(created_at.asc())
		.select(Vehicle::as_select())
		.load(conn)?;
	Ok(rows)
}
