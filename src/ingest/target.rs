//! Write-side abstraction over the two kinds of target table.
//!
//! The fixed-schema `vehicles` preset goes through the typed diesel
//! repository; mapping-provisioned tables go through `db::dynamic_targets`.
//! Both expose the same three operations the processor needs: a batched
//! duplicate probe, a single-statement bulk insert, and a savepoint-backed
//! per-row fallback for when the database's unique constraint disagrees
//! with the advisory probe.

use std::collections::HashSet;

use bigdecimal::BigDecimal;
use diesel::Connection;
use tracing::debug;
use uuid::Uuid;

use crate::db::{DbConn, dynamic_targets, vehicles};
use crate::domain::mapping::MappingConfig;
use crate::ingest::coerce::FieldValue;
use crate::{ErrorKind, Result};

pub const VEHICLES_TABLE: &str = "vehicles";

/// Outcome of a batched duplicate probe, split by who owns the existing
/// rows.
#[derive(Debug, Default)]
pub struct ProbeResult {
    /// Keys present in the target table under a different job.
    pub foreign: HashSet<String>,
    /// Keys this job already inserted (an earlier delivery of the same
    /// message); rows carrying them are already processed.
    pub own: HashSet<String>,
}

/// A fully validated row ready for insertion: db column/value pairs in
/// mapping order plus the normalized uniqueness keys it claimed.
#[derive(Debug, Clone)]
pub struct NormalizedRow {
    /// Zero-based data-row index in the source stream.
    pub row_number: usize,
    pub values: Vec<(String, FieldValue)>,
    pub keys: Vec<(String, String)>,
}

impl NormalizedRow {
    fn value(&self, column: &str) -> Option<&FieldValue> {
        self.values
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }
}

pub enum TargetTable {
    Vehicles,
    Dynamic { table: String, columns: Vec<String> },
}

impl TargetTable {
    pub fn for_mapping(mapping: &MappingConfig) -> Self {
        if mapping.target_table == VEHICLES_TABLE {
            TargetTable::Vehicles
        } else {
            TargetTable::Dynamic {
                table: mapping.target_table.clone(),
                columns: mapping
                    .columns
                    .iter()
                    .map(|column| column.db_column.clone())
                    .collect(),
            }
        }
    }

    /// Provisions the target table when the mapping asks for it. The
    /// vehicles preset is migration-managed and needs nothing here.
    pub fn provision(&self, conn: &mut DbConn, mapping: &MappingConfig) -> Result<()> {
        match self {
            TargetTable::Vehicles => Ok(()),
            TargetTable::Dynamic { table, .. } => {
                debug!(%table, "provisioning dynamic target table");
                dynamic_targets::create_table(conn, mapping)
            }
        }
    }

    /// One batched existence probe for a unique column. Keys already held
    /// by other jobs land in `foreign`; keys this very job inserted on an
    /// earlier delivery land in `own` so redelivered work can skip them.
    pub fn probe_existing(
        &self,
        conn: &mut DbConn,
        job_id: &Uuid,
        db_column: &str,
        keys: &[String],
    ) -> Result<ProbeResult> {
        if keys.is_empty() {
            return Ok(ProbeResult::default());
        }
        let owners = match self {
            TargetTable::Vehicles if db_column == "placa" => {
                vehicles::existing_plates(conn, keys)?
            }
            TargetTable::Vehicles => {
                dynamic_targets::existing_values(conn, VEHICLES_TABLE, db_column, keys)?
            }
            TargetTable::Dynamic { table, .. } => {
                dynamic_targets::existing_values(conn, table, db_column, keys)?
            }
        };

        let mut result = ProbeResult::default();
        for (key, owner) in owners {
            if owner == *job_id {
                result.own.insert(key);
            } else {
                result.foreign.insert(key);
            }
        }
        Ok(result)
    }

    /// Bulk-writes a chunk's insert buffer in one transaction. On a unique
    /// constraint violation the whole chunk is retried row by row inside
    /// savepoints, and each violating row is reported back as a failure.
    ///
    /// Returns `(inserted, failures)` where each failure carries the source
    /// row number and a reason.
    pub fn write_chunk(
        &self,
        conn: &mut DbConn,
        job_id: &Uuid,
        rows: &[NormalizedRow],
    ) -> Result<(usize, Vec<(usize, String)>)> {
        if rows.is_empty() {
            return Ok((0, Vec::new()));
        }

        let mut failures = Vec::new();
        let prepared = self.prepare_rows(job_id, rows, &mut failures);

        let bulk: Result<usize> =
            conn.transaction(|conn| self.insert_all(conn, job_id, &prepared));
        match bulk {
            Ok(inserted) => Ok((inserted, failures)),
            Err(err) if err.is_unique_violation() => {
                debug!("bulk insert hit a unique constraint, falling back to per-row savepoints");
                let mut inserted = 0usize;
                conn.transaction(|conn| -> Result<()> {
                    for row in &prepared {
                        // The nested transaction becomes a savepoint.
                        let outcome: Result<usize> =
                            conn.transaction(|conn| self.insert_single(conn, job_id, row));
                        match outcome {
                            Ok(_) => inserted += 1,
                            Err(err) if err.is_unique_violation() => {
                                failures.push((
                                    row.row_number(),
                                    "duplicate unique key rejected by constraint".to_string(),
                                ));
                            }
                            Err(err) => return Err(err),
                        }
                    }
                    Ok(())
                })?;
                Ok((inserted, failures))
            }
            Err(err) => Err(err),
        }
    }

    /// Converts normalized rows into the per-target insert representation,
    /// diverting rows that cannot be represented into `failures`.
    fn prepare_rows(
        &self,
        job_id: &Uuid,
        rows: &[NormalizedRow],
        failures: &mut Vec<(usize, String)>,
    ) -> Vec<PreparedRow> {
        let mut prepared = Vec::with_capacity(rows.len());
        for row in rows {
            match self {
                TargetTable::Vehicles => match to_vehicle(row, job_id) {
                    Ok(vehicle) => prepared.push(PreparedRow::Vehicle {
                        row_number: row.row_number,
                        vehicle,
                    }),
                    Err(reason) => failures.push((row.row_number, reason)),
                },
                TargetTable::Dynamic { columns, .. } => {
                    let values = columns
                        .iter()
                        .map(|column| row.value(column).cloned().unwrap_or(FieldValue::Null))
                        .collect();
                    prepared.push(PreparedRow::Dynamic {
                        row_number: row.row_number,
                        values,
                    });
                }
            }
        }
        prepared
    }

    fn insert_all(
        &self,
        conn: &mut DbConn,
        job_id: &Uuid,
        prepared: &[PreparedRow],
    ) -> Result<usize> {
        match self {
            TargetTable::Vehicles => {
                let batch: Vec<vehicles::NewVehicle> = prepared
                    .iter()
                    .filter_map(PreparedRow::as_vehicle)
                    .cloned()
                    .collect();
                vehicles::insert_batch(conn, &batch)
            }
            TargetTable::Dynamic { table, columns } => {
                let values: Vec<Vec<FieldValue>> = prepared
                    .iter()
                    .filter_map(PreparedRow::as_values)
                    .map(<[FieldValue]>::to_vec)
                    .collect();
                dynamic_targets::insert_rows(conn, table, columns, &values, job_id)
            }
        }
    }

    fn insert_single(
        &self,
        conn: &mut DbConn,
        job_id: &Uuid,
        row: &PreparedRow,
    ) -> Result<usize> {
        match (self, row) {
            (TargetTable::Vehicles, PreparedRow::Vehicle { vehicle, .. }) => {
                vehicles::insert_one(conn, vehicle)
            }
            (TargetTable::Dynamic { table, columns }, PreparedRow::Dynamic { values, .. }) => {
                dynamic_targets::insert_row(conn, table, columns, values, job_id)
            }
            _ => Err((
                ErrorKind::TargetTableError,
                "prepared row does not match target kind",
            )
                .into()),
        }
    }
}

enum PreparedRow {
    Vehicle {
        row_number: usize,
        vehicle: vehicles::NewVehicle,
    },
    Dynamic {
        row_number: usize,
        values: Vec<FieldValue>,
    },
}

impl PreparedRow {
    fn row_number(&self) -> usize {
        match self {
            PreparedRow::Vehicle { row_number, .. } => *row_number,
            PreparedRow::Dynamic { row_number, .. } => *row_number,
        }
    }

    fn as_vehicle(&self) -> Option<&vehicles::NewVehicle> {
        match self {
            PreparedRow::Vehicle { vehicle, .. } => Some(vehicle),
            PreparedRow::Dynamic { .. } => None,
        }
    }

    fn as_values(&self) -> Option<&[FieldValue]> {
        match self {
            PreparedRow::Dynamic { values, .. } => Some(values),
            PreparedRow::Vehicle { .. } => None,
        }
    }
}

fn to_vehicle(
    row: &NormalizedRow,
    job_id: &Uuid,
) -> std::result::Result<vehicles::NewVehicle, String> {
    let modelo = match row.value("modelo") {
        Some(FieldValue::Text(text)) => text.clone(),
        _ => return Err("required modelo".to_string()),
    };
    let placa = match row.value("placa") {
        Some(FieldValue::Text(text)) => text.clone(),
        _ => return Err("required placa".to_string()),
    };
    let ano = match row.value("ano") {
        Some(FieldValue::Int(year)) => {
            Some(i32::try_from(*year).map_err(|_| "year out of range".to_string())?)
        }
        Some(FieldValue::Null) | None => None,
        Some(_) => return Err("invalid ano".to_string()),
    };
    let valor_fipe = match row.value("valor_fipe") {
        Some(FieldValue::Decimal(amount)) => Some(amount.clone()),
        Some(FieldValue::Int(amount)) => Some(BigDecimal::from(*amount)),
        Some(FieldValue::Null) | None => None,
        Some(_) => return Err("invalid valor_fipe".to_string()),
    };

    Ok(vehicles::NewVehicle {
        modelo,
        placa,
        ano,
        valor_fipe,
        job_id: *job_id,
    })
}
