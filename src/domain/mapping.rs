use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, ErrorKind, Result};

/// PostgreSQL identifiers we are willing to interpolate into DDL/DML.
/// Anything else is rejected at parse time, before a mapping ever reaches
/// the row processor.
static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z_][a-z0-9_]*$").expect("invalid identifier regex"));

const MAX_IDENTIFIER_LEN: usize = 63;

/// Closed set of column type tags. Each tag selects a coercion strategy in
/// `ingest::coerce`; the `Fk` tag additionally carries its resolution policy
/// in [`ColumnMapping::fk`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    Int,
    Float,
    Decimal,
    Date,
    Datetime,
    Boolean,
    Fk,
}

impl ColumnType {
    /// SQL type used when provisioning a dynamic target table.
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::String => "TEXT",
            ColumnType::Int => "BIGINT",
            ColumnType::Float => "DOUBLE PRECISION",
            ColumnType::Decimal => "NUMERIC",
            ColumnType::Date => "DATE",
            ColumnType::Datetime => "TIMESTAMPTZ",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Fk => "UUID",
        }
    }
}

/// Declared value validators, applied after coercion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueRule {
    /// Mercosul plate pattern; the value is upper-cased before matching.
    Plate,
    /// Year within `[1900, current year + 1]`.
    Year,
    /// Strictly positive monetary amount.
    PositiveAmount,
}

/// What to do when a foreign-key lookup finds no row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnMissing {
    Create,
    Ignore,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FkMapping {
    pub table: String,
    pub lookup_column: String,
    pub on_missing: OnMissing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub source_column: String,
    pub db_column: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<ValueRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fk: Option<FkMapping>,
}

/// Caller-supplied description of how source columns become target columns.
///
/// Unknown JSON fields (display names, descriptions, icons) are tolerated on
/// deserialization so richer persisted template shapes stay readable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingConfig {
    pub target_table: String,
    #[serde(default)]
    pub create_table: bool,
    pub columns: Vec<ColumnMapping>,
}

impl MappingConfig {
    /// Deserializes and validates a mapping in one step. All downstream code
    /// may assume a parsed mapping only contains safe identifiers and a
    /// coherent column list.
    pub fn parse(value: serde_json::Value) -> Result<Self> {
        let config: MappingConfig = serde_json::from_value(value).map_err(|err| {
            Error::from((
                ErrorKind::InvalidMapping,
                "mapping configuration does not match the expected shape",
                err.to_string(),
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        check_identifier("target_table", &self.target_table)?;

        if self.columns.is_empty() {
            return Err((
                ErrorKind::InvalidMapping,
                "mapping configuration must map at least one column",
            )
                .into());
        }

        for column in &self.columns {
            if column.source_column.trim().is_empty() {
                return Err((
                    ErrorKind::InvalidMapping,
                    "source_column must not be empty",
                )
                    .into());
            }
            check_identifier("db_column", &column.db_column)?;

            match (column.column_type, &column.fk) {
                (ColumnType::Fk, None) => {
                    return Err((
                        ErrorKind::InvalidMapping,
                        "fk columns must carry a fk resolution block",
                        column.db_column.clone(),
                    )
                        .into());
                }
                (ColumnType::Fk, Some(fk)) => {
                    check_identifier("fk.table", &fk.table)?;
                    check_identifier("fk.lookup_column", &fk.lookup_column)?;
                }
                (_, Some(_)) => {
                    return Err((
                        ErrorKind::InvalidMapping,
                        "only fk columns may carry a fk resolution block",
                        column.db_column.clone(),
                    )
                        .into());
                }
                (_, None) => {}
            }
        }

        Ok(())
    }

    /// Source columns the header must contain: every `required` mapping plus
    /// every uniqueness key (duplicate detection is impossible without them).
    pub fn required_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.required || c.unique)
            .map(|c| c.source_column.clone())
            .collect()
    }

    /// Column mappings designated as uniqueness keys.
    pub fn unique_columns(&self) -> impl Iterator<Item = &ColumnMapping> {
        self.columns.iter().filter(|c| c.unique)
    }

    /// The built-in fixed-schema preset used when a submission carries no
    /// mapping: the `vehicles` table fed by FIPE-style spreadsheets.
    pub fn vehicle_preset() -> Self {
        MappingConfig {
            target_table: "vehicles".to_string(),
            create_table: false,
            columns: vec![
                ColumnMapping {
                    source_column: "modelo".to_string(),
                    db_column: "modelo".to_string(),
                    column_type: ColumnType::String,
                    required: true,
                    unique: false,
                    rule: None,
                    fk: None,
                },
                ColumnMapping {
                    source_column: "placa".to_string(),
                    db_column: "placa".to_string(),
                    column_type: ColumnType::String,
                    required: true,
                    unique: true,
                    rule: Some(ValueRule::Plate),
                    fk: None,
                },
                ColumnMapping {
                    source_column: "ano".to_string(),
                    db_column: "ano".to_string(),
                    column_type: ColumnType::Int,
                    required: false,
                    unique: false,
                    rule: Some(ValueRule::Year),
                    fk: None,
                },
                ColumnMapping {
                    source_column: "valor_fipe".to_string(),
                    db_column: "valor_fipe".to_string(),
                    column_type: ColumnType::Decimal,
                    required: false,
                    unique: false,
                    rule: Some(ValueRule::PositiveAmount),
                    fk: None,
                },
            ],
        }
    }
}

fn check_identifier(field: &'static str, value: &str) -> Result<()> {
    if value.len() > MAX_IDENTIFIER_LEN || !IDENTIFIER.is_match(value) {
        return Err((
            ErrorKind::InvalidMapping,
            "identifier must match ^[a-z_][a-z0-9_]*$",
            format!("{field}: {value:?}"),
        )
            .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn minimal_mapping() -> serde_json::Value {
        json!({
            "target_table": "fleet_cars",
            "create_table": true,
            "columns": [
                {"source_column": "Modelo", "db_column": "modelo", "type": "string", "required": true},
                {"source_column": "Placa", "db_column": "placa", "type": "string", "unique": true},
            ]
        })
    }

    #[test]
    fn parses_a_valid_mapping() {
        let config = MappingConfig::parse(minimal_mapping()).unwrap();
        assert_eq!(config.target_table, "fleet_cars");
        assert!(config.create_table);
        assert_eq!(config.columns.len(), 2);
        assert!(config.columns[1].unique);
    }

    #[test]
    fn tolerates_unknown_additive_fields() {
        let mut value = minimal_mapping();
        value["entity_display_name"] = json!("Fleet");
        value["description"] = json!("cars");
        value["icon"] = json!("car");
        assert!(MappingConfig::parse(value).is_ok());
    }

    #[test]
    fn rejects_unsafe_identifiers() {
        let mut value = minimal_mapping();
        value["target_table"] = json!("cars; DROP TABLE import_jobs");
        let err = MappingConfig::parse(value).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::InvalidMapping));

        let mut value = minimal_mapping();
        value["columns"][0]["db_column"] = json!("Modelo Upper");
        assert!(MappingConfig::parse(value).is_err());
    }

    #[test]
    fn rejects_empty_column_list() {
        let value = json!({"target_table": "cars", "columns": []});
        assert!(MappingConfig::parse(value).is_err());
    }

    #[test]
    fn fk_columns_must_carry_resolution() {
        let value = json!({
            "target_table": "cars",
            "columns": [
                {"source_column": "owner", "db_column": "owner_id", "type": "fk"},
            ]
        });
        assert!(MappingConfig::parse(value).is_err());

        let value = json!({
            "target_table": "cars",
            "columns": [
                {
                    "source_column": "owner",
                    "db_column": "owner_id",
                    "type": "fk",
                    "fk": {"table": "owners", "lookup_column": "name", "on_missing": "create"}
                },
            ]
        });
        let config = MappingConfig::parse(value).unwrap();
        assert_eq!(
            config.columns[0].fk.as_ref().unwrap().on_missing,
            OnMissing::Create
        );
    }

    #[test]
    fn non_fk_columns_must_not_carry_resolution() {
        let value = json!({
            "target_table": "cars",
            "columns": [
                {
                    "source_column": "modelo",
                    "db_column": "modelo",
                    "type": "string",
                    "fk": {"table": "owners", "lookup_column": "name", "on_missing": "error"}
                },
            ]
        });
        assert!(MappingConfig::parse(value).is_err());
    }

    #[test]
    fn required_columns_include_unique_keys() {
        let preset = MappingConfig::vehicle_preset();
        let required = preset.required_columns();
        assert!(required.contains(&"modelo".to_string()));
        assert!(required.contains(&"placa".to_string()));
        assert!(!required.contains(&"ano".to_string()));
    }

    #[test]
    fn vehicle_preset_is_internally_valid() {
        let preset = MappingConfig::vehicle_preset();
        let round_tripped =
            MappingConfig::parse(serde_json::to_value(&preset).unwrap()).unwrap();
        assert_eq!(round_tripped, preset);
        assert_eq!(round_tripped.unique_columns().count(), 1);
    }
}
