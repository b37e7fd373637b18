//! Field coercion and declared-rule validation.
//!
//! Raw spreadsheet cells arrive as strings. Each mapped column carries a
//! [`ColumnType`] tag selecting the coercion strategy here, plus an optional
//! [`ValueRule`] applied after coercion. Failures are row-level: they are
//! reported as human-readable reasons and never abort the job.

use std::str::FromStr;
use std::sync::LazyLock;

use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{Datelike, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use uuid::Uuid;

use crate::domain::mapping::{ColumnMapping, ColumnType, ValueRule};

/// Mercosul plate pattern, applied after upper-casing.
static PLATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]{3}[0-9][A-Z0-9][0-9]{2}$").expect("invalid plate regex"));

/// Accepted date formats: ISO-8601 first, then the regional variants.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%d-%m-%Y"];

/// Accepted datetime formats (RFC 3339 is tried before these).
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

const TRUE_WORDS: &[&str] = &["true", "1", "yes", "sim"];
const FALSE_WORDS: &[&str] = &["false", "0", "no", "não", "nao"];

const YEAR_FLOOR: i64 = 1900;

/// A coerced field value, ready for insertion into the target table.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Int(i64),
    Float(f64),
    Decimal(BigDecimal),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Bool(bool),
    Key(Uuid),
    Null,
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }
}

/// Normalizes a raw cell: trims, strips one pair of surrounding quotes, and
/// replaces non-breaking spaces.
pub fn normalize_cell(cell: &str) -> String {
    let s = cell.trim();
    let s = s
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| s.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
        .unwrap_or(s);
    s.replace('\u{00A0}', " ").trim().to_string()
}

/// Normalized uniqueness key for a raw cell: trim plus case-fold. Textual
/// keys compare case-insensitively; numeric keys pass through unchanged.
pub fn normalize_key(cell: &str) -> String {
    normalize_cell(cell).to_uppercase()
}

/// Coerces one raw cell according to its column mapping and applies the
/// declared rule, if any. `Ok(Null)` means the optional field was absent.
pub fn coerce_field(raw: Option<&str>, column: &ColumnMapping) -> Result<FieldValue, String> {
    let cell = raw.map(normalize_cell).unwrap_or_default();

    if cell.is_empty() {
        if column.required {
            return Err(format!("required {}", column.source_column));
        }
        return Ok(FieldValue::Null);
    }

    let value = match column.column_type {
        ColumnType::String => FieldValue::Text(cell),
        ColumnType::Int => FieldValue::Int(parse_int(&cell)?),
        ColumnType::Float => FieldValue::Float(parse_float(&cell)?),
        ColumnType::Decimal => FieldValue::Decimal(parse_decimal(&cell)?),
        ColumnType::Date => FieldValue::Date(parse_date(&cell)?),
        ColumnType::Datetime => FieldValue::DateTime(parse_datetime(&cell)?),
        ColumnType::Boolean => FieldValue::Bool(parse_bool(&cell)?),
        // Foreign keys are resolved against the database later; keep the
        // lookup value as text here.
        ColumnType::Fk => FieldValue::Text(cell),
    };

    match column.rule {
        Some(rule) => apply_rule(rule, value),
        None => Ok(value),
    }
}

fn apply_rule(rule: ValueRule, value: FieldValue) -> Result<FieldValue, String> {
    match rule {
        ValueRule::Plate => {
            let FieldValue::Text(text) = value else {
                return Err("plate rule requires a textual column".to_string());
            };
            let plate = text.to_uppercase();
            if PLATE.is_match(&plate) {
                Ok(FieldValue::Text(plate))
            } else {
                Err(format!("invalid plate '{}'", text))
            }
        }
        ValueRule::Year => {
            let year = match value {
                FieldValue::Int(year) => year,
                _ => return Err("year rule requires an integer column".to_string()),
            };
            let ceiling = i64::from(Utc::now().year()) + 1;
            if (YEAR_FLOOR..=ceiling).contains(&year) {
                Ok(FieldValue::Int(year))
            } else {
                Err("year out of range".to_string())
            }
        }
        ValueRule::PositiveAmount => {
            let positive = match &value {
                FieldValue::Decimal(amount) => *amount > BigDecimal::from(0),
                FieldValue::Int(amount) => *amount > 0,
                FieldValue::Float(amount) => *amount > 0.0,
                _ => return Err("positive amount rule requires a numeric column".to_string()),
            };
            if positive {
                Ok(value)
            } else {
                Err("non-positive value".to_string())
            }
        }
    }
}

fn parse_int(cell: &str) -> Result<i64, String> {
    if let Ok(parsed) = cell.parse::<i64>() {
        return Ok(parsed);
    }
    // Integral decimals without a fractional part are accepted ("2020.0").
    let decimal = parse_decimal(cell)?;
    if decimal.is_integer() {
        decimal
            .to_i64()
            .ok_or_else(|| format!("integer out of range '{}'", cell))
    } else {
        Err(format!("invalid integer '{}'", cell))
    }
}

fn parse_float(cell: &str) -> Result<f64, String> {
    clean_numeric(cell)
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .ok_or_else(|| format!("invalid number '{}'", cell))
}

fn parse_decimal(cell: &str) -> Result<BigDecimal, String> {
    BigDecimal::from_str(&clean_numeric(cell)).map_err(|_| format!("invalid number '{}'", cell))
}

/// Strips currency markers and resolves the decimal separator: when both
/// `.` and `,` appear, the rightmost one wins; a lone comma is a decimal
/// comma; repeated separators of one kind are thousands marks.
fn clean_numeric(cell: &str) -> String {
    let stripped: String = cell
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, 'R' | '$' | '€' | '£'))
        .collect();

    let last_dot = stripped.rfind('.');
    let last_comma = stripped.rfind(',');

    match (last_dot, last_comma) {
        (Some(dot), Some(comma)) if comma > dot => stripped
            .chars()
            .filter(|c| *c != '.')
            .map(|c| if c == ',' { '.' } else { c })
            .collect(),
        (Some(_), Some(_)) => stripped.chars().filter(|c| *c != ',').collect(),
        (None, Some(comma)) => {
            if stripped.matches(',').count() == 1 {
                let mut s = stripped.clone();
                s.replace_range(comma..=comma, ".");
                s
            } else {
                stripped.chars().filter(|c| *c != ',').collect()
            }
        }
        (Some(_), None) => {
            if stripped.matches('.').count() == 1 {
                stripped
            } else {
                stripped.chars().filter(|c| *c != '.').collect()
            }
        }
        (None, None) => stripped,
    }
}

fn parse_date(cell: &str) -> Result<NaiveDate, String> {
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(cell, format) {
            return Ok(date);
        }
    }
    Err(format!("invalid date '{}'", cell))
}

fn parse_datetime(cell: &str) -> Result<NaiveDateTime, String> {
    if let Ok(instant) = chrono::DateTime::parse_from_rfc3339(cell) {
        return Ok(instant.naive_utc());
    }
    for format in DATETIME_FORMATS {
        if let Ok(instant) = NaiveDateTime::parse_from_str(cell, format) {
            return Ok(instant);
        }
    }
    // A bare date is accepted as midnight.
    parse_date(cell)
        .map(|date| date.and_hms_opt(0, 0, 0).expect("midnight is always valid"))
        .map_err(|_| format!("invalid datetime '{}'", cell))
}

fn parse_bool(cell: &str) -> Result<bool, String> {
    let lowered = cell.to_lowercase();
    if TRUE_WORDS.contains(&lowered.as_str()) {
        Ok(true)
    } else if FALSE_WORDS.contains(&lowered.as_str()) {
        Ok(false)
    } else {
        Err(format!("invalid boolean '{}'", cell))
    }
}
