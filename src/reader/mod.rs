//! Uniform streaming, chunked view over CSV, XLSX and XLS inputs.
//!
//! CSV chunks are produced incrementally as bytes are read. The binary
//! workbook formats have no chunked decoder, so those sheets are buffered
//! whole and then emitted as slices; the upload size ceiling bounds the
//! peak memory this costs.

pub mod csv;
pub mod excel;

use std::path::Path;
use std::sync::Arc;

use crate::{Error, ErrorKind, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetFormat {
    Csv,
    Xlsx,
    Xls,
}

impl SheetFormat {
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_lowercase().as_str() {
            "csv" => Some(SheetFormat::Csv),
            "xlsx" => Some(SheetFormat::Xlsx),
            "xls" => Some(SheetFormat::Xls),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
            .ok_or_else(|| {
                Error::from((
                    ErrorKind::UnsupportedFormat,
                    "unsupported spreadsheet format",
                    path.display().to_string(),
                ))
            })
    }

    pub fn extension(&self) -> &'static str {
        match self {
            SheetFormat::Csv => "csv",
            SheetFormat::Xlsx => "xlsx",
            SheetFormat::Xls => "xls",
        }
    }
}

/// One data row, preserving source column order. The header is shared
/// between all rows of a file.
#[derive(Debug, Clone)]
pub struct SheetRow {
    columns: Arc<Vec<String>>,
    values: Vec<String>,
}

impl SheetRow {
    pub fn new(columns: Arc<Vec<String>>, values: Vec<String>) -> Self {
        SheetRow { columns, values }
    }

    /// Looks a cell up by column name: case-insensitive exact match after
    /// trimming, mirroring header validation.
    pub fn get(&self, name: &str) -> Option<&str> {
        let wanted = name.trim();
        self.columns
            .iter()
            .position(|column| column.trim().eq_ignore_ascii_case(wanted))
            .and_then(|index| self.values.get(index))
            .map(String::as_str)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }
}

/// Lazy sequence of row chunks, each at most `chunk_size` rows.
pub type RowChunks = Box<dyn Iterator<Item = Result<Vec<SheetRow>>> + Send>;

/// Counts data rows (header excluded) in a single streaming pass. Equals
/// the total that [`read_chunks`] will yield.
pub fn count_rows(path: &Path) -> Result<usize> {
    match SheetFormat::from_path(path)? {
        SheetFormat::Csv => csv::count_rows(path),
        SheetFormat::Xlsx | SheetFormat::Xls => excel::count_rows(path),
    }
}

/// Returns the header row, trimmed, in source order.
pub fn read_header(path: &Path) -> Result<Vec<String>> {
    match SheetFormat::from_path(path)? {
        SheetFormat::Csv => csv::read_header(path),
        SheetFormat::Xlsx | SheetFormat::Xls => excel::read_header(path),
    }
}

/// Opens the file as a lazy sequence of row chunks, header stripped.
pub fn read_chunks(path: &Path, chunk_size: usize) -> Result<RowChunks> {
    match SheetFormat::from_path(path)? {
        SheetFormat::Csv => csv::read_chunks(path, chunk_size),
        SheetFormat::Xlsx | SheetFormat::Xls => excel::read_chunks(path, chunk_size),
    }
}

/// Verifies the header contains every required column (case-insensitive
/// exact match after trimming); returns the missing names.
pub fn validate_header(path: &Path, required_columns: &[String]) -> Result<Vec<String>> {
    let header = read_header(path)?;
    let missing = required_columns
        .iter()
        .filter(|required| {
            !header
                .iter()
                .any(|column| column.trim().eq_ignore_ascii_case(required.trim()))
        })
        .cloned()
        .collect();
    Ok(missing)
}
