//! XLSX/XLS reader backed by calamine.
//!
//! There is no chunked decoder for the binary workbook formats, so the first
//! sheet is buffered whole and then emitted as chunk-sized slices. The
//! upload size ceiling keeps this bounded.

use std::path::Path;
use std::sync::Arc;

use calamine::{Data, Reader, open_workbook_auto};

use crate::reader::{RowChunks, SheetRow};
use crate::{Error, ErrorKind, Result};

fn workbook_error(detail: String) -> Error {
    (
        ErrorKind::ReaderError,
        "failed to read workbook",
        detail,
    )
        .into()
}

/// Loads the first sheet: trimmed header plus raw data rows as strings.
fn load_sheet(path: &Path) -> Result<(Vec<String>, Vec<Vec<String>>)> {
    let mut workbook = open_workbook_auto(path).map_err(|err| workbook_error(err.to_string()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| workbook_error("workbook has no sheets".to_string()))?
        .map_err(|err| workbook_error(err.to_string()))?;

    let mut rows = range.rows();
    let header = rows
        .next()
        .map(|cells| {
            cells
                .iter()
                .map(|cell| cell_to_string(cell).trim().to_string())
                .collect()
        })
        .unwrap_or_default();
    let data = rows
        .map(|cells| cells.iter().map(cell_to_string).collect())
        .collect();

    Ok((header, data))
}

pub fn read_header(path: &Path) -> Result<Vec<String>> {
    let (header, _) = load_sheet(path)?;
    Ok(header)
}

pub fn count_rows(path: &Path) -> Result<usize> {
    let (_, data) = load_sheet(path)?;
    Ok(data.len())
}

pub fn read_chunks(path: &Path, chunk_size: usize) -> Result<RowChunks> {
    let (header, data) = load_sheet(path)?;
    Ok(Box::new(BufferedChunks {
        rows: data.into_iter(),
        columns: Arc::new(header),
        chunk_size: chunk_size.max(1),
    }))
}

struct BufferedChunks {
    rows: std::vec::IntoIter<Vec<String>>,
    columns: Arc<Vec<String>>,
    chunk_size: usize,
}

impl Iterator for BufferedChunks {
    type Item = Result<Vec<SheetRow>>;

    fn next(&mut self) -> Option<Self::Item> {
        let chunk: Vec<SheetRow> = self
            .rows
            .by_ref()
            .take(self.chunk_size)
            .map(|values| SheetRow::new(Arc::clone(&self.columns), values))
            .collect();
        if chunk.is_empty() { None } else { Some(Ok(chunk)) }
    }
}

/// Renders one workbook cell as the raw string the coercion layer expects.
/// Integral floats lose their trailing `.0`; dates render as ISO-8601.
fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(text) => text.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < 9e15 {
                format!("{}", *f as i64)
            } else {
                f.to_string()
            }
        }
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(instant) if instant.time() == chrono::NaiveTime::MIN => {
                instant.format("%Y-%m-%d").to_string()
            }
            Some(instant) => instant.format("%Y-%m-%dT%H:%M:%S").to_string(),
            None => dt.as_f64().to_string(),
        },
        Data::DateTimeIso(text) | Data::DurationIso(text) => text.clone(),
        Data::Error(_) => String::new(),
    }
}
