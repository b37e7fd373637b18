//! Streaming CSV reader with delimiter auto-detection.

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use csv::{ReaderBuilder, StringRecord};

use crate::reader::{RowChunks, SheetRow};
use crate::{Error, ErrorKind, Result};

/// Candidate delimiters, scored by their count in the header line.
/// Comma wins ties and is the fallback.
pub fn detect_delimiter(header_line: &str) -> u8 {
    let mut best = (b',', 0usize);
    for candidate in [b',', b';', b'\t', b'|'] {
        let count = header_line.bytes().filter(|&b| b == candidate).count();
        if count > best.1 {
            best = (candidate, count);
        }
    }
    best.0
}

fn reader_error(err: csv::Error) -> Error {
    (
        ErrorKind::ReaderError,
        "failed to read CSV input",
        err.to_string(),
    )
        .into()
}

fn open_reader(path: &Path) -> Result<(csv::Reader<File>, Vec<String>)> {
    let mut file = File::open(path)?;
    let mut first_line = String::new();
    BufReader::new(&mut file).read_line(&mut first_line)?;
    file.seek(SeekFrom::Start(0))?;

    let delimiter = detect_delimiter(first_line.trim_end_matches(['\r', '\n']));
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(file);

    let header = reader
        .headers()
        .map_err(reader_error)?
        .iter()
        .map(|column| column.trim().to_string())
        .collect();

    Ok((reader, header))
}

pub fn read_header(path: &Path) -> Result<Vec<String>> {
    let (_, header) = open_reader(path)?;
    Ok(header)
}

pub fn count_rows(path: &Path) -> Result<usize> {
    let (mut reader, _) = open_reader(path)?;
    let mut count = 0usize;
    let mut record = StringRecord::new();
    while reader.read_record(&mut record).map_err(reader_error)? {
        count += 1;
    }
    Ok(count)
}

pub fn read_chunks(path: &Path, chunk_size: usize) -> Result<RowChunks> {
    let (reader, header) = open_reader(path)?;
    Ok(Box::new(CsvChunks {
        reader,
        columns: Arc::new(header),
        chunk_size: chunk_size.max(1),
        done: false,
    }))
}

struct CsvChunks {
    reader: csv::Reader<File>,
    columns: Arc<Vec<String>>,
    chunk_size: usize,
    done: bool,
}

impl Iterator for CsvChunks {
    type Item = Result<Vec<SheetRow>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut rows = Vec::with_capacity(self.chunk_size);
        let mut record = StringRecord::new();
        while rows.len() < self.chunk_size {
            match self.reader.read_record(&mut record) {
                Ok(true) => {
                    let values = record.iter().map(str::to_string).collect();
                    rows.push(SheetRow::new(Arc::clone(&self.columns), values));
                }
                Ok(false) => {
                    self.done = true;
                    break;
                }
                Err(err) => {
                    self.done = true;
                    return Some(Err(reader_error(err)));
                }
            }
        }

        if rows.is_empty() { None } else { Some(Ok(rows)) }
    }
}
