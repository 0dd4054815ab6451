//! Loaders for profile tables stored as CSV.
//!
//! The expected layout is one row per measurement with a header naming each
//! column. `entry` (or `prof_no` when `entry` is absent) identifies the
//! profile. `vertical` gives the vertical index; when it is missing the rows
//! of each profile are numbered in file order. Every other column is parsed
//! as a number. Empty cells and `nan` become `NaN`, and `true`/`false` flags
//! become `1.0`/`0.0`. Columns holding free text are skipped.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use csv::ReaderBuilder;
use thiserror::Error;

use super::table::{ProfileTable, TableError};

/// Errors that can occur during file loading.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Empty file: {0}")]
    EmptyFile(PathBuf),

    #[error("Missing required columns: {0}")]
    MissingColumns(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Table error: {0}")]
    Table(#[from] TableError),
}

/// Result type for loader operations.
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Parse a single cell into a numeric value.
///
/// Returns `None` for text that is neither a number, a null marker, nor a
/// boolean flag.
pub fn parse_cell(raw: &str) -> Option<f64> {
    let s = raw.trim();
    if s.is_empty() {
        return Some(f64::NAN);
    }
    match s.to_ascii_lowercase().as_str() {
        "nan" | "na" | "null" | "none" => return Some(f64::NAN),
        "true" => return Some(1.0),
        "false" => return Some(0.0),
        _ => {}
    }
    s.parse::<f64>().ok()
}

/// Load a profile table from a CSV file.
///
/// # Arguments
///
/// * `path` - Path to the CSV file
///
/// # Errors
///
/// Returns an error if the file cannot be read, has no data rows, lacks a
/// profile identifier column, or contains a repeated (entry, vertical) pair.
pub fn load_profile_csv<P: AsRef<Path>>(path: P) -> Result<ProfileTable> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(BufReader::new(file));

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let col_map: HashMap<&str, usize> = headers
        .iter()
        .enumerate()
        .map(|(i, name)| (name.as_str(), i))
        .collect();

    let entry_idx = col_map
        .get("entry")
        .or_else(|| col_map.get("prof_no"))
        .copied()
        .ok_or_else(|| LoaderError::MissingColumns("entry".to_string()))?;
    let vertical_idx = col_map
        .get("vertical")
        .or_else(|| col_map.get("Vertical"))
        .copied();

    let mut entries: Vec<i64> = Vec::with_capacity(4096);
    let mut verticals: Vec<u32> = Vec::with_capacity(4096);
    let mut values: Vec<Vec<Option<f64>>> = vec![Vec::with_capacity(4096); headers.len()];
    let mut next_vertical: HashMap<i64, u32> = HashMap::new();

    for (row_no, result) in reader.records().enumerate() {
        let record = result?;

        let entry_raw = record.get(entry_idx).unwrap_or("").trim();
        let entry = entry_raw
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(|v| v as i64)
            .ok_or_else(|| {
                LoaderError::ParseError(format!(
                    "{}: row {} has invalid profile id '{}'",
                    path.display(),
                    row_no + 1,
                    entry_raw
                ))
            })?;

        let vertical = match vertical_idx {
            Some(idx) => {
                let raw = record.get(idx).unwrap_or("").trim();
                raw.parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite() && *v >= 0.0)
                    .map(|v| v as u32)
                    .ok_or_else(|| {
                        LoaderError::ParseError(format!(
                            "{}: row {} has invalid vertical index '{}'",
                            path.display(),
                            row_no + 1,
                            raw
                        ))
                    })?
            }
            None => {
                let next = next_vertical.entry(entry).or_insert(0);
                let v = *next;
                *next += 1;
                v
            }
        };

        entries.push(entry);
        verticals.push(vertical);
        for (col, column_values) in values.iter_mut().enumerate() {
            column_values.push(parse_cell(record.get(col).unwrap_or("")));
        }
    }

    if entries.is_empty() {
        return Err(LoaderError::EmptyFile(path.to_path_buf()));
    }

    let mut table = ProfileTable::new(entries, verticals)?;

    for (col, name) in headers.iter().enumerate() {
        if col == entry_idx || Some(col) == vertical_idx || name.is_empty() {
            continue;
        }
        let parsed: Option<Vec<f64>> = values[col].iter().copied().collect();
        match parsed {
            Some(column) => table.insert_column(name, column)?,
            None => log::debug!("{}: skipping non-numeric column '{}'", path.display(), name),
        }
    }

    log::info!(
        "{}: loaded {} rows from {} profiles ({} columns)",
        path.display(),
        table.len(),
        table.n_profiles(),
        table.column_names().len()
    );

    Ok(table)
}

/// Load and concatenate several profile CSVs, one per data source.
///
/// # Errors
///
/// Fails if any file fails to load, if the files do not share their column
/// set, or if two files contain the same (entry, vertical) pair.
pub fn load_sources<P: AsRef<Path>>(paths: &[P]) -> Result<ProfileTable> {
    let tables = paths
        .iter()
        .map(load_profile_csv)
        .collect::<Result<Vec<_>>>()?;
    Ok(ProfileTable::concat(tables)?)
}
