//! Writers for clustered tables, sweep results and reports.
//!
//! This module provides:
//! - CSV export of an augmented profile table (with cluster labels)
//! - CSV export of sweep results in long form
//! - CSV export of per-cluster statistics
//! - Plain-text export of summary reports

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use thiserror::Error;

use super::table::{ProfileTable, CLUSTER_COLUMN, PROBABILITY_COLUMN};
use crate::processors::cluster_stats::{ClusterSlope, ProfileClusterStat};
use crate::processors::sweep::SweepResult;

/// Errors that can occur during write operations.
#[derive(Error, Debug)]
pub enum WriteError {
    /// Failed to create parent directories.
    #[error("failed to create parent directories for '{path}': {source}")]
    CreateDirectory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to create or open file for writing.
    #[error("failed to create file '{path}': {source}")]
    CreateFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write data to file.
    #[error("failed to write to file '{path}': {source}")]
    WriteFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// CSV writing error.
    #[error("CSV write error for '{path}': {source}")]
    CsvError {
        path: String,
        #[source]
        source: csv::Error,
    },
}

/// Result type for write operations.
pub type Result<T> = std::result::Result<T, WriteError>;

/// Creates parent directories for a file path if they don't exist.
fn ensure_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| WriteError::CreateDirectory {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
    }
    Ok(())
}

fn create_csv_writer(path: &Path) -> Result<csv::Writer<BufWriter<File>>> {
    ensure_parent_dirs(path)?;
    let file = File::create(path).map_err(|e| WriteError::CreateFile {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(csv::Writer::from_writer(BufWriter::new(file)))
}

fn write_row<W: Write>(writer: &mut csv::Writer<W>, path: &Path, row: &[String]) -> Result<()> {
    writer.write_record(row).map_err(|e| WriteError::CsvError {
        path: path.display().to_string(),
        source: e,
    })
}

fn finish<W: Write>(mut writer: csv::Writer<W>, path: &Path) -> Result<()> {
    writer.flush().map_err(|e| WriteError::WriteFile {
        path: path.display().to_string(),
        source: e,
    })
}

/// Format a value for CSV output; missing values become empty cells.
fn fmt_value(v: f64) -> String {
    if v.is_nan() {
        String::new()
    } else {
        v.to_string()
    }
}

/// Write a profile table to CSV.
///
/// Columns are `entry`, `vertical`, every numeric column in insertion order,
/// then `cluster` and `clst_prob` when the table has been clustered.
///
/// # Errors
///
/// Returns an error if parent directories or the file cannot be created, or
/// if writing fails.
pub fn write_table_csv(path: &Path, table: &ProfileTable) -> Result<()> {
    let mut writer = create_csv_writer(path)?;

    let names = table.column_names();
    let clusters = table.clusters();
    let probabilities = table.probabilities();

    let mut header: Vec<String> = vec!["entry".to_string(), "vertical".to_string()];
    header.extend(names.iter().map(|n| n.to_string()));
    if clusters.is_some() {
        header.push(CLUSTER_COLUMN.to_string());
        header.push(PROBABILITY_COLUMN.to_string());
    }
    write_row(&mut writer, path, &header)?;

    let columns: Vec<&[f64]> = names
        .iter()
        .filter_map(|n| table.get_column(n))
        .collect();

    for row in 0..table.len() {
        let mut record = Vec::with_capacity(header.len());
        record.push(table.entries()[row].to_string());
        record.push(table.verticals()[row].to_string());
        record.extend(columns.iter().map(|c| fmt_value(c[row])));
        if let (Some(labels), Some(probs)) = (clusters, probabilities) {
            record.push(labels[row].to_string());
            record.push(fmt_value(probs[row]));
        }
        write_row(&mut writer, path, &record)?;
    }

    finish(writer, path)
}

/// Write a sweep result in long form: one row per (z, x) combination.
pub fn write_sweep_csv(path: &Path, result: &SweepResult) -> Result<()> {
    let mut writer = create_csv_writer(path)?;
    write_row(
        &mut writer,
        path,
        &[
            "z".to_string(),
            "x".to_string(),
            "n_clusters".to_string(),
            "relative_validity".to_string(),
        ],
    )?;

    for (zi, z) in result.z_values.iter().enumerate() {
        for (xi, x) in result.x_values.iter().enumerate() {
            write_row(
                &mut writer,
                path,
                &[
                    z.map(fmt_value).unwrap_or_default(),
                    fmt_value(*x),
                    result.n_clusters[zi][xi].to_string(),
                    fmt_value(result.relative_validity[zi][xi]),
                ],
            )?;
        }
    }

    finish(writer, path)
}

/// Write per-cluster lateral density ratios.
pub fn write_slopes_csv(path: &Path, slopes: &[ClusterSlope]) -> Result<()> {
    let mut writer = create_csv_writer(path)?;
    write_row(
        &mut writer,
        path,
        &[
            "cluster", "n_points", "slope", "alpha", "beta", "R_L", "y_mean",
        ]
        .map(String::from),
    )?;
    for s in slopes {
        write_row(
            &mut writer,
            path,
            &[
                s.cluster.to_string(),
                s.n_points.to_string(),
                fmt_value(s.slope),
                fmt_value(s.mean_alpha),
                fmt_value(s.mean_beta),
                fmt_value(s.lateral_density_ratio),
                fmt_value(s.y_mean),
            ],
        )?;
    }
    finish(writer, path)
}

/// Write per-profile, per-cluster tracks.
pub fn write_tracks_csv(path: &Path, tracks: &[ProfileClusterStat]) -> Result<()> {
    let mut writer = create_csv_writer(path)?;
    write_row(
        &mut writer,
        path,
        &["entry", "cluster", "n_points", "mean", "half_span"].map(String::from),
    )?;
    for t in tracks {
        write_row(
            &mut writer,
            path,
            &[
                t.entry.to_string(),
                t.cluster.to_string(),
                t.n_points.to_string(),
                fmt_value(t.mean),
                fmt_value(t.half_span),
            ],
        )?;
    }
    finish(writer, path)
}

/// Write a plain-text report.
pub fn write_text(path: &Path, text: &str) -> Result<()> {
    ensure_parent_dirs(path)?;
    fs::write(path, text).map_err(|e| WriteError::WriteFile {
        path: path.display().to_string(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SweepParam;
    use tempfile::tempdir;

    #[test]
    fn test_write_table_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("out.csv");

        let mut table = ProfileTable::new(vec![1, 2], vec![0, 0])
            .unwrap()
            .with_column("SP", vec![34.5, f64::NAN])
            .unwrap();
        table.set_clusters(vec![0, -1], vec![1.0, 0.0]).unwrap();

        write_table_csv(&path, &table).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "entry,vertical,SP,cluster,clst_prob");
        assert_eq!(lines[1], "1,0,34.5,0,1");
        assert_eq!(lines[2], "2,0,,-1,0");
    }

    #[test]
    fn test_write_table_csv_unclustered() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let table = ProfileTable::new(vec![3], vec![4])
            .unwrap()
            .with_column("press", vec![250.0])
            .unwrap();
        write_table_csv(&path, &table).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().next(), Some("entry,vertical,press"));
    }

    #[test]
    fn test_write_sweep_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sweep.csv");
        let result = SweepResult {
            x_param: SweepParam::MinClusterSize,
            z_param: None,
            x_values: vec![10.0, 20.0],
            z_values: vec![None],
            n_clusters: vec![vec![3, 1]],
            relative_validity: vec![vec![0.5, 0.25]],
        };
        write_sweep_csv(&path, &result).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], ",10,3,0.5");
        assert_eq!(lines[2], ",20,1,0.25");
    }

    #[test]
    fn test_write_text() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("summary.txt");
        write_text(&path, "Group 1:\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "Group 1:\n");
    }
}
