//! Clustering engine: HDBSCAN over a pair of profile-table columns.
//!
//! A run:
//! 1. computes the two feature columns if they are derived variables
//! 2. drops rows with a null value on either feature
//! 3. clusters the remaining `(x, y)` points with [`hdbscan`]
//! 4. attaches `cluster` / `clst_prob` to the table
//! 5. appends any requested cluster aggregates (`ca_`, `pca_`, `cmc_`)
//!
//! # Example
//!
//! ```no_run
//! use itp_clustering::config::ClusteringConfig;
//! use itp_clustering::core::load_profile_csv;
//! use itp_clustering::processors::clustering::cluster_table;
//!
//! let table = load_profile_csv("itp2.csv").unwrap();
//! let config = ClusteringConfig { min_cluster_size: 80, ..Default::default() };
//! let outcome = cluster_table(&table, &config).unwrap();
//! println!("{} clusters, DBCV {:.4}", outcome.n_clusters, outcome.relative_validity);
//! ```

use thiserror::Error;

use super::aggregates::{calc_extra_cl_vars, AggregateError};
use super::derived::{calc_extra_vars, DerivedError};
use super::hdbscan::{hdbscan, HdbscanError, HdbscanParams};
use crate::config::ClusteringConfig;
use crate::core::table::{ProfileTable, TableError};

/// Errors raised by a clustering run.
#[derive(Debug, Error)]
pub enum ClusteringError {
    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Derived(#[from] DerivedError),

    #[error(transparent)]
    Hdbscan(#[from] HdbscanError),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),
}

/// Result type for clustering operations.
pub type Result<T> = std::result::Result<T, ClusteringError>;

/// A clustered table together with its quality metrics.
#[derive(Debug, Clone)]
pub struct ClusterOutcome {
    /// Input rows with non-null features, labelled
    pub table: ProfileTable,
    /// Relative validity of the clustering; only meaningful when
    /// `n_clusters > 0`
    pub relative_validity: f64,
    pub n_clusters: usize,
    /// Rows removed for a null feature value
    pub n_dropped: usize,
}

impl ClusterOutcome {
    pub fn n_noise(&self) -> usize {
        self.table
            .clusters()
            .map_or(0, |labels| labels.iter().filter(|&&l| l < 0).count())
    }
}

/// Cluster a table on `config.cl_x_var` and `config.cl_y_var`.
///
/// The input is not modified; the outcome carries a labelled copy.
///
/// # Errors
///
/// Fails when a feature or aggregate cannot be computed from the table's
/// columns, or when the cluster size parameters are zero.
pub fn cluster_table(table: &ProfileTable, config: &ClusteringConfig) -> Result<ClusterOutcome> {
    let x_var = config.cl_x_var.as_str();
    let y_var = config.cl_y_var.as_str();

    let mut working = table.clone();
    calc_extra_vars(&mut working, &[x_var, y_var])?;

    let mask = working.non_null_mask(&[x_var, y_var])?;
    let n_dropped = mask.iter().filter(|keep| !**keep).count();
    if n_dropped > 0 {
        log::warn!(
            "Dropping {} rows with null {} or {} before clustering",
            n_dropped,
            x_var,
            y_var
        );
        working = working.filter_rows(&mask);
    }

    let points: Vec<[f64; 2]> = working
        .column(x_var)?
        .iter()
        .zip(working.column(y_var)?)
        .map(|(&x, &y)| [x, y])
        .collect();

    let params = HdbscanParams::new(config.min_cluster_size, config.min_samples);
    let result = hdbscan(&points, &params)?;
    let n_noise = result.n_noise();

    working.set_clusters(result.labels, result.probabilities)?;

    if !config.extra_cl_vars.is_empty() {
        calc_extra_cl_vars(
            &mut working,
            config.extra_cl_vars.as_slice(),
            config.exclude_noise,
        )?;
    }

    log::info!(
        "Clustered {} points on ({}, {}): {} clusters, {} noise, DBCV {:.4}",
        points.len(),
        x_var,
        y_var,
        result.n_clusters,
        n_noise,
        result.relative_validity
    );

    Ok(ClusterOutcome {
        table: working,
        relative_validity: result.relative_validity,
        n_clusters: result.n_clusters,
        n_dropped,
    })
}
