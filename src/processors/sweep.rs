//! Cluster sweep driver.
//!
//! Re-runs the clustering engine over a range of one control parameter and,
//! optionally, a list of values for a second one. Every combination is
//! independent, so runs are spread over the `rayon` thread pool; results are
//! collected back in declaration order.

use rayon::prelude::*;
use thiserror::Error;

use super::clustering::{cluster_table, ClusteringError};
use super::derived::local_anomaly_bases;
use super::filtering::ProfileBounds;
use super::pipeline::{prepare_table, required_variables, PipelineError};
use crate::config::{PipelineConfig, SweepConfig, SweepParam};
use crate::core::table::ProfileTable;
use crate::core::transforms::MOVING_AVERAGE_PREFIX;

/// Errors raised by a sweep.
#[derive(Debug, Error)]
pub enum SweepError {
    #[error("sweep step must be positive and finite, got {0}")]
    InvalidStep(f64),

    #[error("x and z sweep parameters must differ (both are {0:?})")]
    SameParameter(SweepParam),

    #[error("{value} is not a valid value for {param:?}")]
    InvalidValue { param: SweepParam, value: f64 },

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Clustering(#[from] ClusteringError),
}

/// Result type for sweep operations.
pub type Result<T> = std::result::Result<T, SweepError>;

/// Cluster counts and validity scores indexed `[z][x]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepResult {
    pub x_param: SweepParam,
    pub z_param: Option<SweepParam>,
    pub x_values: Vec<f64>,
    /// `None` leaves the z parameter at its configured value
    pub z_values: Vec<Option<f64>>,
    pub n_clusters: Vec<Vec<usize>>,
    pub relative_validity: Vec<Vec<f64>>,
}

impl SweepResult {
    /// Number of (z, x) combinations.
    pub fn len(&self) -> usize {
        self.z_values.len() * self.x_values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Index `(z, x)` of the highest validity among runs that found clusters.
    pub fn best(&self) -> Option<(usize, usize)> {
        let mut best: Option<((usize, usize), f64)> = None;
        for (zi, row) in self.relative_validity.iter().enumerate() {
            for (xi, &score) in row.iter().enumerate() {
                if self.n_clusters[zi][xi] == 0 {
                    continue;
                }
                match best {
                    Some((_, s)) if score <= s => {}
                    _ => best = Some(((zi, xi), score)),
                }
            }
        }
        best.map(|(idx, _)| idx)
    }
}

/// Expand `[start, stop, step]` into values with `stop` excluded.
pub fn sweep_values(range: [f64; 3]) -> Result<Vec<f64>> {
    let [start, stop, step] = range;
    if !(step > 0.0) || !step.is_finite() {
        return Err(SweepError::InvalidStep(step));
    }
    let count = ((stop - start) / step).ceil();
    if !(count > 0.0) {
        return Ok(Vec::new());
    }
    Ok((0..count as usize).map(|i| start + i as f64 * step).collect())
}

fn as_count(param: SweepParam, value: f64) -> Result<usize> {
    if !value.is_finite() || value < 0.0 {
        return Err(SweepError::InvalidValue { param, value });
    }
    Ok(value.round() as usize)
}

/// Settings of one sweep step.
#[derive(Debug, Clone)]
struct Step {
    config: PipelineConfig,
    max_profile: Option<i64>,
}

impl Step {
    fn apply(&mut self, param: SweepParam, value: f64) -> Result<()> {
        match param {
            SweepParam::MinClusterSize => {
                self.config.clustering.min_cluster_size = as_count(param, value)?;
            }
            SweepParam::MinSamples => {
                self.config.clustering.min_samples = Some(as_count(param, value)?);
            }
            SweepParam::MaWindow => {
                if !(value > 0.0) || !value.is_finite() {
                    return Err(SweepError::InvalidValue { param, value });
                }
                self.config.moving_average.window_dbar = value;
            }
            SweepParam::NProfiles => {
                self.max_profile = Some(as_count(param, value)? as i64);
            }
        }
        Ok(())
    }
}

/// Copy of `raw` without the smoothed columns a new window would replace.
fn strip_smoothing(raw: &ProfileTable, config: &PipelineConfig) -> ProfileTable {
    let mut table = raw.clone();
    for base in local_anomaly_bases(&required_variables(config)) {
        table.drop_column(&format!("{}{}", MOVING_AVERAGE_PREFIX, base));
        table.drop_column(&format!("la_{}", base));
    }
    table
}

fn run_step(
    raw: &ProfileTable,
    shared: Option<&ProfileTable>,
    step: &Step,
    bounds: Option<&ProfileBounds>,
) -> Result<(usize, f64)> {
    let prepared;
    let table = match shared {
        Some(table) => table,
        None => {
            prepared = prepare_table(&strip_smoothing(raw, &step.config), &step.config, bounds)?;
            &prepared
        }
    };

    let outcome = match step.max_profile {
        Some(limit) => {
            let keep: Vec<bool> = table.entries().iter().map(|&e| e < limit).collect();
            cluster_table(&table.filter_rows(&keep), &step.config.clustering)?
        }
        None => cluster_table(table, &step.config.clustering)?,
    };

    log::debug!(
        "min_cs={} min_samps={:?} ma_win={} n_pfs={:?}: {} clusters, DBCV {:.4}",
        step.config.clustering.min_cluster_size,
        step.config.clustering.min_samples,
        step.config.moving_average.window_dbar,
        step.max_profile,
        outcome.n_clusters,
        outcome.relative_validity
    );
    Ok((outcome.n_clusters, outcome.relative_validity))
}

/// Run a clustering sweep.
///
/// # Arguments
///
/// * `raw` - Table as loaded, before any preparation
/// * `config` - Base pipeline configuration; swept values override it
/// * `sweep` - Parameters and values to sweep
/// * `bounds` - Optional per-profile pressure bounds
///
/// # Returns
///
/// Cluster counts and relative validity for every combination, indexed
/// `[z][x]` in the order the values were declared. An empty x range gives
/// empty rows.
///
/// # Errors
///
/// Fails when the step is not positive, the two parameters are the same, a
/// swept value is invalid for its parameter, or any clustering run fails.
pub fn run_sweep(
    raw: &ProfileTable,
    config: &PipelineConfig,
    sweep: &SweepConfig,
    bounds: Option<&ProfileBounds>,
) -> Result<SweepResult> {
    if sweep.z_param == Some(sweep.x_param) {
        return Err(SweepError::SameParameter(sweep.x_param));
    }
    let x_values = sweep_values(sweep.x_range)?;
    let z_values = if sweep.z_list.is_empty() {
        vec![None]
    } else {
        sweep.z_list.clone()
    };

    // Aggregates do not affect cluster counts or validity.
    let mut base = config.clone();
    base.clustering.extra_cl_vars.clear();

    let mut steps = Vec::with_capacity(z_values.len() * x_values.len());
    for z in &z_values {
        for &x in &x_values {
            let mut step = Step {
                config: base.clone(),
                max_profile: None,
            };
            if let (Some(param), Some(value)) = (sweep.z_param, *z) {
                step.apply(param, value)?;
            }
            step.apply(sweep.x_param, x)?;
            steps.push(step);
        }
    }

    let varies_window =
        sweep.x_param == SweepParam::MaWindow || sweep.z_param == Some(SweepParam::MaWindow);
    let shared = if varies_window {
        None
    } else {
        Some(prepare_table(raw, &base, bounds)?)
    };

    log::info!(
        "Sweeping {:?} over {} values x {} z values ({} clustering runs)",
        sweep.x_param,
        x_values.len(),
        z_values.len(),
        steps.len()
    );

    let results: Vec<(usize, f64)> = steps
        .par_iter()
        .map(|step| run_step(raw, shared.as_ref(), step, bounds))
        .collect::<Result<Vec<_>>>()?;

    let width = x_values.len();
    let mut n_clusters = Vec::with_capacity(z_values.len());
    let mut relative_validity = Vec::with_capacity(z_values.len());
    for zi in 0..z_values.len() {
        let row = &results[zi * width..(zi + 1) * width];
        n_clusters.push(row.iter().map(|r| r.0).collect());
        relative_validity.push(row.iter().map(|r| r.1).collect());
    }

    Ok(SweepResult {
        x_param: sweep.x_param,
        z_param: sweep.z_param,
        x_values,
        z_values,
        n_clusters,
        relative_validity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CastDirection, ClusteringConfig, DataFilters};
    use crate::processors::clustering::cluster_table;

    /// Six profiles of twenty rows forming three groups in (SP, la_CT).
    fn raw_table() -> ProfileTable {
        let mut entry = Vec::new();
        let mut vertical = Vec::new();
        let mut sp = Vec::new();
        let mut ct = Vec::new();
        for p in 0..6i64 {
            for v in 0..20u32 {
                let group = (v % 3) as f64;
                entry.push(p);
                vertical.push(v);
                sp.push(34.0 + group * 0.5 + v as f64 * 0.001 + p as f64 * 0.0003);
                ct.push(group * 0.2 + ((v * 7) % 11) as f64 * 0.001);
            }
        }
        let n = entry.len();
        ProfileTable::new(entry, vertical)
            .unwrap()
            .with_column("SP", sp)
            .unwrap()
            .with_column("CT", ct.clone())
            .unwrap()
            .with_column("la_CT", ct)
            .unwrap()
            .with_column("press", (0..n).map(|i| 100.0 + (i % 20) as f64 * 0.25).collect())
            .unwrap()
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            data_filters: DataFilters {
                keep_black_list: true,
                cast_direction: CastDirection::All,
            },
            clustering: ClusteringConfig {
                min_cluster_size: 10,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn sweep(x_param: SweepParam, x_range: [f64; 3]) -> SweepConfig {
        SweepConfig {
            x_param,
            x_range,
            z_param: None,
            z_list: vec![None],
        }
    }

    #[test]
    fn test_sweep_values() {
        assert_eq!(sweep_values([10.0, 40.0, 10.0]).unwrap(), vec![10.0, 20.0, 30.0]);
        assert_eq!(sweep_values([0.0, 1.0, 0.5]).unwrap(), vec![0.0, 0.5]);
        assert!(sweep_values([5.0, 5.0, 1.0]).unwrap().is_empty());
        assert!(sweep_values([5.0, 1.0, 1.0]).unwrap().is_empty());
        assert!(matches!(
            sweep_values([0.0, 1.0, 0.0]),
            Err(SweepError::InvalidStep(_))
        ));
    }

    #[test]
    fn test_min_cluster_size_sweep_in_order() {
        let raw = raw_table();
        let cfg = config();
        let result = run_sweep(&raw, &cfg, &sweep(SweepParam::MinClusterSize, [10.0, 40.0, 10.0]), None)
            .unwrap();

        assert_eq!(result.x_values, vec![10.0, 20.0, 30.0]);
        assert_eq!(result.n_clusters.len(), 1);
        assert_eq!(result.n_clusters[0].len(), 3);
        assert_eq!(result.relative_validity[0].len(), 3);

        for (i, mcs) in [10usize, 20, 30].into_iter().enumerate() {
            let direct = cluster_table(
                &raw,
                &ClusteringConfig {
                    min_cluster_size: mcs,
                    ..Default::default()
                },
            )
            .unwrap();
            assert_eq!(result.n_clusters[0][i], direct.n_clusters);
            assert_eq!(result.relative_validity[0][i], direct.relative_validity);
        }
    }

    #[test]
    fn test_n_profiles_sweep() {
        let raw = raw_table();
        let result = run_sweep(&raw, &config(), &sweep(SweepParam::NProfiles, [2.0, 7.0, 2.0]), None)
            .unwrap();
        assert_eq!(result.x_values, vec![2.0, 4.0, 6.0]);

        let keep: Vec<bool> = raw.entries().iter().map(|&e| e < 2).collect();
        let direct = cluster_table(&raw.filter_rows(&keep), &config().clustering).unwrap();
        assert_eq!(result.n_clusters[0][0], direct.n_clusters);
    }

    #[test]
    fn test_z_list_shape() {
        let mut s = sweep(SweepParam::MinClusterSize, [10.0, 40.0, 10.0]);
        s.z_param = Some(SweepParam::MinSamples);
        s.z_list = vec![None, Some(3.0)];
        let result = run_sweep(&raw_table(), &config(), &s, None).unwrap();
        assert_eq!(result.z_values, vec![None, Some(3.0)]);
        assert_eq!(result.n_clusters.len(), 2);
        assert!(result.n_clusters.iter().all(|row| row.len() == 3));
        assert_eq!(result.len(), 6);
    }

    #[test]
    fn test_moving_average_window_sweep() {
        let raw = raw_table();
        let mut cfg = config();
        cfg.clustering.min_cluster_size = 5;
        let result = run_sweep(&raw, &cfg, &sweep(SweepParam::MaWindow, [1.0, 3.0, 1.0]), None)
            .unwrap();
        assert_eq!(result.x_values, vec![1.0, 2.0]);
        assert_eq!(result.n_clusters[0].len(), 2);
    }

    #[test]
    fn test_configuration_errors() {
        let raw = raw_table();
        let mut same = sweep(SweepParam::MinClusterSize, [10.0, 40.0, 10.0]);
        same.z_param = Some(SweepParam::MinClusterSize);
        assert!(matches!(
            run_sweep(&raw, &config(), &same, None),
            Err(SweepError::SameParameter(_))
        ));

        assert!(matches!(
            run_sweep(&raw, &config(), &sweep(SweepParam::MinClusterSize, [10.0, 40.0, -1.0]), None),
            Err(SweepError::InvalidStep(_))
        ));

        assert!(matches!(
            run_sweep(&raw, &config(), &sweep(SweepParam::MinSamples, [-2.0, 0.0, 1.0]), None),
            Err(SweepError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_empty_range() {
        let result = run_sweep(
            &raw_table(),
            &config(),
            &sweep(SweepParam::MinClusterSize, [10.0, 10.0, 5.0]),
            None,
        )
        .unwrap();
        assert!(result.is_empty());
        assert_eq!(result.n_clusters, vec![Vec::<usize>::new()]);
        assert!(result.best().is_none());
    }

    #[test]
    fn test_best() {
        let result = SweepResult {
            x_param: SweepParam::MinClusterSize,
            z_param: None,
            x_values: vec![1.0, 2.0, 3.0],
            z_values: vec![None],
            n_clusters: vec![vec![2, 0, 3]],
            relative_validity: vec![vec![0.4, 0.9, 0.6]],
        };
        assert_eq!(result.best(), Some((0, 2)));
    }
}
