//! Column transforms applied across whole profiles.
//!
//! - Centred boxcar moving averages, producing the `ma_` reference columns
//! - Regridding of temperature and salinity onto coarse grids

use thiserror::Error;

use super::table::{ProfileTable, TableError};
use crate::config::{MovingAverageConfig, RegridSpec};

/// Prefix of the moving-average reference columns.
pub const MOVING_AVERAGE_PREFIX: &str = "ma_";

/// Errors that can occur during transforms.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error(transparent)]
    Table(#[from] TableError),

    #[error("moving average window must span at least one sample (window={window_dbar} dbar, resolution={resolution_dbar} dbar)")]
    InvalidWindow {
        window_dbar: f64,
        resolution_dbar: f64,
    },

    #[error("regrid step for '{var}' must be positive, got {step}")]
    InvalidGridStep { var: String, step: f64 },
}

/// Result type for transform operations.
pub type Result<T> = std::result::Result<T, TransformError>;

/// Centred boxcar mean of a single series.
///
/// The window for sample `i` covers `[i - w/2, i + (w-1)/2]`. Samples whose
/// window runs off either end, or contains a `NaN`, get `NaN`.
pub fn centered_rolling_mean(values: &[f64], window: usize) -> Vec<f64> {
    let n = values.len();
    let mut out = vec![f64::NAN; n];
    if window == 0 || window > n {
        return out;
    }

    let before = window / 2;
    let after = window - 1 - before;

    // Prefix sums of values and of NaN counts.
    let mut sums = vec![0.0f64; n + 1];
    let mut nans = vec![0usize; n + 1];
    for (i, &v) in values.iter().enumerate() {
        let is_nan = v.is_nan();
        sums[i + 1] = sums[i] + if is_nan { 0.0 } else { v };
        nans[i + 1] = nans[i] + usize::from(is_nan);
    }

    for (i, slot) in out.iter_mut().enumerate().take(n - after).skip(before) {
        let start = i - before;
        let end = i + after + 1;
        if nans[end] - nans[start] == 0 {
            *slot = (sums[end] - sums[start]) / window as f64;
        }
    }
    out
}

/// Add `ma_<var>` columns holding per-profile moving averages of `vars`.
///
/// Each profile is smoothed independently in vertical-index order. Existing
/// `ma_` columns are overwritten.
///
/// # Errors
///
/// Fails if a source column is missing or the window is shorter than one
/// sample.
pub fn moving_average(
    table: &mut ProfileTable,
    vars: &[&str],
    config: &MovingAverageConfig,
) -> Result<()> {
    let window = config.window_samples();
    if window == 0 {
        return Err(TransformError::InvalidWindow {
            window_dbar: config.window_dbar,
            resolution_dbar: config.resolution_dbar,
        });
    }

    let groups = table.profile_groups();

    for var in vars {
        let source = table.column(var)?;
        let mut smoothed = vec![f64::NAN; table.len()];

        for (_, rows) in &groups {
            let series: Vec<f64> = rows.iter().map(|&r| source[r]).collect();
            let averaged = centered_rolling_mean(&series, window);
            for (&r, v) in rows.iter().zip(averaged) {
                smoothed[r] = v;
            }
        }

        let name = format!("{}{}", MOVING_AVERAGE_PREFIX, var);
        log::debug!("{}: window of {} samples over {} profiles", name, window, groups.len());
        table.insert_column(&name, smoothed)?;
    }

    Ok(())
}

/// Snap every value to the nearest node of `arange(min - step, max + step, step)`.
///
/// Ties go to the lower node. `NaN` values are left untouched.
pub fn snap_to_grid(values: &[f64], step: f64) -> Vec<f64> {
    let (min, max) = values
        .iter()
        .filter(|v| !v.is_nan())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    if !min.is_finite() || !max.is_finite() {
        return values.to_vec();
    }

    let start = min - step;
    let stop = max + step;
    let n_nodes = ((stop - start) / step).ceil().max(1.0) as usize;
    let grid: Vec<f64> = (0..n_nodes).map(|k| start + k as f64 * step).collect();

    values
        .iter()
        .map(|&v| {
            if v.is_nan() {
                return v;
            }
            let mut best = grid[0];
            let mut best_dist = (v - best).abs();
            for &node in &grid[1..] {
                let dist = (v - node).abs();
                if dist < best_dist {
                    best = node;
                    best_dist = dist;
                }
            }
            best
        })
        .collect()
}

/// Regrid the temperature and salinity columns named in `spec`.
pub fn regrid_ts(table: &mut ProfileTable, spec: &RegridSpec) -> Result<()> {
    for (var, step) in [(&spec.t_var, spec.d_temp), (&spec.s_var, spec.d_salt)] {
        if !(step > 0.0) {
            return Err(TransformError::InvalidGridStep {
                var: var.clone(),
                step,
            });
        }
        let regridded = snap_to_grid(table.column(var)?, step);
        table.insert_column(var, regridded)?;
    }
    log::info!(
        "Regridded {} to {} and {} to {}",
        spec.t_var,
        spec.d_temp,
        spec.s_var,
        spec.d_salt
    );
    Ok(())
}
