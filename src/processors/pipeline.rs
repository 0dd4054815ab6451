//! Table preparation: every stage that runs before clustering.
//!
//! Order of operations:
//! 1. record selection (black list, cast direction)
//! 2. moving averages for local anomaly bases that lack an `ma_` column
//! 3. clustering features that are derived variables
//! 4. profile range filter, including the subsample mask
//! 5. temperature/salinity regridding
//!
//! Moving averages run before range filtering so that each profile is
//! smoothed over its full length.

use thiserror::Error;

use super::derived::{calc_extra_vars, local_anomaly_bases, DerivedError, DerivedVariableSpec};
use super::filtering::{apply_data_filters, filter_profile_ranges, FilteringError, ProfileBounds};
use crate::config::PipelineConfig;
use crate::core::table::ProfileTable;
use crate::core::transforms::{moving_average, regrid_ts, TransformError, MOVING_AVERAGE_PREFIX};

/// Errors raised while preparing a table for clustering.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Filtering(#[from] FilteringError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Derived(#[from] DerivedError),
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Every variable a clustering configuration reads before aggregation.
pub fn required_variables(config: &PipelineConfig) -> Vec<String> {
    let mut vars = vec![
        config.clustering.cl_x_var.clone(),
        config.clustering.cl_y_var.clone(),
    ];
    vars.extend(config.clustering.extra_cl_vars.iter().cloned());
    vars
}

/// Compute the `ma_` references needed by local anomalies of `vars`.
///
/// Bases whose anomaly column or reference column already exists are left
/// alone.
pub fn ensure_moving_averages(
    table: &mut ProfileTable,
    vars: &[String],
    config: &PipelineConfig,
) -> Result<()> {
    for base in local_anomaly_bases(vars) {
        let anomaly = format!("la_{}", base);
        let reference = format!("{}{}", MOVING_AVERAGE_PREFIX, base);
        if table.has_column(&anomaly) || table.has_column(&reference) {
            continue;
        }
        calc_extra_vars(table, &[base.as_str()])?;
        moving_average(table, &[base.as_str()], &config.moving_average)?;
    }
    Ok(())
}

/// Run every preparation stage on a copy of `raw`.
///
/// # Arguments
///
/// * `raw` - Table as loaded from the data sources
/// * `config` - Pipeline configuration
/// * `bounds` - Per-profile pressure bounds for the `Shibley2017` range; when
///   absent they are read from the `shibley_bounds` columns if configured
///
/// # Errors
///
/// Fails on any configuration error raised by the stages.
pub fn prepare_table(
    raw: &ProfileTable,
    config: &PipelineConfig,
    bounds: Option<&ProfileBounds>,
) -> Result<ProfileTable> {
    let mut table = apply_data_filters(raw, &config.data_filters)?;

    let vars = required_variables(config);
    ensure_moving_averages(&mut table, &vars, config)?;

    let features: Vec<&str> = vars
        .iter()
        .take(2)
        .map(String::as_str)
        .filter(|v| !DerivedVariableSpec::parse(v).is_cluster_aggregate())
        .collect();
    calc_extra_vars(&mut table, &features)?;

    let column_bounds;
    let bounds = match (bounds, &config.profile_filters.shibley_bounds) {
        (Some(b), _) => Some(b),
        (None, Some([lo, hi])) => {
            column_bounds = ProfileBounds::from_columns(&table, lo, hi)?;
            Some(&column_bounds)
        }
        (None, None) => None,
    };
    let mut table = filter_profile_ranges(&table, &config.profile_filters, bounds)?;

    if let Some(spec) = &config.profile_filters.regrid_ts {
        regrid_ts(&mut table, spec)?;
    }

    log::info!(
        "Prepared {} rows from {} profiles for clustering",
        table.len(),
        table.n_profiles()
    );
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CastDirection, DataFilters, RangeSpec, RegridSpec};
    use crate::processors::clustering::cluster_table;
    use std::collections::HashSet;

    fn raw_table() -> ProfileTable {
        let n = 12;
        let entry: Vec<i64> = (0..n).map(|i| i as i64 / 6).collect();
        let vertical: Vec<u32> = (0..n).map(|i| i as u32 % 6).collect();
        ProfileTable::new(entry, vertical)
            .unwrap()
            .with_column("press", (0..n).map(|i| 100.0 + (i % 6) as f64).collect())
            .unwrap()
            .with_column("CT", (0..n).map(|i| i as f64 * 0.1).collect())
            .unwrap()
            .with_column("SP", vec![34.0; n])
            .unwrap()
            .with_column("BL_yn", vec![0.0; n])
            .unwrap()
            .with_column("up_cast", (0..n).map(|i| if i < 6 { 1.0 } else { 0.0 }).collect())
            .unwrap()
    }

    fn config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.moving_average.window_dbar = 0.75;
        config
    }

    #[test]
    fn test_prepare_computes_anomaly_and_filters() {
        let mut config = config();
        config.profile_filters.p_range = Some(RangeSpec::Fixed([100.0, 105.0]));

        let table = prepare_table(&raw_table(), &config, None).unwrap();
        // up casts only (profile 0), pressures 101..104
        assert_eq!(table.entries(), &[0, 0, 0, 0]);
        assert!(table.has_column("ma_CT"));
        let la = table.column("la_CT").unwrap();
        assert!(la.iter().all(|v| v.abs() < 1e-9));
    }

    #[test]
    fn test_prepare_does_not_touch_input() {
        let raw = raw_table();
        let mut config = config();
        config.data_filters = DataFilters {
            keep_black_list: true,
            cast_direction: CastDirection::All,
        };
        let table = prepare_table(&raw, &config, None).unwrap();
        assert_eq!(table.len(), 12);
        assert!(!raw.has_column("la_CT"));
    }

    #[test]
    fn test_existing_anomaly_is_kept() {
        let raw = raw_table().with_column("la_CT", vec![7.0; 12]).unwrap();
        let table = prepare_table(&raw, &config(), None).unwrap();
        assert!(!table.has_column("ma_CT"));
        assert!(table.column("la_CT").unwrap().iter().all(|&v| v == 7.0));
    }

    #[test]
    fn test_shibley_bounds_from_columns() {
        let raw = raw_table()
            .with_column("p_lo", vec![101.5; 12])
            .unwrap()
            .with_column("p_hi", vec![103.5; 12])
            .unwrap();
        let mut config = config();
        config.profile_filters.p_range =
            Some(RangeSpec::Named(crate::config::NamedRange::Shibley2017));
        config.profile_filters.shibley_bounds = Some(["p_lo".to_string(), "p_hi".to_string()]);

        let table = prepare_table(&raw, &config, None).unwrap();
        assert_eq!(table.column("press").unwrap(), &[102.0, 103.0]);
    }

    #[test]
    fn test_regridded_table_clusters() {
        let n = 400;
        let entry: Vec<i64> = (0..n).map(|i| i as i64 / 200).collect();
        let vertical: Vec<u32> = (0..n).map(|i| i as u32 % 200).collect();
        let raw = ProfileTable::new(entry, vertical)
            .unwrap()
            .with_column("press", (0..n).map(|i| 100.0 + (i % 200) as f64).collect())
            .unwrap()
            .with_column("CT", (0..n).map(|i| 1.0 + (i % 200) as f64 * 0.01).collect())
            .unwrap()
            .with_column(
                "SP",
                (0..n)
                    .map(|i| (if i < 200 { 34.0 } else { 35.0 }) + (i % 200) as f64 * 0.001)
                    .collect(),
            )
            .unwrap()
            .with_column("BL_yn", vec![0.0; n])
            .unwrap()
            .with_column("up_cast", vec![1.0; n])
            .unwrap();

        let mut config = config();
        config.clustering.min_cluster_size = 20;
        config.profile_filters.regrid_ts = Some(RegridSpec {
            t_var: "la_CT".to_string(),
            d_temp: 0.01,
            s_var: "SP".to_string(),
            d_salt: 0.05,
        });

        let table = prepare_table(&raw, &config, None).unwrap();
        let outcome = cluster_table(&table, &config.clustering).unwrap();
        let clustered = &outcome.table;
        let labels = clustered.clusters().unwrap();

        // profile ends have no full smoothing window
        assert_eq!(outcome.n_dropped, 4);
        assert_eq!(labels.len(), 396);
        assert!(outcome.n_clusters >= 2);

        let per_profile = |id: i64| -> HashSet<i32> {
            clustered
                .entries()
                .iter()
                .zip(labels)
                .filter(|(&e, &l)| e == id && l >= 0)
                .map(|(_, &l)| l)
                .collect()
        };
        assert!(per_profile(0).is_disjoint(&per_profile(1)));
    }

    #[test]
    fn test_missing_base_is_error() {
        let mut config = config();
        config.clustering.cl_x_var = "SA".to_string();
        assert!(matches!(
            prepare_table(&raw_table(), &config, None),
            Err(PipelineError::Derived(_))
        ));
    }
}
