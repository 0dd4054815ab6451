//! Cluster aggregate variables.
//!
//! Given a clustered table, three families of columns can be appended:
//! - `ca_V`: mean of `V` over the row's cluster, broadcast to every row
//! - `cmc_V`: `V` minus its cluster mean
//! - `pca_V`: mean of `V` over the rows sharing both profile and cluster
//!
//! Noise rows (label `-1`) never receive a `pca_` value. For `ca_` and `cmc_`
//! the noise rows form their own group unless `exclude_noise` is set, in
//! which case they get `NaN`. Null values of `V` are skipped in every mean.
//! None of these change the number of rows.

use std::collections::HashMap;
use std::hash::Hash;

use thiserror::Error;

use super::derived::{ensure_variable, DerivedError, DerivedKind, DerivedVariableSpec};
use crate::core::table::{ProfileTable, TableError};

/// Errors raised while computing cluster aggregates.
#[derive(Debug, Error)]
pub enum AggregateError {
    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Derived(#[from] DerivedError),

    #[error("'{0}' is not a cluster aggregate (expected a ca_, pca_ or cmc_ prefix)")]
    UnknownPrefix(String),
}

/// Result type for aggregate operations.
pub type Result<T> = std::result::Result<T, AggregateError>;

#[derive(Debug, Clone, Copy, Default)]
struct Mean {
    sum: f64,
    count: usize,
}

impl Mean {
    #[inline]
    fn push(&mut self, v: f64) {
        if !v.is_nan() {
            self.sum += v;
            self.count += 1;
        }
    }

    #[inline]
    fn value(&self) -> f64 {
        if self.count == 0 {
            f64::NAN
        } else {
            self.sum / self.count as f64
        }
    }
}

fn grouped_means<K, I>(keys: I, values: &[f64]) -> HashMap<K, f64>
where
    K: Eq + Hash,
    I: IntoIterator<Item = Option<K>>,
{
    let mut groups: HashMap<K, Mean> = HashMap::new();
    for (key, &v) in keys.into_iter().zip(values) {
        if let Some(key) = key {
            groups.entry(key).or_default().push(v);
        }
    }
    groups.into_iter().map(|(k, m)| (k, m.value())).collect()
}

/// Mean of `values` per cluster label.
///
/// Noise rows form group `-1` unless `exclude_noise` is set.
pub fn cluster_means(labels: &[i32], values: &[f64], exclude_noise: bool) -> HashMap<i32, f64> {
    let keys = labels
        .iter()
        .map(|&l| (l >= 0 || !exclude_noise).then_some(l));
    grouped_means(keys, values)
}

/// Mean of `values` per (profile, cluster) pair, noise rows excluded.
pub fn profile_cluster_means(
    entries: &[i64],
    labels: &[i32],
    values: &[f64],
) -> HashMap<(i64, i32), f64> {
    let keys = entries
        .iter()
        .zip(labels)
        .map(|(&e, &l)| (l >= 0).then_some((e, l)));
    grouped_means(keys, values)
}

fn base_values(table: &mut ProfileTable, spec: &DerivedVariableSpec, exclude_noise: bool) -> Result<Vec<f64>> {
    let base = DerivedVariableSpec::parse(&spec.base);
    if base.is_cluster_aggregate() {
        calc_cluster_aggregate(table, &base.name, exclude_noise)?;
    } else {
        ensure_variable(table, &base)?;
    }
    Ok(table.column(&spec.base)?.to_vec())
}

/// Compute one cluster aggregate and add it to the table.
///
/// An existing column of the same name is replaced, since it may belong to
/// an earlier clustering of the same rows.
///
/// # Errors
///
/// Fails when `name` has no cluster aggregate prefix, when the table has not
/// been clustered, or when the base variable cannot be computed.
pub fn calc_cluster_aggregate(table: &mut ProfileTable, name: &str, exclude_noise: bool) -> Result<()> {
    let spec = DerivedVariableSpec::parse(name);
    if !spec.is_cluster_aggregate() {
        return Err(AggregateError::UnknownPrefix(name.to_string()));
    }

    let labels = table.require_clusters()?.to_vec();
    let values = base_values(table, &spec, exclude_noise)?;

    let out: Vec<f64> = match spec.kind {
        DerivedKind::ClusterAverage | DerivedKind::ClusterMeanCentered => {
            let means = cluster_means(&labels, &values, exclude_noise);
            let centred = spec.kind == DerivedKind::ClusterMeanCentered;
            labels
                .iter()
                .zip(&values)
                .map(|(l, &v)| match means.get(l) {
                    Some(&m) if centred => v - m,
                    Some(&m) => m,
                    None => f64::NAN,
                })
                .collect()
        }
        _ => {
            let means = profile_cluster_means(table.entries(), &labels, &values);
            table
                .entries()
                .iter()
                .zip(&labels)
                .map(|(&e, &l)| means.get(&(e, l)).copied().unwrap_or(f64::NAN))
                .collect()
        }
    };

    log::debug!("Computed cluster aggregate {}", name);
    table.insert_column(name, out)?;
    Ok(())
}

/// Compute every requested cluster aggregate, in order.
pub fn calc_extra_cl_vars<S: AsRef<str>>(
    table: &mut ProfileTable,
    names: &[S],
    exclude_noise: bool,
) -> Result<()> {
    for name in names {
        calc_cluster_aggregate(table, name.as_ref(), exclude_noise)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    /// Two profiles, two clusters and a noise row in each profile.
    fn clustered() -> ProfileTable {
        let mut table = ProfileTable::new(vec![1, 1, 1, 2, 2, 2], vec![0, 1, 2, 0, 1, 2])
            .unwrap()
            .with_column("SP", vec![1.0, 2.0, 10.0, 3.0, 5.0, 20.0])
            .unwrap()
            .with_column("CT", vec![0.5, 1.5, f64::NAN, 2.5, 3.5, 4.5])
            .unwrap()
            .with_column("ma_CT", vec![0.0; 6])
            .unwrap();
        table
            .set_clusters(vec![0, 1, -1, 0, 1, -1], vec![1.0, 1.0, 0.0, 1.0, 1.0, 0.0])
            .unwrap();
        table
    }

    #[test]
    fn test_cluster_average_constant_per_cluster() {
        let mut table = clustered();
        calc_cluster_aggregate(&mut table, "ca_SP", false).unwrap();
        let ca = table.column("ca_SP").unwrap();
        // cluster 0: rows 0, 3; cluster 1: rows 1, 4; noise: rows 2, 5
        assert!(approx(ca[0], 2.0) && approx(ca[3], 2.0));
        assert!(approx(ca[1], 3.5) && approx(ca[4], 3.5));
        assert!(approx(ca[2], 15.0) && approx(ca[5], 15.0));
        assert_eq!(table.len(), 6);
    }

    #[test]
    fn test_cluster_average_excluding_noise() {
        let mut table = clustered();
        calc_cluster_aggregate(&mut table, "ca_SP", true).unwrap();
        let ca = table.column("ca_SP").unwrap();
        assert!(ca[2].is_nan() && ca[5].is_nan());
        assert!(approx(ca[0], 2.0));
    }

    #[test]
    fn test_mean_centred_zero_mean() {
        let mut table = clustered();
        calc_cluster_aggregate(&mut table, "cmc_SP", false).unwrap();
        let cmc = table.column("cmc_SP").unwrap();
        let labels = table.clusters().unwrap();
        for c in [-1, 0, 1] {
            let values: Vec<f64> = labels
                .iter()
                .zip(cmc)
                .filter(|(&l, _)| l == c)
                .map(|(_, &v)| v)
                .collect();
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            assert!(approx(mean, 0.0));
        }
    }

    #[test]
    fn test_profile_cluster_average() {
        let mut table = clustered();
        table
            .set_clusters(vec![0, 0, -1, 0, 1, -1], vec![1.0; 6])
            .unwrap();
        calc_cluster_aggregate(&mut table, "pca_SP", false).unwrap();
        let pca = table.column("pca_SP").unwrap();
        assert!(approx(pca[0], 1.5) && approx(pca[1], 1.5));
        assert!(approx(pca[3], 3.0));
        assert!(approx(pca[4], 5.0));
        assert!(pca[2].is_nan() && pca[5].is_nan());
    }

    #[test]
    fn test_nulls_skipped_and_base_derived() {
        let mut table = clustered();
        calc_cluster_aggregate(&mut table, "ca_la_CT", false).unwrap();
        assert!(table.has_column("la_CT"));
        let ca = table.column("ca_la_CT").unwrap();
        // noise group: NaN at row 2 is skipped, leaving 4.5
        assert!(approx(ca[2], 4.5));
        assert!(approx(ca[0], 1.5));
    }

    #[test]
    fn test_nested_aggregate() {
        let mut table = clustered();
        calc_cluster_aggregate(&mut table, "ca_cmc_SP", false).unwrap();
        assert!(table.has_column("cmc_SP"));
        assert!(table
            .column("ca_cmc_SP")
            .unwrap()
            .iter()
            .all(|&v| approx(v, 0.0)));
    }

    #[test]
    fn test_unknown_prefix_is_error() {
        let mut table = clustered();
        for name in ["la_CT", "SP", "xyz_SP"] {
            assert!(matches!(
                calc_cluster_aggregate(&mut table, name, false),
                Err(AggregateError::UnknownPrefix(_))
            ));
        }
    }

    #[test]
    fn test_requires_clusters() {
        let mut table = ProfileTable::new(vec![1], vec![0])
            .unwrap()
            .with_column("SP", vec![34.0])
            .unwrap();
        assert!(matches!(
            calc_extra_cl_vars(&mut table, &["ca_SP"], false),
            Err(AggregateError::Table(TableError::NotClustered))
        ));
    }

    #[test]
    fn test_missing_base_is_error() {
        let mut table = clustered();
        assert!(matches!(
            calc_cluster_aggregate(&mut table, "pca_SA", false),
            Err(AggregateError::Derived(_))
        ));
    }
}
