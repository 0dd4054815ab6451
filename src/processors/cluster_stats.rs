//! Per-cluster statistics computed from a clustered table.

use std::collections::{BTreeMap, BTreeSet};

use crate::core::table::{ProfileTable, Result};
use crate::processors::derived::{ALPHA, BETA};

/// Lateral density ratio of one cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSlope {
    pub cluster: i32,
    pub n_points: usize,
    /// Least-squares slope of y on x
    pub slope: f64,
    pub mean_alpha: f64,
    pub mean_beta: f64,
    /// `(beta / alpha) * slope`
    pub lateral_density_ratio: f64,
    /// Cluster mean of the reported parameter
    pub y_mean: f64,
}

/// Summary of one cluster within one profile.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileClusterStat {
    pub entry: i64,
    pub cluster: i32,
    pub n_points: usize,
    pub mean: f64,
    /// Half of the value span within the profile
    pub half_span: f64,
}

/// Number of rows in each cluster, indexed by label.
pub fn cluster_sizes(table: &ProfileTable) -> Result<Vec<usize>> {
    let labels = table.require_clusters()?;
    let mut sizes = vec![0usize; table.n_clusters()];
    for &l in labels.iter().filter(|&&l| l >= 0) {
        sizes[l as usize] += 1;
    }
    Ok(sizes)
}

/// Number of distinct clusters each profile intersects, noise excluded.
///
/// Profiles made only of noise report zero.
pub fn clusters_per_profile(table: &ProfileTable) -> Result<Vec<(i64, usize)>> {
    let labels = table.require_clusters()?;
    let mut per_profile: BTreeMap<i64, BTreeSet<i32>> = BTreeMap::new();
    for (&entry, &label) in table.entries().iter().zip(labels) {
        let set = per_profile.entry(entry).or_default();
        if label >= 0 {
            set.insert(label);
        }
    }
    Ok(per_profile
        .into_iter()
        .map(|(entry, set)| (entry, set.len()))
        .collect())
}

/// Mean and half span of `var` per (profile, cluster), for tracking clusters
/// from one profile to the next.
///
/// Noise rows and null values are skipped. Output is ordered by profile then
/// cluster.
pub fn profile_cluster_tracks(table: &ProfileTable, var: &str) -> Result<Vec<ProfileClusterStat>> {
    let labels = table.require_clusters()?;
    let values = table.column(var)?;

    let mut groups: BTreeMap<(i64, i32), Vec<f64>> = BTreeMap::new();
    for ((&entry, &label), &v) in table.entries().iter().zip(labels).zip(values) {
        if label >= 0 && !v.is_nan() {
            groups.entry((entry, label)).or_default().push(v);
        }
    }

    Ok(groups
        .into_iter()
        .map(|((entry, cluster), vals)| {
            let n = vals.len();
            let mean = vals.iter().sum::<f64>() / n as f64;
            let (lo, hi) = vals
                .iter()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                    (lo.min(v), hi.max(v))
                });
            ProfileClusterStat {
                entry,
                cluster,
                n_points: n,
                mean,
                half_span: (hi - lo) / 2.0,
            }
        })
        .collect())
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Least-squares slope of `y` against `x`, `None` when `x` has no spread.
pub fn least_squares_slope(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() < 2 || x.len() != y.len() {
        return None;
    }
    let mx = mean(x);
    let my = mean(y);
    let (sxy, sxx) = x
        .iter()
        .zip(y)
        .fold((0.0, 0.0), |(sxy, sxx), (&xi, &yi)| {
            let dx = xi - mx;
            (sxy + dx * (yi - my), sxx + dx * dx)
        });
    (sxx > 0.0).then(|| sxy / sxx)
}

/// Lateral density ratio `R_L = (beta / alpha) * m` for every cluster, where
/// `m` is the least-squares slope of `y` on `x` within the cluster.
///
/// Rows with a null `x`, `y`, `alpha`, `beta` or `y_param` are ignored.
/// Clusters with fewer than two usable rows or no spread in `x` are skipped.
pub fn lateral_density_ratios(
    table: &ProfileTable,
    x: &str,
    y: &str,
    y_param: &str,
) -> Result<Vec<ClusterSlope>> {
    let labels = table.require_clusters()?;
    let cols = [
        table.column(x)?,
        table.column(y)?,
        table.column(ALPHA)?,
        table.column(BETA)?,
        table.column(y_param)?,
    ];

    let mut per_cluster: BTreeMap<i32, [Vec<f64>; 5]> = BTreeMap::new();
    for (row, &label) in labels.iter().enumerate() {
        if label < 0 || cols.iter().any(|c| c[row].is_nan()) {
            continue;
        }
        let bucket = per_cluster.entry(label).or_default();
        for (dst, src) in bucket.iter_mut().zip(&cols) {
            dst.push(src[row]);
        }
    }

    let mut out = Vec::with_capacity(per_cluster.len());
    for (cluster, [xs, ys, alphas, betas, params]) in per_cluster {
        let Some(slope) = least_squares_slope(&xs, &ys) else {
            log::debug!("Cluster {}: no slope ({} points)", cluster, xs.len());
            continue;
        };
        let mean_alpha = mean(&alphas);
        let mean_beta = mean(&betas);
        out.push(ClusterSlope {
            cluster,
            n_points: xs.len(),
            slope,
            mean_alpha,
            mean_beta,
            lateral_density_ratio: (mean_beta / mean_alpha) * slope,
            y_mean: mean(&params),
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn clustered() -> ProfileTable {
        let mut table = ProfileTable::new(vec![1, 1, 1, 2, 2, 2, 3], vec![0, 1, 2, 0, 1, 2, 0])
            .unwrap()
            .with_column("CT", vec![0.0, 1.0, 5.0, 2.0, 3.0, 9.0, 1.0])
            .unwrap()
            .with_column("SP", vec![34.0, 34.2, 34.9, 34.4, 34.6, 34.9, 34.1])
            .unwrap()
            .with_column(ALPHA, vec![1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0])
            .unwrap()
            .with_column(BETA, vec![2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0])
            .unwrap()
            .with_column("press", vec![100.0, 110.0, 120.0, 100.0, 110.0, 120.0, 100.0])
            .unwrap();
        table
            .set_clusters(vec![0, 0, 1, 0, 0, 1, -1], vec![1.0; 7])
            .unwrap();
        table
    }

    #[test]
    fn test_cluster_sizes() {
        assert_eq!(cluster_sizes(&clustered()).unwrap(), vec![4, 2]);
    }

    #[test]
    fn test_clusters_per_profile() {
        let counts = clusters_per_profile(&clustered()).unwrap();
        assert_eq!(counts, vec![(1, 2), (2, 2), (3, 0)]);
    }

    #[test]
    fn test_profile_cluster_tracks() {
        let tracks = profile_cluster_tracks(&clustered(), "press").unwrap();
        assert_eq!(tracks.len(), 4);
        assert_eq!((tracks[0].entry, tracks[0].cluster), (1, 0));
        assert_eq!(tracks[0].n_points, 2);
        assert!(approx(tracks[0].mean, 105.0));
        assert!(approx(tracks[0].half_span, 5.0));
        assert_eq!((tracks[3].entry, tracks[3].cluster), (2, 1));
        assert!(approx(tracks[3].half_span, 0.0));
    }

    #[test]
    fn test_least_squares_slope() {
        let slope = least_squares_slope(&[0.0, 1.0, 2.0], &[1.0, 3.0, 5.0]).unwrap();
        assert!(approx(slope, 2.0));
        assert!(least_squares_slope(&[1.0, 1.0], &[0.0, 1.0]).is_none());
        assert!(least_squares_slope(&[1.0], &[0.0]).is_none());
    }

    #[test]
    fn test_lateral_density_ratios() {
        let slopes = lateral_density_ratios(&clustered(), "CT", "SP", "press").unwrap();
        // cluster 1 has two rows with CT 5 and 9 -> slope 0
        assert_eq!(slopes.len(), 2);
        let c0 = &slopes[0];
        assert_eq!(c0.cluster, 0);
        assert_eq!(c0.n_points, 4);
        // CT 0,1,2,3 vs SP 34.0..34.6 in steps of 0.2
        assert!(approx(c0.slope, 0.2));
        assert!(approx(c0.lateral_density_ratio, 0.4));
        assert!(approx(c0.y_mean, 105.0));
        assert!(approx(slopes[1].slope, 0.0));
    }

    #[test]
    fn test_requires_clusters() {
        let table = ProfileTable::new(vec![1], vec![0]).unwrap();
        assert!(cluster_sizes(&table).is_err());
    }
}
