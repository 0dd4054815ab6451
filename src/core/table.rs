//! Columnar profile table.
//!
//! A [`ProfileTable`] holds one row per (profile, vertical index) pair. Every
//! measured or derived quantity is stored as an `f64` column, with `NaN`
//! standing in for a missing value. Clustering output lives in two typed
//! slots (`cluster` and `clst_prob`) rather than in the numeric columns.

use std::collections::{BTreeSet, HashSet};

use thiserror::Error;

/// Name used for the cluster label column when a table is exported.
pub const CLUSTER_COLUMN: &str = "cluster";

/// Name used for the membership probability column when a table is exported.
pub const PROBABILITY_COLUMN: &str = "clst_prob";

/// Errors raised by table construction and column access.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("column '{0}' is not present in the table")]
    MissingColumn(String),

    #[error("column '{name}' has {found} values but the table has {expected} rows")]
    LengthMismatch {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("row (entry={entry}, vertical={vertical}) appears more than once")]
    DuplicateRow { entry: i64, vertical: u32 },

    #[error("table has not been clustered yet")]
    NotClustered,
}

/// Result type for table operations.
pub type Result<T> = std::result::Result<T, TableError>;

/// A named numeric column.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<f64>,
}

/// In-memory table of profile measurements.
#[derive(Debug, Clone, Default)]
pub struct ProfileTable {
    entry: Vec<i64>,
    vertical: Vec<u32>,
    columns: Vec<Column>,
    cluster: Option<Vec<i32>>,
    clst_prob: Option<Vec<f64>>,
}

impl ProfileTable {
    /// Create a table from its key columns.
    ///
    /// # Errors
    ///
    /// Returns an error if the two key vectors differ in length or if a
    /// (entry, vertical) pair repeats.
    pub fn new(entry: Vec<i64>, vertical: Vec<u32>) -> Result<Self> {
        if entry.len() != vertical.len() {
            return Err(TableError::LengthMismatch {
                name: "vertical".to_string(),
                expected: entry.len(),
                found: vertical.len(),
            });
        }

        let mut seen = HashSet::with_capacity(entry.len());
        for (&e, &v) in entry.iter().zip(vertical.iter()) {
            if !seen.insert((e, v)) {
                return Err(TableError::DuplicateRow { entry: e, vertical: v });
            }
        }

        Ok(Self {
            entry,
            vertical,
            columns: Vec::new(),
            cluster: None,
            clst_prob: None,
        })
    }

    /// Builder-style variant of [`insert_column`](Self::insert_column).
    pub fn with_column(mut self, name: &str, values: Vec<f64>) -> Result<Self> {
        self.insert_column(name, values)?;
        Ok(self)
    }

    /// Number of rows.
    #[inline]
    pub fn len(&self) -> usize {
        self.entry.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entry.is_empty()
    }

    /// Profile identifier of every row.
    #[inline]
    pub fn entries(&self) -> &[i64] {
        &self.entry
    }

    /// Vertical index of every row.
    #[inline]
    pub fn verticals(&self) -> &[u32] {
        &self.vertical
    }

    /// Sorted, de-duplicated profile identifiers.
    pub fn profile_ids(&self) -> Vec<i64> {
        let ids: BTreeSet<i64> = self.entry.iter().copied().collect();
        ids.into_iter().collect()
    }

    pub fn n_profiles(&self) -> usize {
        self.profile_ids().len()
    }

    /// Column names in insertion order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// Borrow a column, if present.
    pub fn get_column(&self, name: &str) -> Option<&[f64]> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.values.as_slice())
    }

    /// Borrow a column, failing with [`TableError::MissingColumn`].
    pub fn column(&self, name: &str) -> Result<&[f64]> {
        self.get_column(name)
            .ok_or_else(|| TableError::MissingColumn(name.to_string()))
    }

    /// Add a column, replacing any existing column of the same name.
    pub fn insert_column(&mut self, name: &str, values: Vec<f64>) -> Result<()> {
        if values.len() != self.len() {
            return Err(TableError::LengthMismatch {
                name: name.to_string(),
                expected: self.len(),
                found: values.len(),
            });
        }

        match self.columns.iter_mut().find(|c| c.name == name) {
            Some(existing) => existing.values = values,
            None => self.columns.push(Column {
                name: name.to_string(),
                values,
            }),
        }
        Ok(())
    }

    /// Remove a column, returning its values if it existed.
    pub fn drop_column(&mut self, name: &str) -> Option<Vec<f64>> {
        let idx = self.columns.iter().position(|c| c.name == name)?;
        Some(self.columns.remove(idx).values)
    }

    /// Cluster labels, if the table has been clustered.
    pub fn clusters(&self) -> Option<&[i32]> {
        self.cluster.as_deref()
    }

    /// Cluster labels, failing with [`TableError::NotClustered`].
    pub fn require_clusters(&self) -> Result<&[i32]> {
        self.clusters().ok_or(TableError::NotClustered)
    }

    /// Membership probabilities, if the table has been clustered.
    pub fn probabilities(&self) -> Option<&[f64]> {
        self.clst_prob.as_deref()
    }

    /// Attach clustering output to every row.
    pub fn set_clusters(&mut self, labels: Vec<i32>, probabilities: Vec<f64>) -> Result<()> {
        if labels.len() != self.len() {
            return Err(TableError::LengthMismatch {
                name: CLUSTER_COLUMN.to_string(),
                expected: self.len(),
                found: labels.len(),
            });
        }
        if probabilities.len() != self.len() {
            return Err(TableError::LengthMismatch {
                name: PROBABILITY_COLUMN.to_string(),
                expected: self.len(),
                found: probabilities.len(),
            });
        }
        self.cluster = Some(labels);
        self.clst_prob = Some(probabilities);
        Ok(())
    }

    /// Number of clusters: largest label plus one, zero when all rows are noise.
    pub fn n_clusters(&self) -> usize {
        self.clusters().map_or(0, count_clusters)
    }

    /// Copy of the rows where `keep` is true. Row order is preserved.
    ///
    /// # Panics
    ///
    /// Panics if `keep.len() != self.len()`.
    pub fn filter_rows(&self, keep: &[bool]) -> ProfileTable {
        assert_eq!(keep.len(), self.len(), "row mask length must match table");

        fn pick<T: Copy>(values: &[T], keep: &[bool]) -> Vec<T> {
            values
                .iter()
                .zip(keep)
                .filter_map(|(v, &k)| k.then_some(*v))
                .collect()
        }

        ProfileTable {
            entry: pick(&self.entry, keep),
            vertical: pick(&self.vertical, keep),
            columns: self
                .columns
                .iter()
                .map(|c| Column {
                    name: c.name.clone(),
                    values: pick(&c.values, keep),
                })
                .collect(),
            cluster: self.cluster.as_ref().map(|l| pick(l, keep)),
            clst_prob: self.clst_prob.as_ref().map(|p| pick(p, keep)),
        }
    }

    /// Rows whose values on every listed column are non-null.
    pub fn non_null_mask(&self, names: &[&str]) -> Result<Vec<bool>> {
        let mut mask = vec![true; self.len()];
        for name in names {
            let values = self.column(name)?;
            for (m, v) in mask.iter_mut().zip(values) {
                *m &= !v.is_nan();
            }
        }
        Ok(mask)
    }

    /// Row indices grouped by profile, each group ordered by vertical index.
    ///
    /// Groups are returned in ascending profile id order.
    pub fn profile_groups(&self) -> Vec<(i64, Vec<usize>)> {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.sort_by_key(|&i| (self.entry[i], self.vertical[i]));

        let mut groups: Vec<(i64, Vec<usize>)> = Vec::new();
        for i in order {
            match groups.last_mut() {
                Some((id, rows)) if *id == self.entry[i] => rows.push(i),
                _ => groups.push((self.entry[i], vec![i])),
            }
        }
        groups
    }

    /// Concatenate tables that carry the same column set.
    ///
    /// Clustering output is discarded; concatenation happens before clustering.
    pub fn concat(tables: Vec<ProfileTable>) -> Result<ProfileTable> {
        let mut iter = tables.into_iter();
        let Some(mut out) = iter.next() else {
            return Ok(ProfileTable::default());
        };
        out.cluster = None;
        out.clst_prob = None;

        for table in iter {
            for column in &out.columns {
                if !table.has_column(&column.name) {
                    return Err(TableError::MissingColumn(column.name.clone()));
                }
            }
            out.entry.extend_from_slice(&table.entry);
            out.vertical.extend_from_slice(&table.vertical);
            for column in out.columns.iter_mut() {
                column.values.extend_from_slice(table.column(&column.name)?);
            }
        }

        // Re-run key validation over the merged rows.
        let mut rebuilt = ProfileTable::new(out.entry, out.vertical)?;
        rebuilt.columns = out.columns;
        Ok(rebuilt)
    }
}

/// Cluster count for a label vector: `max(label) + 1`, or zero for all noise.
pub fn count_clusters(labels: &[i32]) -> usize {
    labels
        .iter()
        .copied()
        .filter(|&l| l >= 0)
        .max()
        .map_or(0, |m| m as usize + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_profile_table() -> ProfileTable {
        ProfileTable::new(vec![1, 1, 2, 2], vec![0, 1, 0, 1])
            .unwrap()
            .with_column("press", vec![100.0, 150.0, 100.0, 150.0])
            .unwrap()
    }

    #[test]
    fn test_new_rejects_duplicate_rows() {
        let err = ProfileTable::new(vec![1, 1], vec![3, 3]).unwrap_err();
        assert!(matches!(err, TableError::DuplicateRow { entry: 1, vertical: 3 }));
    }

    #[test]
    fn test_insert_column_length_checked() {
        let mut table = two_profile_table();
        assert!(table.insert_column("iT", vec![1.0]).is_err());
        assert!(table.insert_column("iT", vec![1.0, 2.0, 3.0, 4.0]).is_ok());
        assert_eq!(table.column_names(), vec!["press", "iT"]);
    }

    #[test]
    fn test_insert_column_replaces() {
        let mut table = two_profile_table();
        table.insert_column("press", vec![0.0; 4]).unwrap();
        assert_eq!(table.column("press").unwrap(), &[0.0; 4]);
        assert_eq!(table.column_names().len(), 1);
    }

    #[test]
    fn test_filter_rows_keeps_clusters() {
        let mut table = two_profile_table();
        table
            .set_clusters(vec![0, -1, 1, 1], vec![1.0, 0.0, 0.5, 0.9])
            .unwrap();
        let kept = table.filter_rows(&[true, false, false, true]);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept.entries(), &[1, 2]);
        assert_eq!(kept.clusters().unwrap(), &[0, 1]);
        assert_eq!(kept.probabilities().unwrap(), &[1.0, 0.9]);
    }

    #[test]
    fn test_n_clusters() {
        let mut table = two_profile_table();
        assert_eq!(table.n_clusters(), 0);
        table.set_clusters(vec![-1; 4], vec![0.0; 4]).unwrap();
        assert_eq!(table.n_clusters(), 0);
        table
            .set_clusters(vec![0, 2, -1, 1], vec![1.0; 4])
            .unwrap();
        assert_eq!(table.n_clusters(), 3);
    }

    #[test]
    fn test_profile_groups_sorted_by_vertical() {
        let table = ProfileTable::new(vec![5, 3, 5, 3], vec![1, 1, 0, 0]).unwrap();
        let groups = table.profile_groups();
        assert_eq!(groups, vec![(3, vec![3, 1]), (5, vec![2, 0])]);
    }

    #[test]
    fn test_non_null_mask() {
        let table = two_profile_table()
            .with_column("SP", vec![34.0, f64::NAN, 34.1, 34.2])
            .unwrap();
        let mask = table.non_null_mask(&["press", "SP"]).unwrap();
        assert_eq!(mask, vec![true, false, true, true]);
        assert!(table.non_null_mask(&["CT"]).is_err());
    }

    #[test]
    fn test_concat() {
        let a = two_profile_table();
        let b = ProfileTable::new(vec![3], vec![0])
            .unwrap()
            .with_column("press", vec![200.0])
            .unwrap();
        let merged = ProfileTable::concat(vec![a, b]).unwrap();
        assert_eq!(merged.len(), 5);
        assert_eq!(merged.n_profiles(), 3);
        assert_eq!(merged.column("press").unwrap()[4], 200.0);
    }

    #[test]
    fn test_concat_rejects_overlapping_rows() {
        let a = two_profile_table();
        let b = two_profile_table();
        assert!(ProfileTable::concat(vec![a, b]).is_err());
    }
}
