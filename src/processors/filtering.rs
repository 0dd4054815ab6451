//! Row filtering for profile tables.
//!
//! Two independent filters live here:
//! - record selection on the `BL_yn` and `up_cast` flags
//! - the profile range filter, which keeps rows strictly inside configured
//!   value ranges on pressure, depth, temperature and salinity
//!
//! Both return a new table and leave their input untouched.

use std::collections::HashMap;

use thiserror::Error;

use crate::config::{CastDirection, DataFilters, NamedRange, ProfileFilters, RangeSpec};
use crate::core::table::{ProfileTable, TableError};

/// Column names the range filter reads.
pub const PRESSURE: &str = "press";
pub const DEPTH: &str = "depth";
pub const IN_SITU_TEMP: &str = "iT";
pub const CONSERVATIVE_TEMP: &str = "CT";
pub const PRACTICAL_SALINITY: &str = "SP";
pub const ABSOLUTE_SALINITY: &str = "SA";
pub const BLACK_LIST_FLAG: &str = "BL_yn";
pub const UP_CAST_FLAG: &str = "up_cast";
pub const SUBSAMPLE_MASK: &str = "ss_mask";

/// Errors that can occur during filtering operations.
#[derive(Debug, Error)]
pub enum FilteringError {
    #[error(transparent)]
    Table(#[from] TableError),

    #[error("{0:?} pressure range requested but no per-profile bounds were supplied")]
    MissingProfileBounds(NamedRange),
}

/// Result type for filtering operations.
pub type Result<T> = std::result::Result<T, FilteringError>;

/// Per-profile `(min, max)` bounds, produced by an upstream surface detection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileBounds {
    bounds: HashMap<i64, (f64, f64)>,
}

impl ProfileBounds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bounds for one profile.
    pub fn insert(&mut self, entry: i64, lower: f64, upper: f64) {
        self.bounds.insert(entry, (lower, upper));
    }

    pub fn get(&self, entry: i64) -> Option<(f64, f64)> {
        self.bounds.get(&entry).copied()
    }

    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }

    /// Read bounds from two per-profile columns of `table`.
    ///
    /// The first non-null value of each column within a profile is used.
    /// Profiles where either column is entirely null get no bounds.
    pub fn from_columns(table: &ProfileTable, lower: &str, upper: &str) -> Result<Self> {
        let lo = table.column(lower)?;
        let hi = table.column(upper)?;
        let mut out = Self::new();

        for (entry, rows) in table.profile_groups() {
            let first = |values: &[f64]| rows.iter().map(|&r| values[r]).find(|v| !v.is_nan());
            if let (Some(l), Some(u)) = (first(lo), first(hi)) {
                out.insert(entry, l, u);
            }
        }
        Ok(out)
    }
}

/// True when `value` lies strictly between the two endpoints.
///
/// Endpoint order does not matter. `NaN` never passes.
#[inline]
pub fn in_open_range(value: f64, range: [f64; 2]) -> bool {
    let lo = range[0].min(range[1]);
    let hi = range[0].max(range[1]);
    value > lo && value < hi
}

fn apply_range(mask: &mut [bool], table: &ProfileTable, key: &str, range: [f64; 2]) -> Result<()> {
    let values = table.column(key)?;
    for (m, &v) in mask.iter_mut().zip(values) {
        *m &= in_open_range(v, range);
    }
    Ok(())
}

/// Keep rows that pass the black-list and cast-direction selection.
///
/// # Errors
///
/// Fails when a requested selection needs a flag column the table lacks.
pub fn apply_data_filters(table: &ProfileTable, filters: &DataFilters) -> Result<ProfileTable> {
    let mut mask = vec![true; table.len()];

    if !filters.keep_black_list {
        let flags = table.column(BLACK_LIST_FLAG)?;
        for (m, &f) in mask.iter_mut().zip(flags) {
            *m &= f == 0.0;
        }
    }

    let wanted = match filters.cast_direction {
        CastDirection::Up => Some(1.0),
        CastDirection::Down => Some(0.0),
        CastDirection::All => None,
    };
    if let Some(wanted) = wanted {
        let flags = table.column(UP_CAST_FLAG)?;
        for (m, &f) in mask.iter_mut().zip(flags) {
            *m &= f == wanted;
        }
    }

    let out = table.filter_rows(&mask);
    log::info!(
        "Record selection kept {} of {} rows ({} profiles)",
        out.len(),
        table.len(),
        out.n_profiles()
    );
    Ok(out)
}

/// Keep rows satisfying every configured range simultaneously.
///
/// Each fixed range keeps values with `min < value < max`; the endpoints
/// themselves are excluded, so equal endpoints remove every row. The
/// `Shibley2017` pressure mode takes each profile's bounds from `bounds`;
/// rows of profiles without bounds are dropped. When `subsample` is set, rows
/// with a null `ss_mask` are also dropped.
///
/// # Errors
///
/// Fails when a constrained column is missing from the table, or when the
/// `Shibley2017` mode is requested without `bounds`.
pub fn filter_profile_ranges(
    table: &ProfileTable,
    filters: &ProfileFilters,
    bounds: Option<&ProfileBounds>,
) -> Result<ProfileTable> {
    let mut mask = vec![true; table.len()];

    match &filters.p_range {
        Some(RangeSpec::Fixed(range)) => apply_range(&mut mask, table, PRESSURE, *range)?,
        Some(RangeSpec::Named(named @ NamedRange::Shibley2017)) => {
            let bounds = bounds.ok_or(FilteringError::MissingProfileBounds(*named))?;
            let press = table.column(PRESSURE)?;
            for ((m, &p), entry) in mask.iter_mut().zip(press).zip(table.entries()) {
                *m &= bounds
                    .get(*entry)
                    .is_some_and(|(lo, hi)| in_open_range(p, [lo, hi]));
            }
        }
        None => {}
    }

    let fixed = [
        (DEPTH, filters.d_range),
        (IN_SITU_TEMP, filters.it_range),
        (CONSERVATIVE_TEMP, filters.ct_range),
        (PRACTICAL_SALINITY, filters.sp_range),
        (ABSOLUTE_SALINITY, filters.sa_range),
    ];
    for (key, range) in fixed {
        if let Some(range) = range {
            apply_range(&mut mask, table, key, range)?;
        }
    }

    if filters.subsample {
        let ss = table.column(SUBSAMPLE_MASK)?;
        for (m, v) in mask.iter_mut().zip(ss) {
            *m &= !v.is_nan();
        }
    }

    let out = table.filter_rows(&mask);
    log::info!(
        "Profile range filter kept {} of {} rows",
        out.len(),
        table.len()
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pressure_table(press: Vec<f64>) -> ProfileTable {
        let n = press.len();
        ProfileTable::new(vec![1; n], (0..n as u32).collect())
            .unwrap()
            .with_column(PRESSURE, press)
            .unwrap()
    }

    fn p_filter(lo: f64, hi: f64) -> ProfileFilters {
        ProfileFilters {
            p_range: Some(RangeSpec::Fixed([lo, hi])),
            ..Default::default()
        }
    }

    #[test]
    fn test_boundary_rows_excluded() {
        let table = pressure_table(vec![99.0, 100.0, 150.0, 200.0, 201.0]);
        let out = filter_profile_ranges(&table, &p_filter(100.0, 200.0), None).unwrap();
        assert_eq!(out.column(PRESSURE).unwrap(), &[150.0]);
    }

    #[test]
    fn test_reversed_endpoints() {
        let table = pressure_table(vec![99.0, 150.0, 201.0]);
        let out = filter_profile_ranges(&table, &p_filter(200.0, 100.0), None).unwrap();
        assert_eq!(out.column(PRESSURE).unwrap(), &[150.0]);
    }

    #[test]
    fn test_equal_endpoints_empty() {
        let table = pressure_table(vec![100.0, 150.0]);
        let out = filter_profile_ranges(&table, &p_filter(150.0, 150.0), None).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_idempotent() {
        let table = pressure_table(vec![50.0, 120.0, 180.0, 260.0]);
        let filters = p_filter(100.0, 200.0);
        let once = filter_profile_ranges(&table, &filters, None).unwrap();
        let twice = filter_profile_ranges(&once, &filters, None).unwrap();
        assert_eq!(once.len(), twice.len());
        assert_eq!(once.column(PRESSURE).unwrap(), twice.column(PRESSURE).unwrap());
    }

    #[test]
    fn test_ranges_combine_with_and() {
        let table = pressure_table(vec![120.0, 150.0, 180.0])
            .with_column(PRACTICAL_SALINITY, vec![34.1, 34.9, 34.2])
            .unwrap();
        let filters = ProfileFilters {
            p_range: Some(RangeSpec::Fixed([100.0, 200.0])),
            sp_range: Some([34.0, 34.5]),
            ..Default::default()
        };
        let out = filter_profile_ranges(&table, &filters, None).unwrap();
        assert_eq!(out.column(PRESSURE).unwrap(), &[120.0, 180.0]);
        for (&p, &s) in out
            .column(PRESSURE)
            .unwrap()
            .iter()
            .zip(out.column(PRACTICAL_SALINITY).unwrap())
        {
            assert!(p > 100.0 && p < 200.0);
            assert!(s > 34.0 && s < 34.5);
        }
    }

    #[test]
    fn test_nan_rows_excluded() {
        let table = pressure_table(vec![150.0, f64::NAN]);
        let out = filter_profile_ranges(&table, &p_filter(100.0, 200.0), None).unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_missing_column_is_error() {
        let table = pressure_table(vec![150.0]);
        let filters = ProfileFilters {
            ct_range: Some([0.0, 1.0]),
            ..Default::default()
        };
        assert!(matches!(
            filter_profile_ranges(&table, &filters, None),
            Err(FilteringError::Table(TableError::MissingColumn(_)))
        ));
    }

    #[test]
    fn test_no_filters_keeps_everything() {
        let table = pressure_table(vec![1.0, 2.0, 3.0]);
        let out = filter_profile_ranges(&table, &ProfileFilters::default(), None).unwrap();
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_shibley_uses_per_profile_bounds() {
        let table = ProfileTable::new(vec![1, 1, 2, 2, 3], vec![0, 1, 0, 1, 0])
            .unwrap()
            .with_column(PRESSURE, vec![150.0, 250.0, 150.0, 250.0, 150.0])
            .unwrap();
        let mut bounds = ProfileBounds::new();
        bounds.insert(1, 100.0, 200.0);
        bounds.insert(2, 200.0, 300.0);

        let filters = ProfileFilters {
            p_range: Some(RangeSpec::Named(NamedRange::Shibley2017)),
            ..Default::default()
        };
        let out = filter_profile_ranges(&table, &filters, Some(&bounds)).unwrap();
        assert_eq!(out.entries(), &[1, 2]);
        assert_eq!(out.column(PRESSURE).unwrap(), &[150.0, 250.0]);

        assert!(matches!(
            filter_profile_ranges(&table, &filters, None),
            Err(FilteringError::MissingProfileBounds(NamedRange::Shibley2017))
        ));
    }

    #[test]
    fn test_profile_bounds_from_columns() {
        let table = ProfileTable::new(vec![1, 1, 2], vec![0, 1, 0])
            .unwrap()
            .with_column("p_lo", vec![f64::NAN, 180.0, 90.0])
            .unwrap()
            .with_column("p_hi", vec![320.0, 320.0, f64::NAN])
            .unwrap();
        let bounds = ProfileBounds::from_columns(&table, "p_lo", "p_hi").unwrap();
        assert_eq!(bounds.len(), 1);
        assert_eq!(bounds.get(1), Some((180.0, 320.0)));
        assert_eq!(bounds.get(2), None);
    }

    #[test]
    fn test_subsample_mask() {
        let table = pressure_table(vec![1.0, 2.0, 3.0])
            .with_column(SUBSAMPLE_MASK, vec![1.0, f64::NAN, 1.0])
            .unwrap();
        let filters = ProfileFilters {
            subsample: true,
            ..Default::default()
        };
        let out = filter_profile_ranges(&table, &filters, None).unwrap();
        assert_eq!(out.column(PRESSURE).unwrap(), &[1.0, 3.0]);
    }

    #[test]
    fn test_data_filters() {
        let table = pressure_table(vec![1.0, 2.0, 3.0, 4.0])
            .with_column(BLACK_LIST_FLAG, vec![0.0, 1.0, 0.0, 0.0])
            .unwrap()
            .with_column(UP_CAST_FLAG, vec![1.0, 1.0, 0.0, 1.0])
            .unwrap();

        let up = apply_data_filters(&table, &DataFilters::default()).unwrap();
        assert_eq!(up.column(PRESSURE).unwrap(), &[1.0, 4.0]);

        let down = apply_data_filters(
            &table,
            &DataFilters {
                keep_black_list: true,
                cast_direction: CastDirection::Down,
            },
        )
        .unwrap();
        assert_eq!(down.column(PRESSURE).unwrap(), &[3.0]);

        let all = apply_data_filters(
            &table,
            &DataFilters {
                keep_black_list: true,
                cast_direction: CastDirection::All,
            },
        )
        .unwrap();
        assert_eq!(all.len(), 4);
    }

    #[test]
    fn test_data_filters_missing_flag() {
        let table = pressure_table(vec![1.0]);
        assert!(apply_data_filters(&table, &DataFilters::default()).is_err());
    }
}
