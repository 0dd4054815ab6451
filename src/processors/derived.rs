//! Derived variables computed from existing columns.
//!
//! Variable names follow a prefix convention that is parsed once into a
//! [`DerivedVariableSpec`]:
//!
//! | Name          | Kind                     | Value                        |
//! |---------------|--------------------------|------------------------------|
//! | `aiT`, `aCT`  | product                  | `alpha * iT`, `alpha * CT`   |
//! | `BSP`, `BSA`  | product                  | `beta * SP`, `beta * SA`     |
//! | `la_X`        | local anomaly            | `X - ma_X`                   |
//! | `ca_X`        | cluster average          | see [`aggregates`]           |
//! | `pca_X`       | profile-cluster average  | see [`aggregates`]           |
//! | `cmc_X`       | cluster mean-centred     | see [`aggregates`]           |
//!
//! Anything else, including `ma_X` and `prof_no`, names a plain column.
//!
//! [`aggregates`]: crate::processors::aggregates

use std::fmt;

use thiserror::Error;

use crate::core::table::{ProfileTable, TableError};
use crate::core::transforms::MOVING_AVERAGE_PREFIX;

/// Thermal expansion coefficient column.
pub const ALPHA: &str = "alpha";
/// Haline contraction coefficient column.
pub const BETA: &str = "beta";

const PRODUCTS: [(&str, &str, &str); 4] = [
    ("aiT", ALPHA, "iT"),
    ("aCT", ALPHA, "CT"),
    ("BSP", BETA, "SP"),
    ("BSA", BETA, "SA"),
];

/// Errors raised while computing derived variables.
#[derive(Debug, Error)]
pub enum DerivedError {
    #[error(transparent)]
    Table(#[from] TableError),

    #[error("cannot compute '{name}': base column '{base}' is not in the table")]
    MissingBase { name: String, base: String },

    #[error("cannot compute '{name}': reference column '{reference}' is missing (run the moving average first)")]
    MissingReference { name: String, reference: String },

    #[error("'{0}' is a cluster aggregate and can only be computed on a clustered table")]
    NeedsClusters(String),
}

/// Result type for derived-variable operations.
pub type Result<T> = std::result::Result<T, DerivedError>;

/// How a variable is obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DerivedKind {
    /// Read directly from the table
    Column,
    /// `coefficient * base`, elementwise
    Product { coefficient: String },
    /// `base - ma_base`
    LocalAnomaly,
    /// Cluster mean of `base`, broadcast to the cluster's rows
    ClusterAverage,
    /// Mean of `base` per (profile, cluster)
    ProfileClusterAverage,
    /// `base` minus its cluster mean
    ClusterMeanCentered,
}

/// A variable name parsed into its kind and base column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedVariableSpec {
    pub name: String,
    pub kind: DerivedKind,
    pub base: String,
}

impl DerivedVariableSpec {
    pub fn parse(name: &str) -> Self {
        if let Some((_, coefficient, base)) = PRODUCTS.iter().find(|(n, _, _)| *n == name) {
            return Self {
                name: name.to_string(),
                kind: DerivedKind::Product {
                    coefficient: coefficient.to_string(),
                },
                base: base.to_string(),
            };
        }

        let split = name.split_once('_').filter(|(_, rest)| !rest.is_empty());
        let (kind, base) = match split {
            Some(("la", base)) => (DerivedKind::LocalAnomaly, base),
            Some(("ca", base)) => (DerivedKind::ClusterAverage, base),
            Some(("pca", base)) => (DerivedKind::ProfileClusterAverage, base),
            Some(("cmc", base)) => (DerivedKind::ClusterMeanCentered, base),
            _ => (DerivedKind::Column, name),
        };

        Self {
            name: name.to_string(),
            kind,
            base: base.to_string(),
        }
    }

    /// True for `ca_`, `pca_` and `cmc_` variables.
    pub fn is_cluster_aggregate(&self) -> bool {
        matches!(
            self.kind,
            DerivedKind::ClusterAverage
                | DerivedKind::ProfileClusterAverage
                | DerivedKind::ClusterMeanCentered
        )
    }

    /// Name of the smoothed reference a local anomaly subtracts.
    pub fn reference(&self) -> Option<String> {
        match self.kind {
            DerivedKind::LocalAnomaly => Some(format!("{}{}", MOVING_AVERAGE_PREFIX, self.base)),
            _ => None,
        }
    }
}

impl fmt::Display for DerivedVariableSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Bases of every local anomaly needed to produce `names`, following
/// aggregate and product bases down to the anomaly.
pub fn local_anomaly_bases<S: AsRef<str>>(names: &[S]) -> Vec<String> {
    let mut out = Vec::new();
    for name in names {
        let mut spec = DerivedVariableSpec::parse(name.as_ref());
        loop {
            match spec.kind {
                DerivedKind::Column => break,
                DerivedKind::LocalAnomaly => {
                    if !out.contains(&spec.base) {
                        out.push(spec.base.clone());
                    }
                    break;
                }
                _ => spec = DerivedVariableSpec::parse(&spec.base),
            }
        }
    }
    out
}

/// Compute one variable, resolving its dependencies first.
///
/// Returns without touching the table when the column already exists.
pub fn ensure_variable(table: &mut ProfileTable, spec: &DerivedVariableSpec) -> Result<()> {
    if table.has_column(&spec.name) {
        return Ok(());
    }

    let values = match &spec.kind {
        DerivedKind::Column => {
            return Err(DerivedError::MissingBase {
                name: spec.name.clone(),
                base: spec.base.clone(),
            })
        }
        DerivedKind::Product { coefficient } => {
            let base = resolve_base(table, spec)?;
            let factor = table
                .get_column(coefficient)
                .ok_or_else(|| DerivedError::MissingBase {
                    name: spec.name.clone(),
                    base: coefficient.clone(),
                })?;
            base.iter().zip(factor).map(|(b, c)| b * c).collect()
        }
        DerivedKind::LocalAnomaly => {
            let base = resolve_base(table, spec)?;
            let reference_name = spec.reference().unwrap_or_default();
            let reference =
                table
                    .get_column(&reference_name)
                    .ok_or_else(|| DerivedError::MissingReference {
                        name: spec.name.clone(),
                        reference: reference_name.clone(),
                    })?;
            base.iter().zip(reference).map(|(v, r)| v - r).collect()
        }
        _ => return Err(DerivedError::NeedsClusters(spec.name.clone())),
    };

    log::debug!("Computed derived variable {}", spec.name);
    table.insert_column(&spec.name, values)?;
    Ok(())
}

fn resolve_base(table: &mut ProfileTable, spec: &DerivedVariableSpec) -> Result<Vec<f64>> {
    let base = DerivedVariableSpec::parse(&spec.base);
    match ensure_variable(table, &base) {
        Ok(()) => {}
        Err(DerivedError::MissingBase { .. }) if base.kind == DerivedKind::Column => {
            return Err(DerivedError::MissingBase {
                name: spec.name.clone(),
                base: spec.base.clone(),
            })
        }
        Err(e) => return Err(e),
    }
    Ok(table.column(&spec.base)?.to_vec())
}

/// Append every requested variable that is not already in the table.
///
/// Row count and order never change. Already present columns are left
/// untouched, so repeated calls are no-ops.
///
/// # Errors
///
/// Fails when a base or reference column is absent, or when a cluster
/// aggregate is requested (those are computed after clustering).
pub fn calc_extra_vars<S: AsRef<str>>(table: &mut ProfileTable, names: &[S]) -> Result<()> {
    for name in names {
        let spec = DerivedVariableSpec::parse(name.as_ref());
        ensure_variable(table, &spec)?;
    }
    Ok(())
}
