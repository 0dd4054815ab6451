//! Text summary of a prepared table.

use std::fmt;

use crate::core::table::ProfileTable;

/// Range of one variable over the non-null rows.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableRange {
    pub name: String,
    /// Number of non-null values
    pub count: usize,
    /// `(min, max)`, present when at least two non-null values exist
    pub bounds: Option<(f64, f64)>,
}

impl VariableRange {
    pub fn from_values(name: &str, values: &[f64]) -> Self {
        let finite: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
        let bounds = (finite.len() > 1).then(|| {
            finite
                .iter()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                    (lo.min(v), hi.max(v))
                })
        });
        Self {
            name: name.to_string(),
            count: finite.len(),
            bounds,
        }
    }

    pub fn span(&self) -> Option<f64> {
        self.bounds.map(|(lo, hi)| hi - lo)
    }
}

fn units(var: &str) -> &'static str {
    match var {
        "press" | "ma_press" => "dbar",
        "depth" => "m",
        "iT" | "CT" | "la_iT" | "la_CT" | "ma_iT" | "ma_CT" => "°C",
        "SA" | "la_SA" | "ma_SA" => "g/kg",
        _ => "",
    }
}

impl fmt::Display for VariableRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = units(&self.name);
        writeln!(f, "\t\t{} ({} values)", self.name, self.count)?;
        match self.bounds {
            Some((lo, hi)) => {
                writeln!(f, "\t\t\trange: {:.2} {}", hi - lo, unit)?;
                write!(f, "\t\t\t{:.2} to {:.2} {}", lo, hi, unit)
            }
            None => write!(f, "\t\t\trange: N/A"),
        }
    }
}

/// Profile and point counts plus per-variable ranges.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSummary {
    pub title: String,
    pub n_profiles: usize,
    pub n_points: usize,
    pub ranges: Vec<VariableRange>,
}

/// Summarise `vars` over `table`; variables absent from the table are
/// skipped.
pub fn summarize<S: AsRef<str>>(title: &str, table: &ProfileTable, vars: &[S]) -> TableSummary {
    let ranges = vars
        .iter()
        .filter_map(|v| {
            let name = v.as_ref();
            table
                .get_column(name)
                .map(|values| VariableRange::from_values(name, values))
        })
        .collect();

    TableSummary {
        title: title.to_string(),
        n_profiles: table.n_profiles(),
        n_points: table.len(),
        ranges,
    }
}

impl fmt::Display for TableSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", self.title)?;
        writeln!(f, "\t\tNumber of profiles:")?;
        writeln!(f, "\t\t\t{}", self.n_profiles)?;
        writeln!(f, "\t\tNumber of data points:")?;
        writeln!(f, "\t\t\t{}", self.n_points)?;
        for range in &self.ranges {
            writeln!(f, "{}", range)?;
        }
        Ok(())
    }
}
