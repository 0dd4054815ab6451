//! Configuration types for the profile clustering pipeline.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Which cast directions to keep during record selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CastDirection {
    #[default]
    Up,
    Down,
    All,
}

/// Whole-record selection applied before any per-profile filtering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataFilters {
    /// Keep profiles flagged on the black list (`BL_yn`)
    #[serde(default)]
    pub keep_black_list: bool,

    /// Cast direction to keep, read from the `up_cast` flag
    #[serde(default)]
    pub cast_direction: CastDirection,
}

impl Default for DataFilters {
    fn default() -> Self {
        Self {
            keep_black_list: false,
            cast_direction: CastDirection::Up,
        }
    }
}

/// Named, profile-dependent range selections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NamedRange {
    /// Per-profile pressure bounds following Shibley et al. (2017)
    Shibley2017,
}

/// A range constraint: either fixed endpoints or a named per-profile mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RangeSpec {
    Fixed([f64; 2]),
    Named(NamedRange),
}

/// Temperature/salinity regridding onto coarse grids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegridSpec {
    pub t_var: String,
    pub d_temp: f64,
    pub s_var: String,
    pub d_salt: f64,
}

/// Filters applied to the rows of every profile.
///
/// Ranges are strict open intervals; a missing range imposes no constraint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileFilters {
    /// Pressure range in dbar, or `Shibley2017`
    #[serde(default)]
    pub p_range: Option<RangeSpec>,

    /// Depth range in m
    #[serde(default)]
    pub d_range: Option<[f64; 2]>,

    /// In-situ temperature range in degrees C
    #[serde(default, rename = "iT_range")]
    pub it_range: Option<[f64; 2]>,

    /// Conservative temperature range in degrees C
    #[serde(default, rename = "CT_range")]
    pub ct_range: Option<[f64; 2]>,

    /// Practical salinity range
    #[serde(default, rename = "SP_range")]
    pub sp_range: Option<[f64; 2]>,

    /// Absolute salinity range in g/kg
    #[serde(default, rename = "SA_range")]
    pub sa_range: Option<[f64; 2]>,

    /// Drop rows masked out by `ss_mask`
    #[serde(default)]
    pub subsample: bool,

    /// Snap temperature and salinity to coarse grids after filtering
    #[serde(default)]
    pub regrid_ts: Option<RegridSpec>,

    /// Per-profile columns holding the lower and upper `Shibley2017` bounds
    #[serde(default)]
    pub shibley_bounds: Option<[String; 2]>,
}

/// Configuration for the vertical moving average.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovingAverageConfig {
    /// Window width in dbar
    #[serde(default = "default_window_dbar")]
    pub window_dbar: f64,

    /// Vertical spacing of the data in dbar
    #[serde(default = "default_resolution_dbar")]
    pub resolution_dbar: f64,
}

fn default_window_dbar() -> f64 {
    25.0
}

fn default_resolution_dbar() -> f64 {
    0.25
}

impl MovingAverageConfig {
    /// Window length in samples.
    pub fn window_samples(&self) -> usize {
        if self.resolution_dbar <= 0.0 || !self.window_dbar.is_finite() {
            return 0;
        }
        (self.window_dbar / self.resolution_dbar).floor().max(0.0) as usize
    }
}

impl Default for MovingAverageConfig {
    fn default() -> Self {
        Self {
            window_dbar: default_window_dbar(),
            resolution_dbar: default_resolution_dbar(),
        }
    }
}

/// Configuration for HDBSCAN clustering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusteringConfig {
    /// Feature on the first clustering axis
    #[serde(default = "default_cl_x_var")]
    pub cl_x_var: String,

    /// Feature on the second clustering axis
    #[serde(default = "default_cl_y_var")]
    pub cl_y_var: String,

    /// Minimum number of points for a cluster
    #[serde(default = "default_min_cluster_size")]
    pub min_cluster_size: usize,

    /// Neighbourhood size for core distances (defaults to `min_cluster_size`)
    #[serde(default)]
    pub min_samples: Option<usize>,

    /// Cluster aggregate variables to append after clustering
    #[serde(default)]
    pub extra_cl_vars: Vec<String>,

    /// Leave noise rows out of `ca_` and `cmc_` aggregates
    #[serde(default)]
    pub exclude_noise: bool,
}

fn default_cl_x_var() -> String {
    "SP".to_string()
}

fn default_cl_y_var() -> String {
    "la_CT".to_string()
}

fn default_min_cluster_size() -> usize {
    120
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            cl_x_var: default_cl_x_var(),
            cl_y_var: default_cl_y_var(),
            min_cluster_size: default_min_cluster_size(),
            min_samples: None,
            extra_cl_vars: Vec::new(),
            exclude_noise: false,
        }
    }
}

/// Clustering control parameters that a sweep can vary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SweepParam {
    #[serde(rename = "min_cs")]
    MinClusterSize,
    #[serde(rename = "min_samps")]
    MinSamples,
    #[serde(rename = "ma_win")]
    MaWindow,
    #[serde(rename = "n_pfs")]
    NProfiles,
}

impl std::str::FromStr for SweepParam {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "min_cs" => Ok(SweepParam::MinClusterSize),
            "min_samps" => Ok(SweepParam::MinSamples),
            "ma_win" => Ok(SweepParam::MaWindow),
            "n_pfs" => Ok(SweepParam::NProfiles),
            other => Err(format!(
                "unknown sweep parameter '{}' (expected min_cs, min_samps, ma_win or n_pfs)",
                other
            )),
        }
    }
}

impl SweepParam {
    pub fn label(&self) -> &'static str {
        match self {
            SweepParam::MinClusterSize => "Minimum cluster size",
            SweepParam::MinSamples => "Minimum samples",
            SweepParam::MaWindow => "Moving average window (dbar)",
            SweepParam::NProfiles => "Number of profiles",
        }
    }
}

/// Configuration for a clustering parameter sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Primary swept parameter
    pub x_param: SweepParam,

    /// `[start, stop, step]` for the primary parameter; `stop` is exclusive
    pub x_range: [f64; 3],

    /// Optional secondary parameter, one output line per value
    #[serde(default)]
    pub z_param: Option<SweepParam>,

    /// Values of the secondary parameter (`null` leaves it at its base value)
    #[serde(default = "default_z_list")]
    pub z_list: Vec<Option<f64>>,
}

fn default_z_list() -> Vec<Option<f64>> {
    vec![None]
}

/// Main pipeline configuration combining all sub-configs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub data_filters: DataFilters,

    #[serde(default)]
    pub profile_filters: ProfileFilters,

    #[serde(default)]
    pub moving_average: MovingAverageConfig,

    #[serde(default)]
    pub clustering: ClusteringConfig,

    #[serde(default)]
    pub sweep: Option<SweepConfig>,
}

impl PipelineConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
