//! Pipeline stages operating on profile tables.

pub mod aggregates;
pub mod cluster_stats;
pub mod clustering;
pub mod derived;
pub mod filtering;
pub mod hdbscan;
pub mod pipeline;
pub mod summary;
pub mod sweep;

// Re-export key types for convenience
pub use aggregates::{calc_cluster_aggregate, calc_extra_cl_vars, AggregateError};
pub use cluster_stats::{
    cluster_sizes, clusters_per_profile, lateral_density_ratios, profile_cluster_tracks,
    ClusterSlope, ProfileClusterStat,
};
pub use clustering::{cluster_table, ClusterOutcome, ClusteringError};
pub use derived::{calc_extra_vars, DerivedError, DerivedKind, DerivedVariableSpec};
pub use filtering::{apply_data_filters, filter_profile_ranges, FilteringError, ProfileBounds};
pub use hdbscan::{hdbscan, HdbscanError, HdbscanParams, HdbscanResult};
pub use pipeline::{prepare_table, PipelineError};
pub use summary::{summarize, TableSummary};
pub use sweep::{run_sweep, SweepError, SweepResult};
