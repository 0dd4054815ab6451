//! Clustering pipeline for ice-tethered profiler (ITP) casts.
//!
//! This crate provides tools for:
//! - Loading profile tables from CSV and selecting records and value ranges
//! - Computing derived variables (products, local anomalies from moving averages)
//! - HDBSCAN clustering with leaf selection and relative validity scoring
//! - Cluster aggregates (`ca_`, `pca_`, `cmc_`) and per-cluster statistics
//! - Parameter sweeps over the clustering controls (parallelized)
//!
//! # Example
//!
//! ```no_run
//! use itp_clustering::core::load_profile_csv;
//! use itp_clustering::processors::{cluster_table, prepare_table};
//! use itp_clustering::PipelineConfig;
//!
//! let config = PipelineConfig::default();
//! let raw = load_profile_csv("itp2.csv").unwrap();
//! let table = prepare_table(&raw, &config, None).unwrap();
//! let outcome = cluster_table(&table, &config.clustering).unwrap();
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod processors;

pub use config::{ClusteringConfig, PipelineConfig, ProfileFilters, SweepConfig, SweepParam};
pub use core::table::ProfileTable;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
