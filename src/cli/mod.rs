//! Command-line interface for the ITP clustering pipeline.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::config::{SweepConfig, SweepParam};
use crate::core::loaders::load_sources;
use crate::core::writers::{write_slopes_csv, write_sweep_csv, write_table_csv, write_text, write_tracks_csv};
use crate::processors::cluster_stats::{
    cluster_sizes, clusters_per_profile, lateral_density_ratios, profile_cluster_tracks,
};
use crate::processors::clustering::cluster_table;
use crate::processors::derived::{ALPHA, BETA};
use crate::processors::pipeline::{prepare_table, required_variables};
use crate::processors::summary::summarize;
use crate::processors::sweep::run_sweep;
use crate::PipelineConfig;

#[derive(Parser)]
#[command(name = "itp-clustering")]
#[command(about = "HDBSCAN clustering of ice-tethered profiler data", version)]
pub struct Cli {
    /// Path to YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report profile counts and variable ranges after filtering
    Summary {
        /// Profile CSV files, one per data source
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Write the report to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Variables to report (defaults to pressure, temperature, salinity and the clustering features)
        #[arg(long = "var")]
        vars: Vec<String>,
    },

    /// Cluster the filtered profiles and write the labelled table
    Cluster {
        /// Profile CSV files, one per data source
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Output directory for results
        #[arg(short, long, default_value = "output")]
        output_dir: PathBuf,
        /// Feature on the first clustering axis
        #[arg(long)]
        x_var: Option<String>,
        /// Feature on the second clustering axis
        #[arg(long)]
        y_var: Option<String>,
        /// Minimum cluster size
        #[arg(long)]
        min_cluster_size: Option<usize>,
        /// Minimum samples for core distances
        #[arg(long)]
        min_samples: Option<usize>,
        /// Cluster aggregate variables to append (ca_, pca_, cmc_)
        #[arg(long = "extra-var")]
        extra_vars: Vec<String>,
        /// Also write per-cluster tracks and lateral density ratios
        #[arg(long)]
        stats: bool,
    },

    /// Sweep a clustering parameter and record cluster count and validity
    Sweep {
        /// Profile CSV files, one per data source
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Output CSV file
        #[arg(short, long, default_value = "sweep.csv")]
        output: PathBuf,
        /// Swept parameter: min_cs, min_samps, ma_win or n_pfs
        #[arg(long)]
        x_param: Option<SweepParam>,
        /// Start, stop (exclusive) and step of the swept parameter
        #[arg(long, num_args = 3, value_names = ["START", "STOP", "STEP"], allow_negative_numbers = true)]
        x_range: Option<Vec<f64>>,
        /// Secondary parameter, one curve per value of --z-list
        #[arg(long)]
        z_param: Option<SweepParam>,
        /// Values of the secondary parameter
        #[arg(long, num_args = 1.., allow_negative_numbers = true)]
        z_list: Vec<f64>,
    },

    /// Write the active configuration (defaults merged with --config) to YAML
    InitConfig {
        /// Output YAML file
        #[arg(default_value = "pipeline.yaml")]
        output: PathBuf,
    },
}

/// Create a spinner for indeterminate operations
fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Print a summary box
fn print_summary(title: &str, items: &[(&str, String)]) {
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║ {:<62} ║", title);
    println!("╠══════════════════════════════════════════════════════════════╣");
    for (key, value) in items {
        let display_value = if value.chars().count() > 39 {
            format!("{}...", value.chars().take(36).collect::<String>())
        } else {
            value.clone()
        };
        println!("║ {:<20}: {:<39} ║", key, display_value);
    }
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
}

pub fn run() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity (must come first)
    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .format_timestamp_secs()
        .init();

    // Load config
    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    };

    // Dispatch to subcommands
    match cli.command {
        Commands::Summary { inputs, output, vars } => {
            cmd_summary(&inputs, output.as_deref(), vars, &config);
        }
        Commands::Cluster {
            inputs,
            output_dir,
            x_var,
            y_var,
            min_cluster_size,
            min_samples,
            extra_vars,
            stats,
        } => {
            let mut config = config;
            let clustering = &mut config.clustering;
            if let Some(x_var) = x_var {
                clustering.cl_x_var = x_var;
            }
            if let Some(y_var) = y_var {
                clustering.cl_y_var = y_var;
            }
            clustering.min_cluster_size = min_cluster_size.unwrap_or(clustering.min_cluster_size);
            clustering.min_samples = min_samples.or(clustering.min_samples);
            if !extra_vars.is_empty() {
                clustering.extra_cl_vars = extra_vars;
            }
            cmd_cluster(&inputs, &output_dir, stats, &config);
        }
        Commands::Sweep {
            inputs,
            output,
            x_param,
            x_range,
            z_param,
            z_list,
        } => {
            let sweep = match merge_sweep_args(&config, x_param, x_range, z_param, z_list) {
                Ok(sweep) => sweep,
                Err(e) => {
                    error!("{:#}", e);
                    std::process::exit(1);
                }
            };
            cmd_sweep(&inputs, &output, &sweep, &config);
        }
        Commands::InitConfig { output } => {
            cmd_init_config(&output, &config);
        }
    }
}

/// Read the pipeline configuration, or the defaults when no file is given.
fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    let Some(path) = path else {
        return Ok(PipelineConfig::default());
    };
    let config = PipelineConfig::from_yaml(path)
        .map_err(|e| anyhow!("{}", e))
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    info!("Loaded config from: {}", path.display());
    Ok(config)
}

/// Combine sweep flags with the `sweep` section of the config file.
fn merge_sweep_args(
    config: &PipelineConfig,
    x_param: Option<SweepParam>,
    x_range: Option<Vec<f64>>,
    z_param: Option<SweepParam>,
    z_list: Vec<f64>,
) -> Result<SweepConfig> {
    let base = config.sweep.clone();

    let x_param = x_param
        .or(base.as_ref().map(|s| s.x_param))
        .context("no sweep parameter given (use --x-param or a sweep section in the config)")?;
    let x_range = match x_range {
        Some(values) => [values[0], values[1], values[2]],
        None => base
            .as_ref()
            .map(|s| s.x_range)
            .context("no sweep range given (use --x-range or a sweep section in the config)")?,
    };
    let z_param = z_param.or(base.as_ref().and_then(|s| s.z_param));
    let z_list = if z_list.is_empty() {
        base.map(|s| s.z_list).unwrap_or_else(|| vec![None])
    } else {
        z_list.into_iter().map(Some).collect()
    };

    Ok(SweepConfig {
        x_param,
        x_range,
        z_param,
        z_list,
    })
}

fn load_inputs(inputs: &[PathBuf]) -> Result<crate::core::ProfileTable> {
    let table = load_sources(inputs).context("failed to load profile tables")?;
    info!(
        "Loaded {} rows from {} profiles across {} sources",
        table.len(),
        table.n_profiles(),
        inputs.len()
    );
    Ok(table)
}

fn cmd_summary(inputs: &[PathBuf], output: Option<&Path>, vars: Vec<String>, config: &PipelineConfig) {
    let start = Instant::now();
    let spinner = create_spinner("Loading and filtering profiles...");

    let result = (|| -> Result<String> {
        let raw = load_inputs(inputs)?;
        let table = prepare_table(&raw, config, None).context("failed to prepare table")?;

        let vars = if vars.is_empty() {
            let mut defaults: Vec<String> = ["press", "depth", "iT", "CT", "SP", "SA"]
                .map(String::from)
                .to_vec();
            for v in required_variables(config) {
                if !defaults.contains(&v) {
                    defaults.push(v);
                }
            }
            defaults
        } else {
            vars
        };

        let text = summarize("Group 1", &table, &vars).to_string();
        if let Some(path) = output {
            write_text(path, &text).context("failed to write summary")?;
        }
        Ok(text)
    })();

    spinner.finish_and_clear();

    match result {
        Ok(text) => {
            if output.is_none() {
                println!("{}", text);
            }
            print_summary(
                "Summary Complete",
                &[
                    ("Sources", inputs.len().to_string()),
                    (
                        "Report",
                        output.map_or("stdout".to_string(), |p| p.display().to_string()),
                    ),
                    ("Duration", format!("{:.2?}", start.elapsed())),
                ],
            );
        }
        Err(e) => {
            error!("Summary failed: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn cmd_cluster(inputs: &[PathBuf], output_dir: &Path, stats: bool, config: &PipelineConfig) {
    let start = Instant::now();
    let cl = &config.clustering;

    println!("Running HDBSCAN clustering...");
    println!("Output directory: {}", output_dir.display());
    println!("Parameters:");
    println!("  features: ({}, {})", cl.cl_x_var, cl.cl_y_var);
    println!("  min_cluster_size: {}", cl.min_cluster_size);
    println!("  min_samples: {:?}", cl.min_samples);

    let spinner = create_spinner("Clustering profiles...");

    let result = (|| -> Result<_> {
        let raw = load_inputs(inputs)?;
        let table = prepare_table(&raw, config, None).context("failed to prepare table")?;
        let outcome = cluster_table(&table, cl).context("clustering failed")?;

        let table_path = output_dir.join("clustered.csv");
        write_table_csv(&table_path, &outcome.table)?;

        if stats {
            let sizes = cluster_sizes(&outcome.table)?;
            let per_profile = clusters_per_profile(&outcome.table)?;
            info!(
                "Cluster sizes: {:?}; profiles with clusters: {}",
                sizes,
                per_profile.iter().filter(|(_, n)| *n > 0).count()
            );

            let tracks = profile_cluster_tracks(&outcome.table, "press")?;
            write_tracks_csv(&output_dir.join("tracks.csv"), &tracks)?;

            let has_coefficients = outcome.table.has_column(ALPHA) && outcome.table.has_column(BETA);
            if has_coefficients {
                let slopes = lateral_density_ratios(&outcome.table, "CT", "SP", "press")?;
                write_slopes_csv(&output_dir.join("slopes.csv"), &slopes)?;
            } else {
                warn!("Skipping lateral density ratios: alpha/beta columns not loaded");
            }
        }
        Ok((table_path, outcome))
    })();

    spinner.finish_and_clear();

    match result {
        Ok((table_path, outcome)) => {
            let validity = if outcome.n_clusters > 0 {
                format!("{:.4}", outcome.relative_validity)
            } else {
                "N/A".to_string()
            };
            print_summary(
                "Clustering Complete",
                &[
                    ("Output CSV", table_path.display().to_string()),
                    ("Points clustered", outcome.table.len().to_string()),
                    ("Rows dropped", outcome.n_dropped.to_string()),
                    ("Clusters found", outcome.n_clusters.to_string()),
                    ("Noise points", outcome.n_noise().to_string()),
                    ("Relative validity", validity),
                    ("Duration", format!("{:.2?}", start.elapsed())),
                ],
            );
        }
        Err(e) => {
            error!("Clustering failed: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn cmd_sweep(inputs: &[PathBuf], output: &Path, sweep: &SweepConfig, config: &PipelineConfig) {
    let start = Instant::now();

    println!("Sweeping {}...", sweep.x_param.label());
    println!(
        "Range: {} to {} (exclusive) in steps of {}",
        sweep.x_range[0], sweep.x_range[1], sweep.x_range[2]
    );
    if let Some(z) = sweep.z_param {
        println!("{}: {:?}", z.label(), sweep.z_list);
    }

    let spinner = create_spinner("Running clustering sweep...");

    let result = (|| -> Result<_> {
        let raw = load_inputs(inputs)?;
        let result = run_sweep(&raw, config, sweep, None).context("sweep failed")?;
        write_sweep_csv(output, &result)?;
        Ok(result)
    })();

    spinner.finish_and_clear();

    match result {
        Ok(result) => {
            let best = result
                .best()
                .map(|(zi, xi)| {
                    format!(
                        "x={} ({:.4})",
                        result.x_values[xi], result.relative_validity[zi][xi]
                    )
                })
                .unwrap_or_else(|| "N/A".to_string());
            print_summary(
                "Sweep Complete",
                &[
                    ("Output CSV", output.display().to_string()),
                    ("Parameter", sweep.x_param.label().to_string()),
                    ("Runs", result.len().to_string()),
                    ("Best validity", best),
                    ("Duration", format!("{:.2?}", start.elapsed())),
                ],
            );
        }
        Err(e) => {
            error!("Sweep failed: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn cmd_init_config(output: &Path, config: &PipelineConfig) {
    match config.to_yaml(output) {
        Ok(()) => println!("Wrote configuration to {}", output.display()),
        Err(e) => {
            error!("Failed to write config to {}: {}", output.display(), e);
            std::process::exit(1);
        }
    }
}
