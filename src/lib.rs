//! # cosmoflow-launch - CosmoFlow training launcher for HPC clusters
//!
//! Builds everything a CosmoFlow training run needs and hands it to the
//! cluster scheduler.
//!
//! ## Features
//!
//! - **Data readers**: synthetic, HDF5 and dataset-class readers per role
//! - **Cluster tuning**: per-cluster environment defaults and CPU binding
//! - **Batch scripts**: Slurm, LSF and Flux, with submit or in-allocation run
//! - **Spatial parallelism**: distconv partitioning and DaCe kernel settings
//! - **Layer export**: convolution, pooling, batch norm and ReLU as ONNX nodes
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use cosmoflow_launch::config::{CliArgs, LaunchConfig};
//! use cosmoflow_launch::core::LaunchEngine;
//!
//! let args = CliArgs::parse_from(["cosmoflow", "--synthetic", "--train-dir", "None", "--setup-only"]);
//! let config = LaunchConfig::from_cli(&args).unwrap();
//! let summary = LaunchEngine::new(config).execute().unwrap();
//! summary.print_summary();
//! ```
//!
//! ## Cluster Tuning
//!
//! ```
//! use cosmoflow_launch::launcher::{configure, EnvSnapshot, TuningRequest};
//! use cosmoflow_launch::system::SchedulerKind;
//!
//! let request = TuningRequest::new("lassen", 4, SchedulerKind::Lsf);
//! let tuned = configure(request, &EnvSnapshot::default()).unwrap();
//! assert_eq!(tuned.environment.get("AL_PROGRESS_RANKS_PER_NUMA_NODE"), Some("2"));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod core;
pub mod error;
pub mod experiment;
pub mod launcher;
pub mod onnx;
pub mod reader;
pub mod system;

// Re-export commonly used types
pub use config::{CliArgs, LaunchConfig};
pub use core::{LaunchEngine, LaunchSummary};
pub use error::{LaunchError, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
