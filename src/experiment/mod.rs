//! Experiment description handed to the training executable
//!
//! The experiment is serialized to `experiment.json` and the readers to
//! `data_reader.prototext`; the executable is pointed at both.

mod model;

pub use model::*;

use std::path::Path;

use crate::launcher::{dace_environment, distconv_environment, BatchEnvironment, EnvSnapshot};

/// Experiment file written into the work directory
pub const EXPERIMENT_FILE: &str = "experiment.json";

/// Reader file written into the work directory
pub const READER_FILE: &str = "data_reader.prototext";

/// I/O threads used when the data store is off
pub const NUM_IO_THREADS: u32 = 8;

/// Arguments for the training executable
///
/// `use_data_store` is false for synthetic data or when the data store
/// is disabled; the executable then gets a fixed I/O thread count.
pub fn lbann_args(use_data_store: bool, profile_args: &[String], work_dir: &Path) -> Vec<String> {
    let mut args = Vec::with_capacity(profile_args.len() + 3);
    if use_data_store {
        args.push("--use_data_store".to_string());
    } else {
        args.push(format!("--num_io_threads={}", NUM_IO_THREADS));
    }
    args.extend(profile_args.iter().cloned());
    args.push(format!("--reader={}", work_dir.join(READER_FILE).display()));
    args.push(format!("--experiment={}", work_dir.join(EXPERIMENT_FILE).display()));
    args
}

/// Environment the training run needs on top of cluster tuning
///
/// `dace_app_dir` is the executable's directory when DaCe kernels are
/// requested under distconv.
pub fn run_environment(
    parallel: Option<&ParallelStrategy>,
    reclaim_error_signals: bool,
    dace_app_dir: Option<&str>,
    snapshot: &EnvSnapshot,
) -> BatchEnvironment {
    let io_partitions = parallel.map(|p| p.depth_groups).unwrap_or(1);
    let mut env = distconv_environment(io_partitions);
    env.insert(
        "LBANN_KEEP_ERROR_SIGNALS",
        if reclaim_error_signals { 0 } else { 1 },
    );
    if let (Some(_), Some(app_dir)) = (parallel, dace_app_dir) {
        env.extend(dace_environment(app_dir, snapshot));
    }
    env
}
