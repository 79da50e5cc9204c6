//! Launch orchestration
//!
//! Turns a [`LaunchConfig`] into a populated work directory: the data
//! reader, the experiment file and a cluster-tuned batch script, then
//! hands the script to the scheduler.

use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::config::{DatasetSource, LaunchConfig};
use crate::error::{IoResultExt, Result};
use crate::experiment::{
    lbann_args, run_environment, Experiment, TrainerConfig, EXPERIMENT_FILE, READER_FILE,
};
use crate::launcher::{
    absolute_path, configure, default_work_dir, BatchJob, EnvSnapshot, LaunchMode, TuningRequest,
    PATH_SEPARATOR,
};
use crate::reader::{
    count_hdf5_files, hdf5_reader, python_dataset_reader, synthetic_reader, DataReader, Role,
};
use crate::system::SchedulerKind;

/// Result of a launch
#[derive(Debug, Clone)]
pub struct LaunchSummary {
    /// Work directory
    pub work_dir: PathBuf,
    /// Batch script
    pub script_path: PathBuf,
    /// Job ID, when submitted
    pub job_id: Option<String>,
    /// What was done with the script
    pub mode: LaunchMode,
    /// Target cluster
    pub system: String,
    /// Scheduler
    pub scheduler: SchedulerKind,
    /// Nodes
    pub nodes: u32,
    /// Processes per node
    pub procs_per_node: u32,
    /// Global mini-batch size
    pub mini_batch_size: u32,
    /// Roles with a data reader
    pub roles: Vec<Role>,
    /// Exported environment variables
    pub env_vars: usize,
    /// Time spent
    pub duration: Duration,
}

impl LaunchSummary {
    /// Print summary to console
    pub fn print_summary(&self) {
        println!("\n=== Launch Summary ===");
        println!("System:          {} ({})", self.system, self.scheduler);
        println!("Topology:        {} nodes x {} procs", self.nodes, self.procs_per_node);
        println!("Mini-batch:      {}", self.mini_batch_size);
        let roles: Vec<&str> = self.roles.iter().map(|r| r.name()).collect();
        println!("Readers:         {}", roles.join(", "));
        println!("Environment:     {} variables", self.env_vars);
        println!("Work directory:  {}", self.work_dir.display());
        println!("Batch script:    {}", self.script_path.display());
        match (self.mode, &self.job_id) {
            (LaunchMode::SetupOnly, _) => println!("Status:          setup only"),
            (LaunchMode::Submit, Some(id)) => println!("Status:          submitted as job {}", id),
            (LaunchMode::Submit, None) => println!("Status:          submitted"),
            (LaunchMode::Run, _) => println!("Status:          completed"),
        }
        println!("Duration:        {:.2?}", self.duration);
    }
}

/// Builds and launches one CosmoFlow run
pub struct LaunchEngine {
    config: LaunchConfig,
    snapshot: EnvSnapshot,
}

impl LaunchEngine {
    /// Create an engine reading the current process environment
    pub fn new(config: LaunchConfig) -> Self {
        Self {
            config,
            snapshot: EnvSnapshot::from_process(),
        }
    }

    /// Use a fixed environment snapshot instead of the process environment
    pub fn with_snapshot(mut self, snapshot: EnvSnapshot) -> Self {
        self.snapshot = snapshot;
        self
    }

    /// Configuration in use
    pub fn config(&self) -> &LaunchConfig {
        &self.config
    }

    /// Absolute work directory, timestamped under the current directory by default
    pub fn work_dir(&self) -> Result<PathBuf> {
        let dir = self
            .config
            .job
            .work_dir
            .clone()
            .unwrap_or_else(|| default_work_dir(&self.config.job.job_name, Local::now()));
        absolute_path(&dir)
    }

    /// Data readers for the configured dataset source
    pub fn build_data_reader(&self) -> Result<DataReader> {
        let model = &self.config.model;
        let reader = match self.config.dataset {
            DatasetSource::Synthetic => synthetic_reader(model.input_width, model.num_secrets)?,
            DatasetSource::PythonDataset => {
                python_dataset_reader(&self.config.dirs, model.input_width, model.num_secrets)
            }
            DatasetSource::Hdf5 => {
                for (role, dir) in self.config.dirs.active() {
                    if count_hdf5_files(dir)? == 0 {
                        tracing::warn!("No .hdf5 files for {} in {}", role, dir.display());
                    }
                }
                hdf5_reader(&self.config.dirs, model.num_secrets)
            }
        };

        if reader.readers.is_empty() {
            tracing::warn!("No dataset directories given; the experiment has no data readers");
        }
        Ok(reader)
    }

    /// Experiment description around a data reader
    pub fn build_experiment(&self, data_reader: DataReader) -> Experiment {
        let config = &self.config;
        let mut callbacks: Vec<_> = config.progress_bar.iter().cloned().collect();
        callbacks.extend(config.profiling.callbacks());

        Experiment {
            trainer: TrainerConfig {
                mini_batch_size: config.mini_batch_size,
                serialize_io: config.dataset == DatasetSource::Hdf5,
                random_seed: config.random_seed,
            },
            model: config.model.clone(),
            callbacks,
            optimizer: config.optimizer,
            data_reader,
        }
    }

    /// Batch job with tuned environment and launcher arguments
    pub fn build_batch_job(&self, work_dir: &Path) -> Result<BatchJob> {
        let config = &self.config;
        let job = &config.job;

        let use_data_store = config.dataset != DatasetSource::Synthetic && !config.no_datastore;
        let args = lbann_args(use_data_store, &config.profiling.executable_args(), work_dir);

        let dace_app_dir = if config.dace {
            Some(executable_dir(&job.executable, &self.snapshot)?)
        } else {
            None
        };
        let environment = run_environment(
            config.model.parallel_strategy.as_ref(),
            config.dynamically_reclaim_error_signals,
            dace_app_dir.as_deref(),
            &self.snapshot,
        );

        let mut request = TuningRequest::new(&job.system, job.procs_per_node, job.scheduler);
        request.environment = environment;
        let tuned = configure(request, &self.snapshot)?;

        let mut batch = BatchJob::new(job.scheduler, &job.job_name, work_dir, &job.executable);
        batch.nodes = job.nodes;
        batch.procs_per_node = job.procs_per_node;
        batch.partition = job.partition.clone();
        batch.account = job.account.clone();
        batch.reservation = job.reservation.clone();
        batch.time_limit = job.time_limit;
        batch.environment = tuned.environment;
        batch.launcher_args = tuned.launcher_args;
        batch.preamble = config.preamble.clone();
        batch.profiler_cmd = config.profiler_cmd.clone();
        batch.args = args;
        Ok(batch)
    }

    /// Write the work directory and launch
    pub fn execute(&self) -> Result<LaunchSummary> {
        let start_time = Instant::now();
        let work_dir = self.work_dir()?;
        let job = &self.config.job;

        tracing::info!(
            "Preparing {} on {} ({} nodes x {} procs) in {}",
            job.job_name,
            job.system,
            job.nodes,
            job.procs_per_node,
            work_dir.display()
        );

        let data_reader = self.build_data_reader()?;
        let roles = data_reader.roles();
        let prototext = data_reader.to_prototext();
        let experiment = self.build_experiment(data_reader);
        let batch = self.build_batch_job(&work_dir)?;

        write_inputs(&work_dir, &prototext, &experiment)
            .map_err(|e| e.with_context("writing work directory"))?;

        let outcome = batch.launch(job.mode)?;

        Ok(LaunchSummary {
            work_dir,
            script_path: outcome.script_path,
            job_id: outcome.job_id,
            mode: job.mode,
            system: job.system.clone(),
            scheduler: job.scheduler,
            nodes: job.nodes,
            procs_per_node: job.procs_per_node,
            mini_batch_size: self.config.mini_batch_size,
            roles,
            env_vars: batch.environment.len(),
            duration: start_time.elapsed(),
        })
    }
}

fn write_inputs(work_dir: &Path, prototext: &str, experiment: &Experiment) -> Result<()> {
    fs::create_dir_all(work_dir).with_path(work_dir)?;
    let reader_path = work_dir.join(READER_FILE);
    fs::write(&reader_path, prototext).with_path(&reader_path)?;
    let experiment_path = work_dir.join(EXPERIMENT_FILE);
    let json = serde_json::to_string_pretty(experiment)?;
    fs::write(&experiment_path, json).with_path(&experiment_path)?;
    tracing::debug!("Wrote {} and {}", reader_path.display(), experiment_path.display());
    Ok(())
}

/// Absolute directory holding the executable
///
/// Bare names are looked up on the snapshot's `PATH`, falling back to the
/// current directory.
fn executable_dir(executable: &str, snapshot: &EnvSnapshot) -> Result<String> {
    let dir = match Path::new(executable).parent() {
        Some(dir) if !dir.as_os_str().is_empty() => absolute_path(dir)?,
        _ => match search_path(executable, snapshot) {
            Some(dir) => absolute_path(&dir)?,
            None => {
                tracing::warn!(
                    "'{}' not found on PATH; DaCe kernels go under the current directory",
                    executable
                );
                absolute_path(Path::new("."))?
            }
        },
    };
    Ok(dir.to_string_lossy().into_owned())
}

fn search_path(executable: &str, snapshot: &EnvSnapshot) -> Option<PathBuf> {
    snapshot
        .get("PATH")?
        .split(PATH_SEPARATOR)
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .find(|dir| dir.join(executable).is_file())
}
