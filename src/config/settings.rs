//! Configuration settings for the CosmoFlow launcher
//!
//! Defines the command line and the typed launch configuration derived
//! from it.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::error::{LaunchError, Result};
use crate::experiment::{
    Callback, CosineSchedule, ModelConfig, OptimizerConfig, OptimizerKind, ParallelStrategy,
};
use crate::launcher::LaunchMode;
use crate::reader::RoleDirs;
use crate::system::{detect_system, SchedulerKind, SystemDefaults};

/// Default job name
pub const DEFAULT_JOB_NAME: &str = "lbann_cosmoflow";

/// Construct and run the CosmoFlow network on the CosmoFlow dataset
#[derive(Parser, Debug, Clone)]
#[command(name = "cosmoflow")]
#[command(version = crate::VERSION)]
#[command(about = "Configure and launch CosmoFlow training jobs on HPC clusters")]
#[command(long_about = r#"
Builds the data readers, model settings and cluster-tuned batch script for a
CosmoFlow training run, then runs or submits it.

Examples:
  cosmoflow --train-dir /p/data/train --val-dir /p/data/val --nodes 4
  cosmoflow --synthetic --train-dir None --input-width 256 --setup-only
  cosmoflow --train-dir /p/data/train --use-distconv --depth-groups 8 --batch-job
  cosmoflow env --system lassen --procs-per-node 4
"#)]
#[command(subcommand_negates_reqs = true)]
pub struct CliArgs {
    // === General ===
    /// Mini-batch size
    #[arg(long, default_value = "1", value_name = "NUM")]
    pub mini_batch_size: u32,

    /// Number of epochs
    #[arg(long, default_value = "5", value_name = "NUM")]
    pub num_epochs: u32,

    /// Random seed
    #[arg(long, value_name = "SEED")]
    pub random_seed: Option<u64>,

    /// Use the DaCe backend in distconv
    #[arg(long)]
    pub dace: bool,

    // === Model ===
    /// Input spatial width
    #[arg(long, default_value = "128", value_name = "WIDTH")]
    pub input_width: u32,

    /// Number of secrets (target parameters)
    #[arg(long, default_value = "4", value_name = "NUM")]
    pub num_secrets: u32,

    /// Use the MLPerf HPC compliant model
    #[arg(long)]
    pub mlperf: bool,

    /// Use batch normalization layers
    #[arg(long)]
    pub use_batchnorm: bool,

    /// Use local batch normalization mode
    #[arg(long)]
    pub local_batchnorm: bool,

    /// Apply log1p transformation to model inputs
    #[arg(long)]
    pub transform_input: bool,

    /// Probability of keeping activations in dropout layers (1 disables dropout)
    #[arg(long, default_value = "0.5", value_name = "PROB")]
    pub dropout_keep_prob: f64,

    /// Use cosine learning rate scheduler
    #[arg(long)]
    pub cosine_schedule: bool,

    /// Minimum learning rate for the cosine scheduler
    #[arg(long, default_value = "0.0", value_name = "LR")]
    pub lr_min: f64,

    /// Steps to decay the learning rate over
    #[arg(long, default_value = "50000", value_name = "STEPS")]
    pub decay_steps: u64,

    /// Initial warmup learning rate
    #[arg(long, default_value = "0.0", value_name = "LR")]
    pub init_warmup_lr: f64,

    /// Warmup steps for the cosine scheduler
    #[arg(long, default_value = "1000", value_name = "STEPS")]
    pub warmup_steps: u64,

    // === Datasets ===
    /// Directory of the train dataset ("None" for no directory)
    #[arg(long, required = true, value_name = "DIR")]
    pub train_dir: Option<String>,

    /// Directory of the validation dataset
    #[arg(long, value_name = "DIR")]
    pub val_dir: Option<String>,

    /// Directory of the test dataset
    #[arg(long, value_name = "DIR")]
    pub test_dir: Option<String>,

    /// Use synthetic data
    #[arg(long)]
    pub synthetic: bool,

    /// Use the CosmoFlow dataset class reader
    #[arg(long)]
    pub python_dataset: bool,

    /// Disable the data store
    #[arg(long)]
    pub no_datastore: bool,

    // === Parallelism ===
    /// Enable distconv spatial parallelism
    #[arg(long)]
    pub use_distconv: bool,

    /// k-way partitioning of the depth dimension
    #[arg(long, default_value = "4", value_name = "K")]
    pub depth_groups: u32,

    /// k-way partitioning of the height dimension
    #[arg(long, default_value = "1", value_name = "K")]
    pub height_groups: u32,

    /// k-way partitioning of the width dimension
    #[arg(long, default_value = "1", value_name = "K")]
    pub width_groups: u32,

    /// k-way partitioning of the channel dimension
    #[arg(long, default_value = "1", value_name = "K")]
    pub channel_groups: u32,

    /// k-way partitioning of the filter dimension
    #[arg(long, default_value = "1", value_name = "K")]
    pub filter_groups: u32,

    /// k-way partitioning of the sample dimension
    #[arg(long, default_value = "1", value_name = "K")]
    pub sample_groups: u32,

    /// Minimum spatial size for which distconv is enabled (default: depth groups)
    #[arg(long, value_name = "WIDTH")]
    pub min_distconv_width: Option<u32>,

    /// Allow the framework to reclaim error signal buffers
    #[arg(long)]
    pub dynamically_reclaim_error_signals: bool,

    // === Progress bar ===
    /// Display progress bar output (default)
    #[arg(long, overrides_with = "no_progress")]
    pub progress: bool,

    /// Disable progress bar output
    #[arg(long, overrides_with = "progress")]
    pub no_progress: bool,

    /// Iterations in the progress bar before printing a newline
    #[arg(long, default_value = "100", value_name = "NUM")]
    pub pbar_newline_interval: u32,

    /// Progress bar width
    #[arg(long, default_value = "30", value_name = "NUM")]
    pub pbar_width: u32,

    /// Iteration time moving average length (1 disables)
    #[arg(long, default_value = "10", value_name = "NUM")]
    pub pbar_moving_avg: u32,

    /// Scientific notation for objective values in the progress bar
    #[arg(long)]
    pub pbar_scientific: bool,

    // === Profiling ===
    /// Enable the profiler callback
    #[arg(long)]
    pub profile: bool,

    /// Skip initialization in the profiler
    #[arg(long)]
    pub profile_noinit: bool,

    /// Enable Caliper annotations
    #[arg(long)]
    pub caliper: bool,

    /// Caliper configuration string
    #[arg(long, value_name = "CONFIG")]
    pub caliper_config: Option<String>,

    /// Prefix the launch command with this profiler command
    #[arg(long, value_name = "CMD")]
    pub profiler_cmd: Option<String>,

    /// Preamble command to run before launching (repeatable)
    #[arg(long = "pre", value_name = "CMD")]
    pub pre: Vec<String>,

    // === Optimizer ===
    /// Optimizer
    #[arg(long, value_enum, default_value = "momentum")]
    pub optimizer: OptimizerKind,

    /// Optimizer learning rate
    #[arg(long, default_value = "0.001", value_name = "LR")]
    pub optimizer_learning_rate: f64,

    // === Scheduler ===
    /// Cluster name (detected from the hostname by default)
    #[arg(long, env = "COSMOFLOW_SYSTEM", value_name = "NAME")]
    pub system: Option<String>,

    /// Scheduler (cluster default if omitted)
    #[arg(long, value_enum)]
    pub scheduler: Option<SchedulerKind>,

    /// Number of compute nodes
    #[arg(long, default_value = "1", value_name = "NUM")]
    pub nodes: u32,

    /// Processes per node (cluster default if omitted)
    #[arg(long, value_name = "NUM")]
    pub procs_per_node: Option<u32>,

    /// Scheduler partition/queue
    #[arg(long, value_name = "NAME")]
    pub partition: Option<String>,

    /// Scheduler account/bank
    #[arg(long, value_name = "NAME")]
    pub account: Option<String>,

    /// Scheduler reservation
    #[arg(long, value_name = "NAME")]
    pub reservation: Option<String>,

    /// Job time limit in minutes
    #[arg(long, value_name = "MINUTES")]
    pub time_limit: Option<u32>,

    /// Job name
    #[arg(long, default_value = DEFAULT_JOB_NAME, value_name = "NAME")]
    pub job_name: String,

    /// Only write the work directory, do not launch
    #[arg(long)]
    pub setup_only: bool,

    /// Submit as a batch job instead of running in the current allocation
    #[arg(long)]
    pub batch_job: bool,

    /// Work directory (default: ./<timestamp>_<job name>)
    #[arg(long, value_name = "DIR")]
    pub work_dir: Option<PathBuf>,

    /// Training executable
    #[arg(long, env = "LBANN_EXE", default_value = "lbann", value_name = "PATH")]
    pub lbann_exe: String,

    // === Output ===
    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    /// Log output format
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// List known cluster profiles
    #[command(name = "clusters")]
    Clusters,

    /// Show the tuned environment and launcher arguments for a cluster
    #[command(name = "env")]
    Env {
        /// Cluster name (detected from the hostname by default)
        #[arg(long, env = "COSMOFLOW_SYSTEM", value_name = "NAME")]
        system: Option<String>,
        /// Scheduler (cluster default if omitted)
        #[arg(long, value_enum)]
        scheduler: Option<SchedulerKind>,
        /// Processes per node (cluster default if omitted)
        #[arg(long)]
        procs_per_node: Option<u32>,
        /// Print JSON instead of shell exports
        #[arg(long)]
        json: bool,
    },

    /// Print the data reader prototext for the dataset flags
    #[command(name = "reader")]
    Reader,
}

/// Log output format
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON lines
    Json,
}

/// Where samples come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetSource {
    /// Generated samples
    Synthetic,
    /// CosmoFlow dataset class
    PythonDataset,
    /// HDF5 files
    Hdf5,
}

impl DatasetSource {
    /// Resolve conflicting flags: synthetic, then dataset class, then files
    pub fn select(synthetic: bool, python_dataset: bool) -> Self {
        if synthetic {
            DatasetSource::Synthetic
        } else if python_dataset {
            DatasetSource::PythonDataset
        } else {
            DatasetSource::Hdf5
        }
    }
}

/// Profiling options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileSettings {
    /// Profiler callback enabled
    pub profile: bool,
    /// Skip initialization in the profiler callback
    pub profile_noinit: bool,
    /// Caliper enabled
    pub caliper: bool,
    /// Caliper configuration
    pub caliper_config: Option<String>,
}

impl ProfileSettings {
    /// Callbacks implied by these settings
    pub fn callbacks(&self) -> Vec<Callback> {
        if self.profile {
            vec![Callback::Profiler {
                skip_init: self.profile_noinit,
            }]
        } else {
            Vec::new()
        }
    }

    /// Command-line arguments for the training executable
    pub fn executable_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.caliper {
            args.push("--caliper".to_string());
            if let Some(ref config) = self.caliper_config {
                args.push(format!("--caliper_config={}", config));
            }
        }
        args
    }
}

/// Scheduler-facing job settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSettings {
    /// Cluster name
    pub system: String,
    /// Scheduler
    pub scheduler: SchedulerKind,
    /// Nodes
    pub nodes: u32,
    /// Processes per node
    pub procs_per_node: u32,
    /// Partition
    pub partition: Option<String>,
    /// Account
    pub account: Option<String>,
    /// Reservation
    pub reservation: Option<String>,
    /// Time limit in minutes
    pub time_limit: Option<u32>,
    /// Job name
    pub job_name: String,
    /// Explicit work directory
    pub work_dir: Option<PathBuf>,
    /// Training executable
    pub executable: String,
    /// What to do with the script
    pub mode: LaunchMode,
}

/// Launch configuration derived from CLI args
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchConfig {
    /// Scheduler-facing settings
    pub job: JobSettings,
    /// Global mini-batch size (after distconv adjustment)
    pub mini_batch_size: u32,
    /// Random seed
    pub random_seed: Option<u64>,
    /// DaCe kernels requested
    pub dace: bool,
    /// Model hyperparameters
    pub model: ModelConfig,
    /// Dataset source
    pub dataset: DatasetSource,
    /// Dataset directories
    pub dirs: RoleDirs,
    /// Data store disabled
    pub no_datastore: bool,
    /// Let the framework reclaim error signals
    pub dynamically_reclaim_error_signals: bool,
    /// Progress bar callback, if enabled
    pub progress_bar: Option<Callback>,
    /// Profiling
    pub profiling: ProfileSettings,
    /// Profiler command prefix
    pub profiler_cmd: Option<String>,
    /// Preamble commands
    pub preamble: Vec<String>,
    /// Optimizer
    pub optimizer: OptimizerConfig,
}

/// Map a directory argument to a path; "None" and blanks mean absent
pub fn normalize_dir(value: Option<&str>) -> Option<PathBuf> {
    match value.map(str::trim) {
        None | Some("") | Some("None") => None,
        Some(dir) => Some(PathBuf::from(dir)),
    }
}

/// Blank profiler commands mean "no profiler"
pub fn normalize_profiler_cmd(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|cmd| !cmd.is_empty())
        .map(str::to_string)
}

/// Trim preamble commands and drop blank ones
pub fn normalize_preamble(commands: &[String]) -> Vec<String> {
    commands
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

/// Raise the mini-batch size so each process gets at least one partition
///
/// Under distconv every sample is split into `depth_groups` partitions; with
/// fewer partitions than processes, the batch is grown to fill the trainer.
pub fn adjust_mini_batch_size(mini_batch_size: u32, depth_groups: u32, total_procs: u32) -> u32 {
    if depth_groups == 0 || mini_batch_size.saturating_mul(depth_groups) >= total_procs {
        return mini_batch_size;
    }
    let adjusted = total_procs / depth_groups;
    tracing::warn!(
        "Mini-batch of {} with {} depth groups is too small for {} processes; increasing mini-batch size to {}",
        mini_batch_size,
        depth_groups,
        total_procs,
        adjusted
    );
    adjusted
}

impl LaunchConfig {
    /// Create config from CLI arguments
    pub fn from_cli(args: &CliArgs) -> Result<Self> {
        let system = args.system.clone().unwrap_or_else(detect_system);
        let defaults = SystemDefaults::for_system(&system);
        let scheduler = args.scheduler.unwrap_or(defaults.scheduler);
        let procs_per_node = args.procs_per_node.unwrap_or(defaults.procs_per_node);

        if args.nodes == 0 || procs_per_node == 0 {
            return Err(LaunchError::config(
                "nodes and processes per node must be at least 1",
            ));
        }

        let parallel_strategy = args.use_distconv.then(|| ParallelStrategy {
            depth_groups: args.depth_groups,
            height_groups: args.height_groups,
            width_groups: args.width_groups,
            channel_groups: args.channel_groups,
            filter_groups: args.filter_groups,
            sample_groups: args.sample_groups,
        });

        let total_procs = args.nodes.checked_mul(procs_per_node).ok_or_else(|| {
            LaunchError::config(format!(
                "{} nodes x {} processes per node overflows the process count",
                args.nodes, procs_per_node
            ))
        })?;

        let mini_batch_size = if args.use_distconv {
            adjust_mini_batch_size(args.mini_batch_size, args.depth_groups, total_procs)
        } else {
            args.mini_batch_size
        };

        let cosine_schedule = args.cosine_schedule.then(|| CosineSchedule {
            lr_min: args.lr_min,
            decay_steps: args.decay_steps,
            init_warmup_lr: args.init_warmup_lr,
            warmup_steps: args.warmup_steps,
        });

        let model = ModelConfig {
            input_width: args.input_width,
            num_secrets: args.num_secrets,
            use_batchnorm: args.use_batchnorm,
            local_batchnorm: args.local_batchnorm,
            num_epochs: args.num_epochs,
            learning_rate: args.optimizer_learning_rate,
            min_distconv_width: args.min_distconv_width,
            mlperf: args.mlperf,
            transform_input: args.transform_input,
            dropout_keep_prob: args.dropout_keep_prob,
            cosine_schedule,
            parallel_strategy,
        };

        let progress_bar = (!args.no_progress).then(|| Callback::ProgressBar {
            newline_interval: args.pbar_newline_interval,
            print_mem_usage: true,
            moving_average_length: args.pbar_moving_avg,
            bar_width: args.pbar_width,
            scientific_notation: args.pbar_scientific,
        });

        let profiler_cmd = normalize_profiler_cmd(args.profiler_cmd.as_deref());
        if args.profiler_cmd.is_some() && profiler_cmd.is_none() {
            tracing::warn!("Ignoring blank profiler command");
        }

        let mode = if args.setup_only {
            LaunchMode::SetupOnly
        } else if args.batch_job {
            LaunchMode::Submit
        } else {
            LaunchMode::Run
        };

        Ok(Self {
            job: JobSettings {
                system,
                scheduler,
                nodes: args.nodes,
                procs_per_node,
                partition: args.partition.clone(),
                account: args.account.clone(),
                reservation: args.reservation.clone(),
                time_limit: args.time_limit,
                job_name: args.job_name.clone(),
                work_dir: args.work_dir.clone(),
                executable: args.lbann_exe.clone(),
                mode,
            },
            mini_batch_size,
            random_seed: args.random_seed,
            dace: args.dace,
            model,
            dataset: DatasetSource::select(args.synthetic, args.python_dataset),
            dirs: RoleDirs {
                train: normalize_dir(args.train_dir.as_deref()),
                validate: normalize_dir(args.val_dir.as_deref()),
                test: normalize_dir(args.test_dir.as_deref()),
            },
            no_datastore: args.no_datastore,
            dynamically_reclaim_error_signals: args.dynamically_reclaim_error_signals,
            progress_bar,
            profiling: ProfileSettings {
                profile: args.profile,
                profile_noinit: args.profile_noinit,
                caliper: args.caliper,
                caliper_config: args.caliper_config.clone(),
            },
            profiler_cmd,
            preamble: normalize_preamble(&args.pre),
            optimizer: OptimizerConfig::new(args.optimizer, args.optimizer_learning_rate),
        })
    }
}
