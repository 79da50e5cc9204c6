//! Model, trainer and optimizer records passed to the framework

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::reader::DataReader;

/// k-way partitioning of each tensor dimension for spatial parallelism
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParallelStrategy {
    /// Depth partitions
    pub depth_groups: u32,
    /// Height partitions
    pub height_groups: u32,
    /// Width partitions
    pub width_groups: u32,
    /// Channel partitions
    pub channel_groups: u32,
    /// Filter partitions
    pub filter_groups: u32,
    /// Sample partitions
    pub sample_groups: u32,
}

impl Default for ParallelStrategy {
    fn default() -> Self {
        Self {
            depth_groups: 4,
            height_groups: 1,
            width_groups: 1,
            channel_groups: 1,
            filter_groups: 1,
            sample_groups: 1,
        }
    }
}

/// Cosine learning-rate schedule with linear warmup
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CosineSchedule {
    /// Floor of the decayed learning rate
    pub lr_min: f64,
    /// Steps to decay over
    pub decay_steps: u64,
    /// Learning rate at step 0
    pub init_warmup_lr: f64,
    /// Warmup length in steps
    pub warmup_steps: u64,
}

/// CosmoFlow hyperparameters, forwarded opaquely to the model constructor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Spatial width of the input cube
    pub input_width: u32,
    /// Number of cosmological parameters to predict
    pub num_secrets: u32,
    /// Insert batch normalization layers
    pub use_batchnorm: bool,
    /// Batch normalization statistics are process-local
    pub local_batchnorm: bool,
    /// Training epochs
    pub num_epochs: u32,
    /// Base learning rate
    pub learning_rate: f64,
    /// Smallest spatial size that still uses distconv
    pub min_distconv_width: Option<u32>,
    /// MLPerf HPC compliant model variant
    pub mlperf: bool,
    /// Apply log1p to inputs
    pub transform_input: bool,
    /// Dropout keep probability (1 disables dropout)
    pub dropout_keep_prob: f64,
    /// Cosine schedule, when enabled
    pub cosine_schedule: Option<CosineSchedule>,
    /// Spatial parallelism, when distconv is enabled
    pub parallel_strategy: Option<ParallelStrategy>,
}

/// Callbacks attached to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "callback", rename_all = "snake_case")]
pub enum Callback {
    /// Console progress bar
    ProgressBar {
        /// Iterations between newlines
        newline_interval: u32,
        /// Show memory usage
        print_mem_usage: bool,
        /// Moving average length for iteration time
        moving_average_length: u32,
        /// Bar width in characters
        bar_width: u32,
        /// Objective in scientific notation
        scientific_notation: bool,
    },
    /// Per-layer timing profiler
    Profiler {
        /// Skip the initialization phase
        skip_init: bool,
    },
}

/// Optimizer choice
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    /// SGD with momentum 0.9
    #[default]
    Momentum,
    /// Plain SGD
    Sgd,
    /// Adam
    Adam,
    /// RMSprop
    Rmsprop,
}

/// Optimizer settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "optimizer", rename_all = "snake_case")]
pub enum OptimizerConfig {
    /// Stochastic gradient descent
    Sgd {
        /// Learning rate
        learn_rate: f64,
        /// Momentum (0 for plain SGD)
        momentum: f64,
    },
    /// Adam
    Adam {
        /// Learning rate
        learn_rate: f64,
        /// First moment decay
        beta1: f64,
        /// Second moment decay
        beta2: f64,
        /// Numerical stabilizer
        eps: f64,
    },
    /// RMSprop
    Rmsprop {
        /// Learning rate
        learn_rate: f64,
        /// Decay rate
        decay_rate: f64,
        /// Numerical stabilizer
        eps: f64,
    },
}

impl OptimizerConfig {
    /// Build optimizer settings for a kind and learning rate
    pub fn new(kind: OptimizerKind, learn_rate: f64) -> Self {
        match kind {
            OptimizerKind::Momentum => OptimizerConfig::Sgd {
                learn_rate,
                momentum: 0.9,
            },
            OptimizerKind::Sgd => OptimizerConfig::Sgd {
                learn_rate,
                momentum: 0.0,
            },
            OptimizerKind::Adam => OptimizerConfig::Adam {
                learn_rate,
                beta1: 0.9,
                beta2: 0.99,
                eps: 1e-8,
            },
            OptimizerKind::Rmsprop => OptimizerConfig::Rmsprop {
                learn_rate,
                decay_rate: 0.99,
                eps: 1e-8,
            },
        }
    }
}

/// Trainer settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainerConfig {
    /// Global mini-batch size
    pub mini_batch_size: u32,
    /// Serialize file I/O across processes
    pub serialize_io: bool,
    /// Fixed random seed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub random_seed: Option<u64>,
}

/// Everything the framework needs to build and run the experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    /// Trainer settings
    pub trainer: TrainerConfig,
    /// Model hyperparameters
    pub model: ModelConfig,
    /// Model callbacks
    pub callbacks: Vec<Callback>,
    /// Optimizer
    pub optimizer: OptimizerConfig,
    /// Data readers
    pub data_reader: DataReader,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::synthetic_reader;

    #[test]
    fn test_optimizer_defaults() {
        assert_eq!(
            OptimizerConfig::new(OptimizerKind::Momentum, 0.001),
            OptimizerConfig::Sgd {
                learn_rate: 0.001,
                momentum: 0.9
            }
        );
        match OptimizerConfig::new(OptimizerKind::Adam, 0.01) {
            OptimizerConfig::Adam { beta2, .. } => assert_eq!(beta2, 0.99),
            other => panic!("unexpected optimizer {:?}", other),
        }
    }

    #[test]
    fn test_experiment_json_shape() {
        let experiment = Experiment {
            trainer: TrainerConfig {
                mini_batch_size: 8,
                serialize_io: false,
                random_seed: None,
            },
            model: ModelConfig {
                input_width: 128,
                num_secrets: 4,
                use_batchnorm: false,
                local_batchnorm: false,
                num_epochs: 5,
                learning_rate: 0.001,
                min_distconv_width: None,
                mlperf: false,
                transform_input: false,
                dropout_keep_prob: 0.5,
                cosine_schedule: None,
                parallel_strategy: Some(ParallelStrategy::default()),
            },
            callbacks: vec![Callback::Profiler { skip_init: true }],
            optimizer: OptimizerConfig::new(OptimizerKind::Sgd, 0.1),
            data_reader: synthetic_reader(512, 4).unwrap(),
        };

        let value = serde_json::to_value(&experiment).unwrap();
        assert!(value["trainer"].get("random_seed").is_none());
        assert_eq!(value["model"]["parallel_strategy"]["depth_groups"], 4);
        assert_eq!(value["callbacks"][0]["callback"], "profiler");
        assert_eq!(value["optimizer"]["optimizer"], "sgd");
        assert_eq!(value["data_reader"]["readers"][2]["role"], "test");
        assert_eq!(value["data_reader"]["readers"][0]["source"]["kind"], "synthetic");
        assert_eq!(value["data_reader"]["readers"][0]["source"]["num_samples"], 8010);
    }
}
