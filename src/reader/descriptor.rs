//! Data-reader descriptors for the train, validate and test roles

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{LaunchError, Result};

/// Reference cube width the synthetic sample counts are based on
pub const REFERENCE_WIDTH: u32 = 512;

/// Directory value meaning "no dataset for this role"
pub const NO_DATASET: &str = "__none__";

/// Partition of the data a reader serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Training data
    Train,
    /// Validation data
    Validate,
    /// Test data
    Test,
}

impl Role {
    /// All roles in reader order
    pub const ALL: [Role; 3] = [Role::Train, Role::Validate, Role::Test];

    /// Role name as the framework spells it
    pub fn name(&self) -> &'static str {
        match self {
            Role::Train => "train",
            Role::Validate => "validate",
            Role::Test => "test",
        }
    }

    /// Whether samples are shuffled (everything except test)
    pub fn shuffle(&self) -> bool {
        !matches!(self, Role::Test)
    }

    /// Synthetic sample count at the reference width
    pub fn base_sample_count(&self) -> u64 {
        match self {
            Role::Train => 8010,
            Role::Validate | Role::Test => 1001,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Variant-specific reader settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReaderSource {
    /// Generated samples of a fixed shape
    Synthetic {
        /// Number of samples for this role
        num_samples: u64,
        /// Sample dimensions, space separated
        synth_dimensions: String,
        /// Response dimensions
        synth_response_dimensions: String,
    },
    /// HDF5 files matched by a glob pattern
    Hdf5 {
        /// File glob
        data_file_pattern: String,
        /// Dataset key holding the sample volume
        hdf5_key_data: String,
        /// Dataset key holding the responses
        hdf5_key_responses: String,
        /// Number of responses per sample
        num_responses: u32,
        /// Labels are not read
        disable_labels: bool,
        /// Responses are read
        disable_responses: bool,
        /// Scaling applied to int16 samples
        scaling_factor_int16: f64,
    },
    /// A dataset object constructed by the framework's Python bridge
    PythonDataset {
        /// Module providing the dataset class
        module: String,
        /// Dataset class name
        class_name: String,
        /// Directory with the role's samples
        data_dir: PathBuf,
        /// Spatial input width
        input_width: u32,
        /// Number of target parameters
        num_secrets: u32,
    },
}

impl ReaderSource {
    /// Reader name understood by the framework
    pub fn reader_name(&self) -> &'static str {
        match self {
            ReaderSource::Synthetic { .. } => "synthetic",
            ReaderSource::Hdf5 { .. } => "hdf5",
            ReaderSource::PythonDataset { .. } => "python_dataset",
        }
    }
}

/// One reader entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReaderDescriptor {
    /// Role served by this reader
    pub role: Role,
    /// Shuffle samples
    pub shuffle: bool,
    /// Fraction held out for validation
    pub validation_fraction: f64,
    /// Fraction of the data to use
    pub fraction_of_data_to_use: f64,
    /// Absolute sample cap (0 = none)
    pub absolute_sample_count: u64,
    /// Variant settings
    pub source: ReaderSource,
}

impl ReaderDescriptor {
    fn new(role: Role, source: ReaderSource) -> Self {
        Self {
            role,
            shuffle: role.shuffle(),
            validation_fraction: 0.0,
            fraction_of_data_to_use: 1.0,
            absolute_sample_count: 0,
            source,
        }
    }
}

/// The full reader list handed to the framework
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DataReader {
    /// One entry per active role
    pub readers: Vec<ReaderDescriptor>,
}

impl DataReader {
    /// Reader for a role, if present
    pub fn get(&self, role: Role) -> Option<&ReaderDescriptor> {
        self.readers.iter().find(|r| r.role == role)
    }

    /// Roles with a reader, in order
    pub fn roles(&self) -> Vec<Role> {
        self.readers.iter().map(|r| r.role).collect()
    }

    /// Render as protobuf text format
    pub fn to_prototext(&self) -> String {
        let mut out = String::from("data_reader {\n");
        for reader in &self.readers {
            out.push_str("  reader {\n");
            field(&mut out, "name", quoted(reader.source.reader_name()));
            field(&mut out, "role", quoted(reader.role.name()));
            field(&mut out, "shuffle", reader.shuffle.to_string());
            field(&mut out, "validation_fraction", float(reader.validation_fraction));
            field(&mut out, "fraction_of_data_to_use", float(reader.fraction_of_data_to_use));
            field(&mut out, "absolute_sample_count", reader.absolute_sample_count.to_string());
            match &reader.source {
                ReaderSource::Synthetic {
                    num_samples,
                    synth_dimensions,
                    synth_response_dimensions,
                } => {
                    field(&mut out, "num_samples", num_samples.to_string());
                    field(&mut out, "synth_dimensions", quoted(synth_dimensions));
                    field(&mut out, "synth_response_dimensions", quoted(synth_response_dimensions));
                }
                ReaderSource::Hdf5 {
                    data_file_pattern,
                    hdf5_key_data,
                    hdf5_key_responses,
                    num_responses,
                    disable_labels,
                    disable_responses,
                    scaling_factor_int16,
                } => {
                    field(&mut out, "data_file_pattern", quoted(data_file_pattern));
                    field(&mut out, "hdf5_key_data", quoted(hdf5_key_data));
                    field(&mut out, "hdf5_key_responses", quoted(hdf5_key_responses));
                    field(&mut out, "num_responses", num_responses.to_string());
                    field(&mut out, "disable_labels", disable_labels.to_string());
                    field(&mut out, "disable_responses", disable_responses.to_string());
                    field(&mut out, "scaling_factor_int16", float(*scaling_factor_int16));
                }
                ReaderSource::PythonDataset {
                    module,
                    class_name,
                    data_dir,
                    input_width,
                    num_secrets,
                } => {
                    out.push_str("    python_dataset {\n");
                    out.push_str(&format!("      module: {}\n", quoted(module)));
                    out.push_str(&format!("      class_name: {}\n", quoted(class_name)));
                    out.push_str(&format!(
                        "      args: [{}, {}, {}]\n",
                        quoted(&data_dir.to_string_lossy()),
                        input_width,
                        num_secrets
                    ));
                    out.push_str("    }\n");
                }
            }
            out.push_str("  }\n");
        }
        out.push_str("}\n");
        out
    }
}

fn field(out: &mut String, name: &str, value: String) {
    out.push_str(&format!("    {}: {}\n", name, value));
}

fn quoted(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn float(value: f64) -> String {
    format!("{:?}", value)
}

/// Sample-count multiplier for a synthetic cube width
///
/// Widths must be even, positive and divide the reference width.
pub fn synthetic_scale_factor(input_width: u32) -> Result<u64> {
    let reason = if input_width == 0 {
        Some("width must be positive")
    } else if input_width > REFERENCE_WIDTH {
        Some("exceeds the reference width of 512")
    } else if input_width % 2 != 0 {
        Some("width must be even")
    } else if REFERENCE_WIDTH % input_width != 0 {
        Some("width must divide the reference width of 512")
    } else {
        None
    };
    if let Some(reason) = reason {
        return Err(LaunchError::InvalidSyntheticWidth {
            width: input_width,
            reason,
        });
    }
    Ok(u64::from(REFERENCE_WIDTH / input_width).pow(3))
}

/// Synthetic readers for all three roles
pub fn synthetic_reader(input_width: u32, num_responses: u32) -> Result<DataReader> {
    let factor = synthetic_scale_factor(input_width)?;
    let readers = Role::ALL
        .iter()
        .map(|&role| {
            ReaderDescriptor::new(
                role,
                ReaderSource::Synthetic {
                    num_samples: role.base_sample_count() * factor,
                    synth_dimensions: format!(
                        "{} {} {} {}",
                        num_responses, input_width, input_width, input_width
                    ),
                    synth_response_dimensions: num_responses.to_string(),
                },
            )
        })
        .collect();
    Ok(DataReader { readers })
}

/// Directories per role; absent roles are skipped
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleDirs {
    /// Training directory
    pub train: Option<PathBuf>,
    /// Validation directory
    pub validate: Option<PathBuf>,
    /// Test directory
    pub test: Option<PathBuf>,
}

impl RoleDirs {
    /// Present directories in role order, ignoring the `__none__` sentinel
    pub fn active(&self) -> Vec<(Role, &Path)> {
        [
            (Role::Train, &self.train),
            (Role::Validate, &self.validate),
            (Role::Test, &self.test),
        ]
        .into_iter()
        .filter_map(|(role, dir)| dir.as_deref().map(|d| (role, d)))
        .filter(|(_, dir)| !dir.as_os_str().is_empty() && dir.as_os_str() != NO_DATASET)
        .collect()
    }
}

/// HDF5 readers over `{dir}/*.hdf5` for each present role
pub fn hdf5_reader(dirs: &RoleDirs, num_responses: u32) -> DataReader {
    let readers = dirs
        .active()
        .into_iter()
        .map(|(role, dir)| {
            ReaderDescriptor::new(
                role,
                ReaderSource::Hdf5 {
                    data_file_pattern: format!("{}/*.hdf5", dir.display()),
                    hdf5_key_data: "full".to_string(),
                    hdf5_key_responses: "unitPar".to_string(),
                    num_responses,
                    disable_labels: true,
                    disable_responses: false,
                    scaling_factor_int16: 1.0,
                },
            )
        })
        .collect();
    DataReader { readers }
}

/// Readers backed by the `CosmoFlowDataset` class for each present role
pub fn python_dataset_reader(dirs: &RoleDirs, input_width: u32, num_secrets: u32) -> DataReader {
    let readers = dirs
        .active()
        .into_iter()
        .map(|(role, dir)| {
            ReaderDescriptor::new(
                role,
                ReaderSource::PythonDataset {
                    module: "cosmoflow_dataset".to_string(),
                    class_name: "CosmoFlowDataset".to_string(),
                    data_dir: dir.to_path_buf(),
                    input_width,
                    num_secrets,
                },
            )
        })
        .collect();
    DataReader { readers }
}
