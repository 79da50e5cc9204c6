//! Data-reader construction
//!
//! Builds the reader list for one of three dataset sources: synthetic
//! samples, HDF5 files, or the CosmoFlow dataset class.

mod descriptor;

pub use descriptor::*;

use globset::Glob;
use std::path::Path;
use walkdir::WalkDir;

use crate::error::{LaunchError, Result};

/// Count `*.hdf5` files directly inside `dir`
pub fn count_hdf5_files(dir: &Path) -> Result<usize> {
    let matcher = Glob::new("*.hdf5")
        .map_err(|e| LaunchError::config(format!("invalid dataset pattern: {}", e)))?
        .compile_matcher();

    let count = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| matcher.is_match(entry.file_name()))
        .count();
    Ok(count)
}
