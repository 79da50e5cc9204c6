//! Configuration module for the CosmoFlow launcher
//!
//! Provides the command line and the launch configuration resolved from
//! it and the detected cluster.

mod settings;

pub use settings::*;
