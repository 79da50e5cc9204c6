//! Cluster detection and profiles
//!
//! Maps cluster names to their scheduler and node shape, and detects the
//! current cluster from the hostname.

pub mod hpc;

pub use hpc::{
    detect_system, system_from_hostname, ClusterProfile, SchedulerKind, SystemDefaults,
    TuningFamily, CLUSTER_PROFILES,
};
