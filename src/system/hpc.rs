//! HPC cluster profiles and scheduler kinds
//!
//! Each known cluster has a fixed profile: scheduler, GPU presence, core
//! and GPU counts, and the tuning family the launcher applies. Profiles are
//! looked up by name; anything unknown falls back to generic defaults.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::LaunchError;

/// Batch scheduler driving a cluster
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerKind {
    /// Slurm Workload Manager
    Slurm,
    /// IBM Spectrum LSF
    Lsf,
    /// Flux framework
    Flux,
}

impl SchedulerKind {
    /// Get scheduler name
    pub fn name(&self) -> &'static str {
        match self {
            SchedulerKind::Slurm => "slurm",
            SchedulerKind::Lsf => "lsf",
            SchedulerKind::Flux => "flux",
        }
    }

    /// Command (and leading args) that submits a batch script
    pub fn submit_command(&self) -> &'static [&'static str] {
        match self {
            SchedulerKind::Slurm => &["sbatch"],
            SchedulerKind::Lsf => &["bsub"],
            SchedulerKind::Flux => &["flux", "batch"],
        }
    }

    /// Parallel launcher used inside the batch script
    pub fn parallel_launcher(&self) -> &'static str {
        match self {
            SchedulerKind::Slurm => "srun",
            SchedulerKind::Lsf => "jsrun",
            SchedulerKind::Flux => "flux run",
        }
    }
}

impl fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SchedulerKind {
    type Err = LaunchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "slurm" => Ok(SchedulerKind::Slurm),
            "lsf" => Ok(SchedulerKind::Lsf),
            "flux" => Ok(SchedulerKind::Flux),
            other => Err(LaunchError::config(format!("unknown scheduler '{}'", other))),
        }
    }
}

/// Group of clusters sharing one set of launch optimizations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TuningFamily {
    /// AMD MI250X/MI300A systems (Tioga, El Capitan and friends)
    ElCapitan,
    /// Corona (AMD GPUs, InfiniBand)
    Corona,
    /// IBM POWER9 + NVIDIA V100 systems
    Sierra,
    /// Pascal (both GPUs on socket 0)
    Pascal,
    /// Known cluster with only the MVAPICH2 defaults
    Generic,
}

/// Fixed tuning profile of one named cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClusterProfile {
    /// Cluster name as it appears in hostnames
    pub name: &'static str,
    /// Scheduler in use on the cluster
    pub scheduler: SchedulerKind,
    /// Whether compute nodes carry GPUs
    pub has_gpu: bool,
    /// Physical cores per node
    pub cores_per_node: u32,
    /// GPUs per node (0 on CPU-only systems)
    pub gpus_per_node: u32,
    /// Launch optimizations applied on this cluster
    pub family: TuningFamily,
}

const fn gpu_cluster(
    name: &'static str,
    scheduler: SchedulerKind,
    cores_per_node: u32,
    gpus_per_node: u32,
    family: TuningFamily,
) -> ClusterProfile {
    ClusterProfile {
        name,
        scheduler,
        has_gpu: true,
        cores_per_node,
        gpus_per_node,
        family,
    }
}

/// Every cluster the launcher knows about
pub static CLUSTER_PROFILES: &[ClusterProfile] = &[
    gpu_cluster("pascal", SchedulerKind::Slurm, 36, 2, TuningFamily::Pascal),
    gpu_cluster("sierra", SchedulerKind::Lsf, 44, 4, TuningFamily::Sierra),
    gpu_cluster("lassen", SchedulerKind::Lsf, 44, 4, TuningFamily::Sierra),
    gpu_cluster("rzansel", SchedulerKind::Lsf, 44, 4, TuningFamily::Sierra),
    gpu_cluster("corona", SchedulerKind::Flux, 48, 8, TuningFamily::Corona),
    gpu_cluster("tioga", SchedulerKind::Flux, 64, 8, TuningFamily::ElCapitan),
    gpu_cluster("rzvernal", SchedulerKind::Flux, 64, 8, TuningFamily::ElCapitan),
    gpu_cluster("elcap", SchedulerKind::Flux, 96, 4, TuningFamily::ElCapitan),
    gpu_cluster("tuolumne", SchedulerKind::Flux, 96, 4, TuningFamily::ElCapitan),
    gpu_cluster("rzadams", SchedulerKind::Flux, 96, 4, TuningFamily::ElCapitan),
    ClusterProfile {
        name: "quartz",
        scheduler: SchedulerKind::Slurm,
        has_gpu: false,
        cores_per_node: 36,
        gpus_per_node: 0,
        family: TuningFamily::Generic,
    },
];

impl ClusterProfile {
    /// Find the profile for a cluster name
    pub fn lookup(name: &str) -> Option<&'static ClusterProfile> {
        CLUSTER_PROFILES.iter().find(|p| p.name == name)
    }

    /// Default process count per node: one per GPU, or one per node on CPU systems
    pub fn default_procs_per_node(&self) -> u32 {
        if self.has_gpu {
            self.gpus_per_node.max(1)
        } else {
            1
        }
    }
}

/// Resolved launch defaults for a (possibly unknown) system
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemDefaults {
    /// System name
    pub system: String,
    /// Scheduler to target
    pub scheduler: SchedulerKind,
    /// Processes per node
    pub procs_per_node: u32,
}

impl SystemDefaults {
    /// Defaults for a named system, falling back to one Slurm process per node
    pub fn for_system(system: &str) -> Self {
        match ClusterProfile::lookup(system) {
            Some(profile) => Self {
                system: system.to_string(),
                scheduler: profile.scheduler,
                procs_per_node: profile.default_procs_per_node(),
            },
            None => Self {
                system: system.to_string(),
                scheduler: SchedulerKind::Slurm,
                procs_per_node: 1,
            },
        }
    }
}

/// Detect the system name of the current host
pub fn detect_system() -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_default();
    let system = system_from_hostname(&host);
    tracing::debug!("Detected system '{}' from hostname '{}'", system, host);
    system
}

/// Map a node hostname to its system name ("lassen708.llnl.gov" -> "lassen")
pub fn system_from_hostname(host: &str) -> String {
    let short = host.split('.').next().unwrap_or("");
    let trimmed = short.trim_end_matches(|c: char| c.is_ascii_digit());
    if trimmed.is_empty() {
        "unknown".to_string()
    } else {
        trimmed.to_ascii_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_from_hostname() {
        assert_eq!(system_from_hostname("lassen708"), "lassen");
        assert_eq!(system_from_hostname("tioga12.llnl.gov"), "tioga");
        assert_eq!(system_from_hostname("rzvernal3"), "rzvernal");
        assert_eq!(system_from_hostname("1234"), "unknown");
        assert_eq!(system_from_hostname(""), "unknown");
    }

    #[test]
    fn test_lookup_known_and_unknown() {
        let pascal = ClusterProfile::lookup("pascal").unwrap();
        assert_eq!(pascal.cores_per_node, 36);
        assert_eq!(pascal.scheduler, SchedulerKind::Slurm);
        assert!(pascal.has_gpu);
        assert!(ClusterProfile::lookup("my-laptop").is_none());
    }

    #[test]
    fn test_defaults_for_unknown_system() {
        let defaults = SystemDefaults::for_system("my-laptop");
        assert_eq!(defaults.scheduler, SchedulerKind::Slurm);
        assert_eq!(defaults.procs_per_node, 1);
    }

    #[test]
    fn test_defaults_follow_gpu_count() {
        assert_eq!(SystemDefaults::for_system("lassen").procs_per_node, 4);
        assert_eq!(SystemDefaults::for_system("quartz").procs_per_node, 1);
    }

    #[test]
    fn test_scheduler_parse() {
        assert_eq!("Slurm".parse::<SchedulerKind>().unwrap(), SchedulerKind::Slurm);
        assert_eq!(" flux ".parse::<SchedulerKind>().unwrap(), SchedulerKind::Flux);
        assert!("pbs".parse::<SchedulerKind>().is_err());
        assert_eq!(SchedulerKind::Flux.submit_command(), &["flux", "batch"]);
    }
}
