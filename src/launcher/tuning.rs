//! Cluster-aware launch tuning
//!
//! Resolves the environment defaults and launcher flags a batch script needs
//! on a given cluster. The resolution is pure: the host environment is
//! passed in as an [`EnvSnapshot`] and nothing ambient is read.
//!
//! Dispatch is a lookup over [`TUNING_TABLE`] by the cluster's
//! [`TuningFamily`]; each entry names the function applying that family's
//! overrides. Clusters that are not in the profile table pass through
//! unchanged.

use serde::Serialize;
use std::path::Path;

use super::affinity::{pascal_cpu_masks, sierra_packed_binding, slurm_mask_flag};
use super::environment::{BatchEnvironment, EnvSnapshot};
use crate::error::{LaunchError, Result};
use crate::system::{ClusterProfile, SchedulerKind, TuningFamily};

/// Input to [`configure`]
#[derive(Debug, Clone)]
pub struct TuningRequest {
    /// Target cluster name
    pub system: String,
    /// Processes per node
    pub procs_per_node: u32,
    /// Scheduler the script will be submitted to
    pub scheduler: SchedulerKind,
    /// Caller-provided environment (always wins)
    pub environment: BatchEnvironment,
    /// Caller-provided launcher arguments
    pub launcher_args: Vec<String>,
}

impl TuningRequest {
    /// Request with empty environment and launcher arguments
    pub fn new(system: impl Into<String>, procs_per_node: u32, scheduler: SchedulerKind) -> Self {
        Self {
            system: system.into(),
            procs_per_node,
            scheduler,
            environment: BatchEnvironment::new(),
            launcher_args: Vec::new(),
        }
    }
}

/// Environment and launcher arguments after tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TunedLaunch {
    /// Environment to export in the batch script
    pub environment: BatchEnvironment,
    /// Arguments for the parallel launcher
    pub launcher_args: Vec<String>,
}

/// State threaded through the per-cluster tuning functions
pub struct TuningContext<'a> {
    /// Profile of the cluster being tuned
    pub profile: &'static ClusterProfile,
    /// Processes per node
    pub procs_per_node: u32,
    /// Target scheduler
    pub scheduler: SchedulerKind,
    /// Host environment snapshot
    pub snapshot: &'a EnvSnapshot,
    /// Environment being assembled
    pub environment: BatchEnvironment,
    /// Launcher arguments being assembled
    pub launcher_args: Vec<String>,
}

impl TuningContext<'_> {
    fn set(&mut self, key: &str, default: impl ToString) {
        self.environment.set_if_absent(key, default, self.snapshot);
    }

    fn prepend_path(&mut self, key: &str, prefix: &str) {
        self.environment.prepend_path(key, prefix, self.snapshot);
    }

    fn tmpdir(&self) -> String {
        self.snapshot.get("TMPDIR").unwrap_or("/tmp").to_string()
    }
}

/// One row of the tuning table
pub struct TuningEntry {
    /// Family whose clusters share these overrides
    pub family: TuningFamily,
    /// Applies the overrides
    pub apply: fn(&mut TuningContext<'_>) -> Result<()>,
}

/// Per-family overrides; cluster membership comes from the profile table
pub static TUNING_TABLE: &[TuningEntry] = &[
    TuningEntry {
        family: TuningFamily::Pascal,
        apply: tune_pascal,
    },
    TuningEntry {
        family: TuningFamily::ElCapitan,
        apply: tune_el_capitan,
    },
    TuningEntry {
        family: TuningFamily::Corona,
        apply: tune_corona,
    },
    TuningEntry {
        family: TuningFamily::Sierra,
        apply: tune_sierra,
    },
];

/// Merge cluster-specific defaults into a launch request
///
/// Keys already present in the request's environment are never modified,
/// except search-path variables which get segments prepended.
pub fn configure(request: TuningRequest, snapshot: &EnvSnapshot) -> Result<TunedLaunch> {
    let TuningRequest {
        system,
        procs_per_node,
        scheduler,
        environment,
        launcher_args,
    } = request;

    let Some(profile) = ClusterProfile::lookup(&system) else {
        tracing::debug!("No tuning profile for '{}'; passing through", system);
        return Ok(TunedLaunch {
            environment,
            launcher_args,
        });
    };

    if procs_per_node == 0 {
        return Err(LaunchError::InvalidTopology(
            "processes per node must be at least 1".to_string(),
        ));
    }

    let mut ctx = TuningContext {
        profile,
        procs_per_node,
        scheduler,
        snapshot,
        environment,
        launcher_args,
    };

    // Hydrogen assigns GPUs by node-local rank, which mpibind would override.
    if scheduler == SchedulerKind::Slurm && profile.has_gpu {
        ctx.launcher_args.push("--mpibind=off".to_string());
    }

    apply_mvapich_defaults(&mut ctx);

    if let Some(entry) = TUNING_TABLE
        .iter()
        .find(|entry| entry.family == profile.family)
    {
        (entry.apply)(&mut ctx)?;
    }

    tracing::debug!(
        "Tuned launch for {}: {} env vars, {} launcher args",
        system,
        ctx.environment.len(),
        ctx.launcher_args.len()
    );

    Ok(TunedLaunch {
        environment: ctx.environment,
        launcher_args: ctx.launcher_args,
    })
}

fn apply_mvapich_defaults(ctx: &mut TuningContext<'_>) {
    // MPI_Init hangs beyond 35 processes in MVAPICH2-2.3 without this.
    ctx.set("MV2_USE_RDMA_CM", 0);
    ctx.set("MV2_HOMOGENEOUS_CLUSTER", 1);
    ctx.set("MV2_USE_THREAD_WARNING", 0);
}

fn apply_miopen_cache(ctx: &mut TuningContext<'_>) {
    ctx.set("MIOPEN_DEBUG_DISABLE_FIND_DB", "0");
    ctx.set("MIOPEN_DISABLE_CACHE", "0");
    let tmpdir = ctx.tmpdir();
    ctx.set("MIOPEN_USER_DB_PATH", format!("{}/MIOpen_user_db", tmpdir));
    ctx.set("MIOPEN_CUSTOM_CACHE_DIR", format!("{}/MIOpen_custom_cache", tmpdir));
}

fn prepend_rocm_llvm(ctx: &mut TuningContext<'_>) {
    if let Some(rocm) = ctx.snapshot.get("ROCM_PATH") {
        let llvm = Path::new(rocm).join("llvm").join("lib");
        ctx.prepend_path("LD_LIBRARY_PATH", &llvm.to_string_lossy());
    }
}

fn tune_pascal(ctx: &mut TuningContext<'_>) -> Result<()> {
    ctx.set("AL_PROGRESS_RANKS_PER_NUMA_NODE", ctx.procs_per_node);
    if ctx.scheduler == SchedulerKind::Slurm {
        let masks = pascal_cpu_masks(ctx.profile.cores_per_node, ctx.procs_per_node)?;
        ctx.launcher_args.push(slurm_mask_flag(&masks));
    }
    Ok(())
}

fn tune_el_capitan(ctx: &mut TuningContext<'_>) -> Result<()> {
    // Recommended by HPE to avoid hangs
    ctx.set("NCCL_NET_GDR_LEVEL", "3");
    apply_miopen_cache(ctx);

    let snapshot = ctx.snapshot;
    if let Some(cray) = snapshot.get("CRAY_LD_LIBRARY_PATH") {
        ctx.prepend_path("LD_LIBRARY_PATH", cray);
    }
    prepend_rocm_llvm(ctx);
    if let Some(plugin) = snapshot.get("LBANN_USE_THIS_OFI_PLUGIN") {
        ctx.prepend_path("LD_LIBRARY_PATH", plugin);
    }
    Ok(())
}

fn tune_corona(ctx: &mut TuningContext<'_>) -> Result<()> {
    // InfiniBand can hang when an MPI process forks.
    ctx.set("IBV_FORK_SAFE", 1);
    ctx.set("OMPI_MCA_mpi_warn_on_fork", 0);
    apply_miopen_cache(ctx);
    prepend_rocm_llvm(ctx);
    ctx.launcher_args.push("-o pmi=pmix".to_string());
    Ok(())
}

fn tune_sierra(ctx: &mut TuningContext<'_>) -> Result<()> {
    // hwloc treats GPUs as NUMA domains, so Aluminum's default is wrong.
    let (procs_per_socket, cores_per_proc) = sierra_packed_binding(ctx.procs_per_node);
    ctx.set("AL_PROGRESS_RANKS_PER_NUMA_NODE", procs_per_socket);
    if ctx.scheduler == SchedulerKind::Lsf {
        ctx.launcher_args.push(format!("--bind packed:{}", cores_per_proc));
        ctx.launcher_args.push("--smpiargs=\"-gpu\"".to_string());
    }

    ctx.set("IBV_FORK_SAFE", 1);
    // hcoll hangs in MPI_Bcast
    ctx.set("HCOLL_ENABLE_SHARP", 0);
    ctx.set("OMPI_MCA_coll_hcoll_enable", 0);
    ctx.set("PAMI_MAX_NUM_CACHED_PAGES", 0);
    ctx.set("NVSHMEM_MPI_LIB_NAME", "libmpi_ibm.so");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::CLUSTER_PROFILES;
    use proptest::prelude::*;

    fn tune(
        system: &str,
        ppn: u32,
        scheduler: SchedulerKind,
        snapshot: &EnvSnapshot,
    ) -> TunedLaunch {
        configure(TuningRequest::new(system, ppn, scheduler), snapshot).unwrap()
    }

    #[test]
    fn test_unknown_cluster_passes_through() {
        let mut request = TuningRequest::new("my-laptop", 3, SchedulerKind::Flux);
        request.environment.insert("FOO", "bar");
        request.launcher_args.push("--exclusive".to_string());

        let tuned = configure(request.clone(), &EnvSnapshot::default()).unwrap();
        assert_eq!(tuned.environment, request.environment);
        assert_eq!(tuned.launcher_args, request.launcher_args);
    }

    #[test]
    fn test_unknown_cluster_zero_procs_is_not_an_error() {
        let tuned = configure(
            TuningRequest::new("nowhere", 0, SchedulerKind::Slurm),
            &EnvSnapshot::default(),
        )
        .unwrap();
        assert!(tuned.environment.is_empty());
    }

    #[test]
    fn test_pascal_slurm() {
        let tuned = tune("pascal", 2, SchedulerKind::Slurm, &EnvSnapshot::default());
        assert_eq!(
            tuned.launcher_args,
            vec![
                "--mpibind=off".to_string(),
                "--cpu_bind=mask_cpu:0x1ff0000001ff,0x3fe0000003fe00".to_string(),
            ]
        );
        assert_eq!(tuned.environment.get("AL_PROGRESS_RANKS_PER_NUMA_NODE"), Some("2"));
        assert_eq!(tuned.environment.get("MV2_USE_RDMA_CM"), Some("0"));
        assert_eq!(tuned.environment.get("MV2_HOMOGENEOUS_CLUSTER"), Some("1"));
    }

    #[test]
    fn test_pascal_flux_has_no_mask() {
        let tuned = tune("pascal", 2, SchedulerKind::Flux, &EnvSnapshot::default());
        assert!(tuned.launcher_args.is_empty());
    }

    #[test]
    fn test_pascal_oversubscribed_socket_fails() {
        // 18 cores per socket
        let result = configure(
            TuningRequest::new("pascal", 19, SchedulerKind::Slurm),
            &EnvSnapshot::default(),
        );
        assert!(matches!(result, Err(LaunchError::InvalidTopology(_))));
        assert!(configure(
            TuningRequest::new("pascal", 18, SchedulerKind::Slurm),
            &EnvSnapshot::default(),
        )
        .is_ok());
    }

    #[test]
    fn test_zero_procs_on_known_cluster_fails() {
        let result = configure(
            TuningRequest::new("lassen", 0, SchedulerKind::Lsf),
            &EnvSnapshot::default(),
        );
        assert!(matches!(result, Err(LaunchError::InvalidTopology(_))));
    }

    #[test]
    fn test_sierra_lsf() {
        let tuned = tune("lassen", 4, SchedulerKind::Lsf, &EnvSnapshot::default());
        assert_eq!(
            tuned.launcher_args,
            vec!["--bind packed:8".to_string(), "--smpiargs=\"-gpu\"".to_string()]
        );
        assert_eq!(tuned.environment.get("AL_PROGRESS_RANKS_PER_NUMA_NODE"), Some("2"));
        assert_eq!(tuned.environment.get("NVSHMEM_MPI_LIB_NAME"), Some("libmpi_ibm.so"));
        assert_eq!(tuned.environment.get("HCOLL_ENABLE_SHARP"), Some("0"));
    }

    #[test]
    fn test_el_capitan_paths() {
        let snapshot = EnvSnapshot::from_pairs([
            ("TMPDIR", "/l/ssd"),
            ("CRAY_LD_LIBRARY_PATH", "/opt/cray/lib"),
            ("ROCM_PATH", "/opt/rocm"),
            ("LD_LIBRARY_PATH", "/usr/lib"),
        ]);
        let tuned = tune("tuolumne", 4, SchedulerKind::Flux, &snapshot);
        let env = &tuned.environment;
        assert_eq!(env.get("NCCL_NET_GDR_LEVEL"), Some("3"));
        assert_eq!(env.get("MIOPEN_USER_DB_PATH"), Some("/l/ssd/MIOpen_user_db"));
        assert_eq!(env.get("MIOPEN_CUSTOM_CACHE_DIR"), Some("/l/ssd/MIOpen_custom_cache"));
        assert_eq!(
            env.get("LD_LIBRARY_PATH"),
            Some("/opt/rocm/llvm/lib:/opt/cray/lib:/usr/lib")
        );
        assert!(tuned.launcher_args.is_empty());
    }

    #[test]
    fn test_el_capitan_without_tmpdir() {
        let tuned = tune("tioga", 8, SchedulerKind::Flux, &EnvSnapshot::default());
        assert_eq!(tuned.environment.get("MIOPEN_USER_DB_PATH"), Some("/tmp/MIOpen_user_db"));
        assert!(!tuned.environment.contains("LD_LIBRARY_PATH"));
    }

    #[test]
    fn test_ofi_plugin_prepended_last() {
        let snapshot = EnvSnapshot::from_pairs([("LBANN_USE_THIS_OFI_PLUGIN", "/ofi/lib")]);
        let mut request = TuningRequest::new("elcap", 4, SchedulerKind::Flux);
        request.environment.insert("LD_LIBRARY_PATH", "/mine");
        let tuned = configure(request, &snapshot).unwrap();
        assert_eq!(tuned.environment.get("LD_LIBRARY_PATH"), Some("/ofi/lib:/mine"));
    }

    #[test]
    fn test_corona() {
        let tuned = tune("corona", 8, SchedulerKind::Flux, &EnvSnapshot::default());
        assert_eq!(tuned.launcher_args, vec!["-o pmi=pmix".to_string()]);
        assert_eq!(tuned.environment.get("IBV_FORK_SAFE"), Some("1"));
        assert_eq!(tuned.environment.get("OMPI_MCA_mpi_warn_on_fork"), Some("0"));
    }

    #[test]
    fn test_snapshot_value_beats_default() {
        let snapshot = EnvSnapshot::from_pairs([("NCCL_NET_GDR_LEVEL", "1")]);
        let tuned = tune("tioga", 8, SchedulerKind::Flux, &snapshot);
        assert_eq!(tuned.environment.get("NCCL_NET_GDR_LEVEL"), Some("1"));
    }

    #[test]
    fn test_cpu_cluster_gets_only_mvapich_defaults() {
        let tuned = tune("quartz", 1, SchedulerKind::Slurm, &EnvSnapshot::default());
        assert!(tuned.launcher_args.is_empty());
        assert_eq!(tuned.environment.len(), 3);
    }

    #[test]
    fn test_every_tuned_family_has_an_entry() {
        for profile in CLUSTER_PROFILES {
            let entries = TUNING_TABLE
                .iter()
                .filter(|entry| entry.family == profile.family)
                .count();
            let expected = usize::from(profile.family != TuningFamily::Generic);
            assert_eq!(entries, expected, "{} ({:?})", profile.name, profile.family);
        }
    }

    #[test]
    fn test_family_dispatch_reaches_every_member() {
        for name in ["tioga", "rzvernal", "elcap", "tuolumne", "rzadams"] {
            let tuned = tune(name, 4, SchedulerKind::Flux, &EnvSnapshot::default());
            assert_eq!(tuned.environment.get("NCCL_NET_GDR_LEVEL"), Some("3"));
            assert_eq!(tuned.environment.get("IBV_FORK_SAFE"), None);
        }

        for name in ["sierra", "lassen", "rzansel"] {
            let tuned = tune(name, 4, SchedulerKind::Lsf, &EnvSnapshot::default());
            assert_eq!(tuned.environment.get("AL_PROGRESS_RANKS_PER_NUMA_NODE"), Some("2"));
        }
    }

    proptest! {
        #[test]
        fn prop_caller_values_never_overwritten(
            idx in 0..CLUSTER_PROFILES.len(),
            ppn in 1u32..=8,
            value in "[a-z0-9]{1,8}",
        ) {
            let profile = &CLUSTER_PROFILES[idx];
            let keys = [
                "MV2_USE_RDMA_CM",
                "AL_PROGRESS_RANKS_PER_NUMA_NODE",
                "NCCL_NET_GDR_LEVEL",
                "MIOPEN_USER_DB_PATH",
                "IBV_FORK_SAFE",
                "NVSHMEM_MPI_LIB_NAME",
            ];
            let mut request = TuningRequest::new(profile.name, ppn, profile.scheduler);
            for key in keys {
                request.environment.insert(key, &value);
            }
            let snapshot = EnvSnapshot::from_pairs([("NCCL_NET_GDR_LEVEL", "9")]);
            let tuned = configure(request, &snapshot).unwrap();
            for key in keys {
                prop_assert_eq!(tuned.environment.get(key), Some(value.as_str()));
            }
        }
    }
}
