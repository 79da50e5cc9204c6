//! Runtime environment for distconv spatial parallelism

use super::environment::{BatchEnvironment, EnvSnapshot};

/// Default distconv runtime settings
pub fn distconv_environment(num_io_partitions: u32) -> BatchEnvironment {
    let mut env = BatchEnvironment::new();
    env.insert("LBANN_DISTCONV_HALO_EXCHANGE", "HYBRID");
    env.insert("LBANN_DISTCONV_TENSOR_SHUFFLER", "HYBRID");
    env.insert("LBANN_DISTCONV_CONVOLUTION_FWD_ALGORITHM", "AUTOTUNE");
    env.insert("LBANN_DISTCONV_CONVOLUTION_BWD_DATA_ALGORITHM", "AUTOTUNE");
    env.insert("LBANN_DISTCONV_CONVOLUTION_BWD_FILTER_ALGORITHM", "AUTOTUNE");
    env.insert("LBANN_DISTCONV_RANK_STRIDE", 1);
    env.insert("LBANN_DISTCONV_COSMOFLOW_PARALLEL_IO", "False");
    env.insert("LBANN_DISTCONV_NUM_IO_PARTITIONS", num_io_partitions);
    env.insert("LBANN_INIT_NVSHMEM", "False");
    env
}

/// Settings for DaCe JIT-compiled distconv kernels
///
/// The kernel cache defaults to `DaCe_kernels/.dacecache` next to the
/// application.
pub fn dace_environment(application_dir: &str, snapshot: &EnvSnapshot) -> BatchEnvironment {
    let mut env = BatchEnvironment::new();
    env.set_if_absent("DISTCONV_JIT_VERBOSE", 1, snapshot);
    env.set_if_absent(
        "DISTCONV_JIT_CACHEPATH",
        format!("{}/DaCe_kernels/.dacecache", application_dir),
        snapshot,
    );
    env
}
