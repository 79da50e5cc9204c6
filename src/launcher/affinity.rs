//! CPU affinity derivations for launcher flags

use crate::error::{LaunchError, Result};

/// Cores per socket used for binding on Sierra-class nodes
///
/// The hardware has 22, but power-of-two counts perform better.
pub const SIERRA_CORES_PER_SOCKET: u32 = 16;

/// Per-process CPU masks for Pascal nodes
///
/// Both GPUs sit on socket 0, so every process is packed onto that socket.
/// Each mask covers `cores_per_proc` physical cores plus their hyperthread
/// siblings, which are numbered `2 * cores_per_socket` higher.
pub fn pascal_cpu_masks(cores_per_node: u32, procs_per_node: u32) -> Result<Vec<u128>> {
    if procs_per_node == 0 {
        return Err(LaunchError::InvalidTopology(
            "processes per node must be at least 1".to_string(),
        ));
    }
    let cores_per_socket = cores_per_node / 2;
    let cores_per_proc = cores_per_socket / procs_per_node;
    if cores_per_proc == 0 {
        return Err(LaunchError::InvalidTopology(format!(
            "{} processes do not fit on {} cores per socket",
            procs_per_node, cores_per_socket
        )));
    }
    let highest_bit = 2 * cores_per_socket + cores_per_proc * procs_per_node;
    if highest_bit > u128::BITS {
        return Err(LaunchError::InvalidTopology(format!(
            "CPU mask needs {} bits",
            highest_bit
        )));
    }

    let ones = (1u128 << cores_per_proc) - 1;
    let mut masks = Vec::with_capacity(procs_per_node as usize);
    masks.push(ones | (ones << (2 * cores_per_socket)));
    while masks.len() < procs_per_node as usize {
        let next = masks[masks.len() - 1] << cores_per_proc;
        masks.push(next);
    }
    Ok(masks)
}

/// Format masks as a Slurm `--cpu_bind` flag
pub fn slurm_mask_flag(masks: &[u128]) -> String {
    let joined = masks
        .iter()
        .map(|m| format!("{:#x}", m))
        .collect::<Vec<_>>()
        .join(",");
    format!("--cpu_bind=mask_cpu:{}", joined)
}

/// Packed binding on Sierra-class nodes: `(procs_per_socket, cores_per_proc)`
pub fn sierra_packed_binding(procs_per_node: u32) -> (u32, u32) {
    let procs_per_socket = (procs_per_node + 1) / 2;
    let cores_per_proc = (SIERRA_CORES_PER_SOCKET / procs_per_socket.max(1)).max(1);
    (procs_per_socket, cores_per_proc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pascal_two_procs() {
        let masks = pascal_cpu_masks(36, 2).unwrap();
        assert_eq!(masks, vec![0x1ff0000001ff, 0x3fe0000003fe00]);
        assert_eq!(
            slurm_mask_flag(&masks),
            "--cpu_bind=mask_cpu:0x1ff0000001ff,0x3fe0000003fe00"
        );
    }

    #[test]
    fn test_pascal_single_proc_uses_whole_socket() {
        let masks = pascal_cpu_masks(36, 1).unwrap();
        let ones = (1u128 << 18) - 1;
        assert_eq!(masks, vec![ones | (ones << 36)]);
    }

    #[test]
    fn test_pascal_rejects_bad_topology() {
        assert!(pascal_cpu_masks(36, 0).is_err());
        assert!(pascal_cpu_masks(36, 19).is_err());
    }

    #[test]
    fn test_masks_do_not_overlap() {
        let masks = pascal_cpu_masks(36, 4).unwrap();
        for (i, a) in masks.iter().enumerate() {
            for b in &masks[i + 1..] {
                assert_eq!(a & b, 0);
            }
        }
    }

    #[test]
    fn test_sierra_binding() {
        assert_eq!(sierra_packed_binding(4), (2, 8));
        assert_eq!(sierra_packed_binding(1), (1, 16));
        assert_eq!(sierra_packed_binding(3), (2, 8));
    }
}
