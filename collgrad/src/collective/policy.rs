//! Divisor and op selection for reductions.
//!
//! `Average` and `Adasum` are rewritten here into what the engine actually
//! runs. The result depends only on the requested op, the tensor's memory
//! space and the topology facts, so every rank resolves the same plan for
//! the same logical call.

use crate::config::CollConfig;
use crate::error::{CollError, Result};
use crate::topology::Topology;
use crate::types::{Device, ReduceOp};

/// Effective op and divisor for one reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReductionPlan {
    pub op: ReduceOp,
    pub divisor: u32,
    /// Accelerator Adasum was demoted to the host-capable path.
    pub host_fallback: bool,
}

impl ReductionPlan {
    fn unchanged(op: ReduceOp) -> Self {
        Self {
            op,
            divisor: 1,
            host_fallback: false,
        }
    }
}

/// Resolve `requested` for a tensor on `device`.
///
/// Fails with a capability error when the topology cannot run the op.
/// Grouped reductions resolve once, using their first tensor's device.
pub fn resolve(
    requested: ReduceOp,
    device: Device,
    topology: &dyn Topology,
    config: &CollConfig,
    name: &str,
) -> Result<ReductionPlan> {
    match requested {
        ReduceOp::Average => {
            if topology.accelerator_needs_framework_averaging() {
                Ok(ReductionPlan {
                    op: ReduceOp::Sum,
                    divisor: topology.world_size(),
                    host_fallback: false,
                })
            } else {
                Ok(ReductionPlan::unchanged(ReduceOp::Average))
            }
        }
        ReduceOp::Adasum => resolve_adasum(device, topology, config, name),
        other => Ok(ReductionPlan::unchanged(other)),
    }
}

fn resolve_adasum(
    device: Device,
    topology: &dyn Topology,
    config: &CollConfig,
    name: &str,
) -> Result<ReductionPlan> {
    let on_accelerator = !device.is_cpu() && topology.gpu_transport_available();

    if on_accelerator && topology.gpu_aware_transport_built() {
        if !topology.is_homogeneous() {
            return Err(CollError::HeterogeneousAdasum);
        }
        let nodes = topology.world_size() / topology.local_size().max(1);
        if !nodes.is_power_of_two() {
            return Err(CollError::NonPowerOfTwoNodes { nodes });
        }
        let divisor = if topology.accelerator_needs_framework_averaging() {
            topology.local_size()
        } else {
            1
        };
        return Ok(ReductionPlan {
            op: ReduceOp::Adasum,
            divisor,
            host_fallback: false,
        });
    }

    if on_accelerator {
        if config.strict_gpu_adasum {
            return Err(CollError::AdasumGpuTransportMissing);
        }
        tracing::warn!(
            collective = name,
            %device,
            "adasum on accelerator tensors without a GPU-aware transport; \
             reducing through the host path, which may be slower"
        );
    }

    let ranks = topology.world_size();
    if !ranks.is_power_of_two() {
        return Err(CollError::NonPowerOfTwoRanks { ranks });
    }
    Ok(ReductionPlan {
        op: ReduceOp::Adasum,
        divisor: 1,
        host_fallback: on_accelerator,
    })
}
