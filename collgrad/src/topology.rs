//! Topology and build-capability facts the collective layer consumes.
//!
//! These are process-lifetime constants owned by whatever bootstraps the
//! run. Every rank must observe the same values, since the divisor policy
//! derives the op actually submitted from them.

use crate::types::Rank;

/// Read-only cluster topology and engine build facts.
pub trait Topology: Send + Sync {
    /// This process's rank.
    fn rank(&self) -> Rank;

    /// This process's rank among the ranks on its node.
    fn local_rank(&self) -> Rank;

    /// Total rank count.
    fn world_size(&self) -> u32;

    /// Rank count on this node.
    fn local_size(&self) -> u32;

    /// True if every node runs the same number of ranks.
    fn is_homogeneous(&self) -> bool;

    /// True if accelerator devices are usable by this process.
    fn gpu_transport_available(&self) -> bool;

    /// True if the accelerator build cannot average natively, so the
    /// framework layer has to divide.
    fn accelerator_needs_framework_averaging(&self) -> bool;

    /// True if the engine was built with a GPU-aware transport.
    fn gpu_aware_transport_built(&self) -> bool;

    /// True if the engine was built with accelerator tensor support.
    fn accelerator_built(&self) -> bool;
}

/// Fixed topology, typically filled in once by the bootstrap component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticTopology {
    pub rank: Rank,
    pub local_rank: Rank,
    pub world_size: u32,
    pub local_size: u32,
    pub homogeneous: bool,
    pub gpu_available: bool,
    pub framework_averaging: bool,
    pub gpu_aware_transport: bool,
    pub accelerator: bool,
}

impl StaticTopology {
    /// Single-node, host-only topology for `rank` of `world_size`.
    pub fn host_only(rank: Rank, world_size: u32) -> Self {
        Self {
            rank,
            local_rank: rank,
            world_size,
            local_size: world_size,
            homogeneous: true,
            gpu_available: false,
            framework_averaging: false,
            gpu_aware_transport: false,
            accelerator: false,
        }
    }

    /// Spread ranks over nodes of `local_size` ranks each.
    pub fn with_local_size(mut self, local_size: u32) -> Self {
        let local_size = local_size.max(1);
        self.local_size = local_size;
        self.local_rank = self.rank % local_size;
        self
    }

    /// Accelerator build; `gpu_aware_transport` selects whether collectives
    /// on device memory go through a GPU-aware transport.
    pub fn with_accelerator(mut self, gpu_aware_transport: bool) -> Self {
        self.accelerator = true;
        self.gpu_available = true;
        self.gpu_aware_transport = gpu_aware_transport;
        self
    }

    /// Accelerator build whose reductions cannot average natively.
    pub fn with_framework_averaging(mut self) -> Self {
        self.framework_averaging = true;
        self
    }

    pub fn heterogeneous(mut self) -> Self {
        self.homogeneous = false;
        self
    }

    /// Same facts seen from another rank.
    pub fn for_rank(&self, rank: Rank) -> Self {
        Self {
            rank,
            local_rank: rank % self.local_size.max(1),
            ..self.clone()
        }
    }
}

impl Topology for StaticTopology {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn local_rank(&self) -> Rank {
        self.local_rank
    }

    fn world_size(&self) -> u32 {
        self.world_size
    }

    fn local_size(&self) -> u32 {
        self.local_size
    }

    fn is_homogeneous(&self) -> bool {
        self.homogeneous
    }

    fn gpu_transport_available(&self) -> bool {
        self.gpu_available
    }

    fn accelerator_needs_framework_averaging(&self) -> bool {
        self.framework_averaging
    }

    fn gpu_aware_transport_built(&self) -> bool {
        self.gpu_aware_transport
    }

    fn accelerator_built(&self) -> bool {
        self.accelerator
    }
}
