use std::sync::Arc;

use crate::backend::CommBackend;
use crate::collective::{CapabilityTable, Dispatcher, HandleTable, NameGenerator};
use crate::config::CollConfig;
use crate::error::{CollError, Result};
use crate::tensor::Tensor;
use crate::topology::Topology;
use crate::types::{Device, Handle, Rank};

/// Result of a synchronized collective.
#[derive(Debug, Clone)]
pub enum CollectiveOutput {
    Single(Tensor),
    /// Grouped reductions produce one output per input, in order.
    Group(Vec<Tensor>),
}

impl CollectiveOutput {
    pub fn into_single(self) -> Result<Tensor> {
        match self {
            CollectiveOutput::Single(t) => Ok(t),
            CollectiveOutput::Group(g) => Err(CollError::UnexpectedOutput {
                operation: "into_single",
                reason: format!("expected one tensor, got a group of {}", g.len()),
            }),
        }
    }

    pub fn into_group(self) -> Result<Vec<Tensor>> {
        match self {
            CollectiveOutput::Group(g) => Ok(g),
            CollectiveOutput::Single(_) => Err(CollError::UnexpectedOutput {
                operation: "into_group",
                reason: "expected a group, got a single tensor".into(),
            }),
        }
    }
}

/// Process-wide communication context.
///
/// Owns the handle table and the capability table, and submits every
/// collective of this rank to the engine. Submissions return a [`Handle`]
/// immediately; [`synchronize`](Self::synchronize) and
/// [`join`](Self::join) are the only blocking calls. They must not be
/// called from inside an async task.
pub struct CollectiveClient {
    backend: Arc<dyn CommBackend>,
    topology: Arc<dyn Topology>,
    capabilities: CapabilityTable,
    pub(super) handles: HandleTable,
    names: NameGenerator,
    pub(super) config: CollConfig,
}

impl CollectiveClient {
    pub fn new(
        backend: Arc<dyn CommBackend>,
        topology: Arc<dyn Topology>,
        config: CollConfig,
    ) -> Self {
        let capabilities = CapabilityTable::from_topology(topology.as_ref());
        let names = NameGenerator::new(config.name_scope.as_deref());
        Self {
            backend,
            topology,
            capabilities,
            handles: HandleTable::new(),
            names,
            config,
        }
    }

    /// Replace the capability table derived from the topology.
    pub fn with_capabilities(mut self, capabilities: CapabilityTable) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn config(&self) -> &CollConfig {
        &self.config
    }

    pub fn capabilities(&self) -> &CapabilityTable {
        &self.capabilities
    }

    pub fn topology(&self) -> &dyn Topology {
        self.topology.as_ref()
    }

    /// Number of operations submitted but not yet synchronized.
    pub fn pending(&self) -> Result<usize> {
        self.handles.len()
    }

    // ── topology passthroughs ──

    pub fn rank(&self) -> Rank {
        self.topology.rank()
    }

    pub fn local_rank(&self) -> Rank {
        self.topology.local_rank()
    }

    pub fn size(&self) -> u32 {
        self.topology.world_size()
    }

    pub fn local_size(&self) -> u32 {
        self.topology.local_size()
    }

    pub fn is_homogeneous(&self) -> bool {
        self.topology.is_homogeneous()
    }

    pub fn accelerator_built(&self) -> bool {
        self.topology.accelerator_built()
    }

    pub fn gpu_aware_transport_built(&self) -> bool {
        self.topology.gpu_aware_transport_built()
    }

    pub(super) fn dispatcher(&self) -> Dispatcher<'_> {
        Dispatcher::new(self.backend.as_ref(), &self.capabilities)
    }

    pub(super) fn op_name(&self, kind: &'static str, name: Option<&str>) -> String {
        self.names.resolve(kind, name)
    }

    // ── completion ──

    /// True if `handle` has completed, so [`synchronize`](Self::synchronize)
    /// will not block. Handles without an entry count as complete.
    pub fn poll(&self, handle: Handle) -> Result<bool> {
        if !self.handles.contains(handle)? {
            return Ok(true);
        }
        self.backend
            .poll(handle)
            .map_err(|e| CollError::internal_with_source(format!("poll of {handle} failed"), e))
    }

    /// Block until `handle` completes and return its output.
    ///
    /// Returns `Ok(None)` if the handle was already synchronized. The entry
    /// is released even when the collective failed; the failure comes back
    /// as [`CollError::Internal`].
    pub fn synchronize(&self, handle: Handle) -> Result<Option<CollectiveOutput>> {
        let Some(entry) = self.handles.consume(handle)? else {
            tracing::trace!(%handle, "synchronize: handle already consumed");
            return Ok(None);
        };
        self.backend.wait_and_release(handle).map_err(|e| {
            CollError::internal_with_source(format!("collective {handle} failed"), e)
        })?;

        if entry.grouped {
            return Ok(Some(CollectiveOutput::Group(entry.outputs)));
        }
        let output = entry
            .outputs
            .into_iter()
            .next()
            .ok_or_else(|| CollError::internal(format!("entry for {handle} holds no output")))?;
        Ok(Some(CollectiveOutput::Single(output)))
    }

    /// Declare that this rank has no more collectives to submit and block
    /// until every rank has joined. Returns the last rank to join.
    pub fn join(&self, device: Device) -> Result<Rank> {
        tracing::debug!(rank = self.rank(), %device, "joining");
        let last = self
            .backend
            .join(device)
            .map_err(|e| CollError::internal_with_source("join failed", e))?;
        tracing::debug!(rank = self.rank(), last_joined = last, "join complete");
        Ok(last)
    }

    /// Forget every pending operation and restart name generation.
    ///
    /// Used on shutdown. Returns how many entries were discarded.
    pub fn reset(&self) -> Result<usize> {
        let dropped = self.handles.clear()?;
        self.names.reset();
        if dropped > 0 {
            tracing::warn!(rank = self.rank(), dropped, "reset discarded pending collectives");
        }
        Ok(dropped)
    }
}
