//! In-process reference engine.
//!
//! [`LocalCluster`] simulates `world_size` ranks inside one process: each
//! rank gets its own [`LocalBackend`], and a coordinator task on a private
//! tokio runtime matches submissions by operation name and runs them once
//! every rank has contributed (or joined). Useful for tests and for
//! single-host experiments; a production deployment plugs a real engine in
//! behind [`CommBackend`].

mod compute;
mod coordinator;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::runtime::Runtime;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};

use crate::client::CollectiveClient;
use crate::config::CollConfig;
use crate::error::{CollError, Result};
use crate::topology::{StaticTopology, Topology};
use crate::types::{Device, Handle, Rank, TensorCategory};

use super::{
    AllgatherRequest, AllreduceRequest, AlltoallRequest, BackendResult, BroadcastRequest,
    CommBackend, GroupedAllreduceRequest,
};
use coordinator::{Command, Coordinator, EngineOutcome, Submission};

/// Failures reported by the in-process engine.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LocalEngineError {
    #[error("local engine has shut down")]
    Shutdown,

    #[error("unknown handle {0}")]
    UnknownHandle(Handle),

    #[error("rank {rank} submitted '{name}' after joining")]
    AlreadyJoined { rank: Rank, name: String },

    #[error("rank {rank} submitted '{name}' twice")]
    DuplicateSubmission { rank: Rank, name: String },

    #[error("{operation} '{name}' failed: {reason}")]
    CollectiveFailed {
        operation: &'static str,
        name: String,
        reason: String,
    },

    #[error("local engine state lock poisoned")]
    LockPoisoned,
}

/// A simulated cluster of `world_size` ranks sharing one engine.
pub struct LocalCluster {
    topology: StaticTopology,
    commands: mpsc::UnboundedSender<Command>,
    runtime: Arc<Runtime>,
}

impl LocalCluster {
    /// Host-only, single-node cluster.
    pub fn new(world_size: u32) -> Result<Self> {
        Self::with_topology(StaticTopology::host_only(0, world_size))
    }

    /// Cluster whose ranks report `topology` (re-ranked per client).
    pub fn with_topology(topology: StaticTopology) -> Result<Self> {
        if topology.world_size == 0 {
            return Err(CollError::InvalidRank {
                rank: 0,
                world_size: 0,
            });
        }
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("collgrad-local-engine")
            .build()
            .map_err(|e| CollError::internal_with_source("failed to start local engine", e.into()))?;

        let (commands, rx) = mpsc::unbounded_channel();
        runtime.spawn(Coordinator::new(topology.world_size).run(rx));
        tracing::debug!(world_size = topology.world_size, "local engine started");

        Ok(Self {
            topology,
            commands,
            runtime: Arc::new(runtime),
        })
    }

    pub fn world_size(&self) -> u32 {
        self.topology.world_size
    }

    /// Topology as seen by `rank`.
    pub fn topology(&self, rank: Rank) -> StaticTopology {
        self.topology.for_rank(rank)
    }

    /// Engine endpoint for one rank.
    pub fn backend(&self, rank: Rank) -> Result<LocalBackend> {
        if rank >= self.world_size() {
            return Err(CollError::InvalidRank {
                rank,
                world_size: self.world_size(),
            });
        }
        Ok(LocalBackend {
            rank,
            commands: self.commands.clone(),
            next_handle: AtomicU64::new(0),
            inflight: Mutex::new(HashMap::new()),
            _runtime: Arc::clone(&self.runtime),
        })
    }

    /// Client for one rank.
    pub fn client(&self, rank: Rank, config: CollConfig) -> Result<CollectiveClient> {
        let backend = Arc::new(self.backend(rank)?);
        let topology: Arc<dyn Topology> = Arc::new(self.topology(rank));
        Ok(CollectiveClient::new(backend, topology, config))
    }

    /// One client per rank, in rank order.
    pub fn clients(&self, config: CollConfig) -> Result<Vec<CollectiveClient>> {
        (0..self.world_size())
            .map(|rank| self.client(rank, config.clone()))
            .collect()
    }
}

enum Completion {
    Pending(oneshot::Receiver<EngineOutcome>),
    Done(EngineOutcome),
}

/// One rank's endpoint into a [`LocalCluster`].
///
/// Handles are only meaningful to the endpoint that issued them.
pub struct LocalBackend {
    rank: Rank,
    commands: mpsc::UnboundedSender<Command>,
    next_handle: AtomicU64,
    inflight: Mutex<HashMap<Handle, Completion>>,
    // Keeps the coordinator alive for as long as any endpoint exists.
    _runtime: Arc<Runtime>,
}

impl LocalBackend {
    pub fn rank(&self) -> Rank {
        self.rank
    }

    fn inflight(&self) -> std::result::Result<MutexGuard<'_, HashMap<Handle, Completion>>, LocalEngineError> {
        self.inflight
            .lock()
            .map_err(|_| LocalEngineError::LockPoisoned)
    }

    fn submit(&self, category: TensorCategory, submission: Submission) -> BackendResult<Handle> {
        let handle = Handle(self.next_handle.fetch_add(1, Ordering::Relaxed) + 1);
        let kind = submission.kind();
        let (reply, done) = oneshot::channel();
        self.commands
            .send(Command::Submit {
                rank: self.rank,
                submission,
                reply,
            })
            .map_err(|_| LocalEngineError::Shutdown)?;
        self.inflight()?.insert(handle, Completion::Pending(done));
        tracing::trace!(rank = self.rank, %handle, %category, kind, "local engine: queued");
        Ok(handle)
    }
}

impl CommBackend for LocalBackend {
    fn submit_allreduce(
        &self,
        category: TensorCategory,
        request: AllreduceRequest,
    ) -> BackendResult<Handle> {
        let request = GroupedAllreduceRequest {
            inputs: vec![request.input],
            outputs: vec![request.output],
            divisor: request.divisor,
            name: request.name,
            op: request.op,
            prescale: request.prescale,
            postscale: request.postscale,
        };
        self.submit(
            category,
            Submission::Allreduce {
                request,
                grouped: false,
            },
        )
    }

    fn submit_grouped_allreduce(
        &self,
        category: TensorCategory,
        request: GroupedAllreduceRequest,
    ) -> BackendResult<Handle> {
        self.submit(
            category,
            Submission::Allreduce {
                request,
                grouped: true,
            },
        )
    }

    fn submit_allgather(
        &self,
        category: TensorCategory,
        request: AllgatherRequest,
    ) -> BackendResult<Handle> {
        self.submit(category, Submission::Allgather(request))
    }

    fn submit_broadcast(
        &self,
        category: TensorCategory,
        request: BroadcastRequest,
    ) -> BackendResult<Handle> {
        self.submit(category, Submission::Broadcast(request))
    }

    fn submit_alltoall(
        &self,
        category: TensorCategory,
        request: AlltoallRequest,
    ) -> BackendResult<Handle> {
        self.submit(category, Submission::Alltoall(request))
    }

    fn poll(&self, handle: Handle) -> BackendResult<bool> {
        let mut inflight = self.inflight()?;
        let completion = inflight
            .get_mut(&handle)
            .ok_or(LocalEngineError::UnknownHandle(handle))?;
        let done = match completion {
            Completion::Done(_) => return Ok(true),
            Completion::Pending(rx) => match rx.try_recv() {
                Ok(outcome) => outcome,
                Err(TryRecvError::Empty) => return Ok(false),
                Err(TryRecvError::Closed) => Err(LocalEngineError::Shutdown),
            },
        };
        *completion = Completion::Done(done);
        Ok(true)
    }

    fn wait_and_release(&self, handle: Handle) -> BackendResult<()> {
        // The guard is released before blocking.
        let completion = self
            .inflight()?
            .remove(&handle)
            .ok_or(LocalEngineError::UnknownHandle(handle))?;
        let outcome = match completion {
            Completion::Done(outcome) => outcome,
            Completion::Pending(rx) => rx
                .blocking_recv()
                .unwrap_or(Err(LocalEngineError::Shutdown)),
        };
        Ok(outcome?)
    }

    fn join(&self, device: Device) -> BackendResult<Rank> {
        let (reply, done) = oneshot::channel();
        self.commands
            .send(Command::Join {
                rank: self.rank,
                reply,
            })
            .map_err(|_| LocalEngineError::Shutdown)?;
        tracing::debug!(rank = self.rank, %device, "waiting for every rank to join");
        let last = done.blocking_recv().map_err(|_| LocalEngineError::Shutdown)?;
        Ok(last)
    }
}
