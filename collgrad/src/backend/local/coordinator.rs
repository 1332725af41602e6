//! Name-matching coordinator of the in-process engine.
//!
//! One task owns all negotiation state. Ranks send their submissions over
//! a channel; a collective runs once every rank has either submitted under
//! its name or joined.

use std::collections::{BTreeSet, HashMap};

use tokio::sync::{mpsc, oneshot};

use crate::backend::{AllgatherRequest, AlltoallRequest, BroadcastRequest, GroupedAllreduceRequest};
use crate::types::Rank;

use super::{LocalEngineError, compute};

pub(super) type EngineOutcome = Result<(), LocalEngineError>;

/// One rank's half of a collective.
pub(super) enum Submission {
    /// Single-tensor requests travel as one-element groups.
    Allreduce {
        request: GroupedAllreduceRequest,
        grouped: bool,
    },
    Allgather(AllgatherRequest),
    Broadcast(BroadcastRequest),
    Alltoall(AlltoallRequest),
}

impl Submission {
    fn name(&self) -> &str {
        match self {
            Submission::Allreduce { request, .. } => &request.name,
            Submission::Allgather(r) => &r.name,
            Submission::Broadcast(r) => &r.name,
            Submission::Alltoall(r) => &r.name,
        }
    }

    pub(super) fn kind(&self) -> &'static str {
        match self {
            Submission::Allreduce { grouped: false, .. } => "allreduce",
            Submission::Allreduce { grouped: true, .. } => "grouped_allreduce",
            Submission::Allgather(_) => "allgather",
            Submission::Broadcast(_) => "broadcast",
            Submission::Alltoall(_) => "alltoall",
        }
    }
}

pub(super) enum Command {
    Submit {
        rank: Rank,
        submission: Submission,
        reply: oneshot::Sender<EngineOutcome>,
    },
    Join {
        rank: Rank,
        reply: oneshot::Sender<Rank>,
    },
}

struct Contribution {
    rank: Rank,
    submission: Submission,
    reply: oneshot::Sender<EngineOutcome>,
}

pub(super) struct Coordinator {
    world_size: u32,
    pending: HashMap<String, Vec<Contribution>>,
    joined: BTreeSet<Rank>,
    last_joined: Option<Rank>,
    join_waiters: Vec<oneshot::Sender<Rank>>,
}

impl Coordinator {
    pub(super) fn new(world_size: u32) -> Self {
        Self {
            world_size,
            pending: HashMap::new(),
            joined: BTreeSet::new(),
            last_joined: None,
            join_waiters: Vec::new(),
        }
    }

    pub(super) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = commands.recv().await {
            match command {
                Command::Submit {
                    rank,
                    submission,
                    reply,
                } => self.submit(rank, submission, reply),
                Command::Join { rank, reply } => self.join(rank, reply),
            }
        }
        tracing::debug!(
            pending = self.pending.len(),
            "local engine: all backends dropped, coordinator exiting"
        );
    }

    fn submit(
        &mut self,
        rank: Rank,
        submission: Submission,
        reply: oneshot::Sender<EngineOutcome>,
    ) {
        let name = submission.name().to_string();
        if self.joined.contains(&rank) {
            let _ = reply.send(Err(LocalEngineError::AlreadyJoined { rank, name }));
            return;
        }
        let contributions = self.pending.entry(name.clone()).or_default();
        if contributions.iter().any(|c| c.rank == rank) {
            let _ = reply.send(Err(LocalEngineError::DuplicateSubmission { rank, name }));
            return;
        }
        tracing::trace!(rank, collective = %name, kind = submission.kind(), "local engine: submission");
        contributions.push(Contribution {
            rank,
            submission,
            reply,
        });
        self.try_complete(&name);
    }

    fn join(&mut self, rank: Rank, reply: oneshot::Sender<Rank>) {
        if self.joined.insert(rank) {
            self.last_joined = Some(rank);
        }
        self.join_waiters.push(reply);
        tracing::debug!(
            rank,
            joined = self.joined.len(),
            world_size = self.world_size,
            "local engine: rank joined"
        );

        // Collectives that were only waiting on this rank can run now.
        let names: Vec<String> = self.pending.keys().cloned().collect();
        for name in names {
            self.try_complete(&name);
        }

        if self.joined.len() == self.world_size as usize {
            let last = self.last_joined.unwrap_or(rank);
            for waiter in self.join_waiters.drain(..) {
                let _ = waiter.send(last);
            }
            self.joined.clear();
            self.last_joined = None;
        }
    }

    fn is_ready(&self, contributions: &[Contribution]) -> bool {
        let active = contributions
            .iter()
            .filter(|c| !self.joined.contains(&c.rank))
            .count();
        active + self.joined.len() >= self.world_size as usize
    }

    fn try_complete(&mut self, name: &str) {
        let ready = self.pending.get(name).is_some_and(|c| self.is_ready(c));
        if !ready {
            return;
        }
        let Some(mut contributions) = self.pending.remove(name) else {
            return;
        };
        contributions.sort_by_key(|c| c.rank);

        let outcome = self.execute(name, &contributions);
        if let Err(e) = &outcome {
            tracing::warn!(collective = name, error = %e, "local engine: collective failed");
        }
        for c in contributions {
            let _ = c.reply.send(outcome.clone());
        }
    }

    fn execute(&self, name: &str, contributions: &[Contribution]) -> EngineOutcome {
        let Some(first) = contributions.first() else {
            return Ok(());
        };
        let operation = first.submission.kind();
        if let Some(odd) = contributions
            .iter()
            .find(|c| c.submission.kind() != operation)
        {
            return Err(LocalEngineError::CollectiveFailed {
                operation,
                name: name.to_string(),
                reason: format!(
                    "rank {} submitted {} under the same name",
                    odd.rank,
                    odd.submission.kind()
                ),
            });
        }

        let result = match &first.submission {
            Submission::Allreduce { .. } => {
                let parts: Vec<_> = contributions
                    .iter()
                    .filter_map(|c| match &c.submission {
                        Submission::Allreduce { request, .. } => Some((c.rank, request)),
                        _ => None,
                    })
                    .collect();
                compute::allreduce(&parts, self.world_size)
            }
            Submission::Allgather(_) => {
                let parts: Vec<_> = contributions
                    .iter()
                    .filter_map(|c| match &c.submission {
                        Submission::Allgather(r) => Some((c.rank, r)),
                        _ => None,
                    })
                    .collect();
                compute::allgather(&parts)
            }
            Submission::Broadcast(_) => {
                let parts: Vec<_> = contributions
                    .iter()
                    .filter_map(|c| match &c.submission {
                        Submission::Broadcast(r) => Some((c.rank, r)),
                        _ => None,
                    })
                    .collect();
                compute::broadcast(&parts)
            }
            Submission::Alltoall(_) => {
                let parts: Vec<_> = contributions
                    .iter()
                    .filter_map(|c| match &c.submission {
                        Submission::Alltoall(r) => Some((c.rank, r)),
                        _ => None,
                    })
                    .collect();
                compute::alltoall(&parts, self.world_size)
            }
        };

        result.map_err(|reason| LocalEngineError::CollectiveFailed {
            operation,
            name: name.to_string(),
            reason,
        })
    }
}
