//! Boundary to the native communication engine.
//!
//! The engine owns cross-process negotiation, fusion and transport. This
//! crate only decides what to submit: it resolves the tensor category, the
//! effective op and divisor, and hands the engine ready-to-run requests. The
//! engine answers with an opaque [`Handle`] and completes the operation on
//! its own execution context.

pub mod local;

use crate::error::BackendError;
use crate::tensor::Tensor;
use crate::types::{Device, Handle, Rank, ReduceOp, TensorCategory};

pub use local::{LocalBackend, LocalCluster, LocalEngineError};

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Reduce one tensor across all ranks into `output`.
#[derive(Debug, Clone)]
pub struct AllreduceRequest {
    pub input: Tensor,
    pub output: Tensor,
    /// The engine divides the reduced result by this value.
    pub divisor: u32,
    pub name: String,
    pub op: ReduceOp,
    pub prescale: f64,
    pub postscale: f64,
}

/// Reduce a list of tensors under one operation name, position by position.
#[derive(Debug, Clone)]
pub struct GroupedAllreduceRequest {
    pub inputs: Vec<Tensor>,
    pub outputs: Vec<Tensor>,
    pub divisor: u32,
    pub name: String,
    pub op: ReduceOp,
    pub prescale: f64,
    pub postscale: f64,
}

/// Concatenate every rank's `input` along axis 0 into `output`.
#[derive(Debug, Clone)]
pub struct AllgatherRequest {
    pub input: Tensor,
    pub output: Tensor,
    pub name: String,
}

/// Copy `root`'s `input` into every rank's `output`.
#[derive(Debug, Clone)]
pub struct BroadcastRequest {
    pub input: Tensor,
    pub output: Tensor,
    pub root: Rank,
    pub name: String,
}

/// Exchange axis-0 slices of `input` between all ranks.
#[derive(Debug, Clone)]
pub struct AlltoallRequest {
    pub input: Tensor,
    /// I32 host tensor with one row count per destination rank; empty means
    /// an equal split.
    pub splits: Tensor,
    pub output: Tensor,
    pub name: String,
}

/// A native communication engine.
///
/// Submissions never block. The engine writes results into the request's
/// output tensors before it reports the handle complete.
pub trait CommBackend: Send + Sync {
    fn submit_allreduce(
        &self,
        category: TensorCategory,
        request: AllreduceRequest,
    ) -> BackendResult<Handle>;

    fn submit_grouped_allreduce(
        &self,
        category: TensorCategory,
        request: GroupedAllreduceRequest,
    ) -> BackendResult<Handle>;

    fn submit_allgather(
        &self,
        category: TensorCategory,
        request: AllgatherRequest,
    ) -> BackendResult<Handle>;

    fn submit_broadcast(
        &self,
        category: TensorCategory,
        request: BroadcastRequest,
    ) -> BackendResult<Handle>;

    fn submit_alltoall(
        &self,
        category: TensorCategory,
        request: AlltoallRequest,
    ) -> BackendResult<Handle>;

    /// Non-blocking completion check.
    fn poll(&self, handle: Handle) -> BackendResult<bool>;

    /// Block until `handle` completes, then release it. A failed collective
    /// is reported here.
    fn wait_and_release(&self, handle: Handle) -> BackendResult<()>;

    /// Announce that this rank has no more collectives to contribute and
    /// block until every rank has done the same. Returns the last rank to
    /// join.
    fn join(&self, device: Device) -> BackendResult<Rank>;
}
