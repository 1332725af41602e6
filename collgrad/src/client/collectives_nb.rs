//! Non-blocking submissions. Each returns the engine handle as soon as the
//! request is queued; the operands stay referenced by the handle table until
//! the handle is synchronized.

use crate::backend::{
    AllgatherRequest, AllreduceRequest, AlltoallRequest, BroadcastRequest,
    GroupedAllreduceRequest,
};
use crate::collective::{PendingOperation, resolve_reduction};
use crate::error::{CollError, Result};
use crate::tensor::Tensor;
use crate::types::{Handle, Rank};

use super::{CollectiveClient, ReduceOptions};

impl CollectiveClient {
    /// Reduce `tensor` across all ranks into a new output tensor.
    pub fn allreduce_async(&self, tensor: &Tensor, opts: &ReduceOptions) -> Result<Handle> {
        let output = tensor.zeros_like()?;
        self.submit_allreduce(tensor, output, opts)
    }

    /// In-place variant of [`allreduce_async`](Self::allreduce_async).
    pub fn allreduce_async_(&self, tensor: &Tensor, opts: &ReduceOptions) -> Result<Handle> {
        self.submit_allreduce(tensor, tensor.clone(), opts)
    }

    fn submit_allreduce(
        &self,
        tensor: &Tensor,
        output: Tensor,
        opts: &ReduceOptions,
    ) -> Result<Handle> {
        let name = self.op_name("allreduce", opts.name.as_deref());
        let requested = opts.op.unwrap_or(self.config.default_op);
        let plan = resolve_reduction(
            requested,
            tensor.device()?,
            self.topology(),
            &self.config,
            &name,
        )?;

        let handle = self.dispatcher().allreduce(AllreduceRequest {
            input: tensor.clone(),
            output: output.clone(),
            divisor: plan.divisor,
            name: name.clone(),
            op: plan.op,
            prescale: opts.prescale,
            postscale: opts.postscale,
        })?;
        self.handles
            .register(handle, PendingOperation::single(tensor.clone(), output))?;
        tracing::debug!(
            rank = self.rank(),
            %handle,
            collective = %name,
            op = %plan.op,
            divisor = plan.divisor,
            host_fallback = plan.host_fallback,
            "allreduce submitted"
        );
        Ok(handle)
    }

    /// Reduce a list of tensors under one name, position by position.
    pub fn grouped_allreduce_async(
        &self,
        tensors: &[Tensor],
        opts: &ReduceOptions,
    ) -> Result<Handle> {
        let outputs = tensors
            .iter()
            .map(Tensor::zeros_like)
            .collect::<Result<Vec<_>>>()?;
        self.submit_grouped_allreduce(tensors, outputs, opts)
    }

    /// In-place variant of [`grouped_allreduce_async`](Self::grouped_allreduce_async).
    pub fn grouped_allreduce_async_(
        &self,
        tensors: &[Tensor],
        opts: &ReduceOptions,
    ) -> Result<Handle> {
        self.submit_grouped_allreduce(tensors, tensors.to_vec(), opts)
    }

    fn submit_grouped_allreduce(
        &self,
        tensors: &[Tensor],
        outputs: Vec<Tensor>,
        opts: &ReduceOptions,
    ) -> Result<Handle> {
        let first = tensors.first().ok_or(CollError::EmptyGroup {
            operation: "grouped_allreduce",
        })?;
        let name = self.op_name("grouped_allreduce", opts.name.as_deref());
        let requested = opts.op.unwrap_or(self.config.default_op);
        let plan = resolve_reduction(
            requested,
            first.device()?,
            self.topology(),
            &self.config,
            &name,
        )?;

        let handle = self.dispatcher().grouped_allreduce(GroupedAllreduceRequest {
            inputs: tensors.to_vec(),
            outputs: outputs.clone(),
            divisor: plan.divisor,
            name: name.clone(),
            op: plan.op,
            prescale: opts.prescale,
            postscale: opts.postscale,
        })?;
        self.handles
            .register(handle, PendingOperation::group(tensors.to_vec(), outputs))?;
        tracing::debug!(
            rank = self.rank(),
            %handle,
            collective = %name,
            tensors = tensors.len(),
            op = %plan.op,
            divisor = plan.divisor,
            host_fallback = plan.host_fallback,
            "grouped allreduce submitted"
        );
        Ok(handle)
    }

    /// Concatenate every rank's `tensor` along axis 0. Axis-0 extents may
    /// differ between ranks; all other axes must match.
    pub fn allgather_async(&self, tensor: &Tensor, name: Option<&str>) -> Result<Handle> {
        let name = self.op_name("allgather", name);
        let output = tensor.new_empty()?;
        let handle = self.dispatcher().allgather(AllgatherRequest {
            input: tensor.clone(),
            output: output.clone(),
            name: name.clone(),
        })?;
        self.handles
            .register(handle, PendingOperation::single(tensor.clone(), output))?;
        tracing::debug!(rank = self.rank(), %handle, collective = %name, "allgather submitted");
        Ok(handle)
    }

    /// Copy `root`'s tensor into a new output on every rank.
    pub fn broadcast_async(&self, tensor: &Tensor, root: Rank, name: Option<&str>) -> Result<Handle> {
        let output = tensor.zeros_like()?;
        self.submit_broadcast(tensor, output, root, name)
    }

    /// In-place variant of [`broadcast_async`](Self::broadcast_async): the
    /// root's tensor is left as is, every other rank's is overwritten.
    pub fn broadcast_async_(&self, tensor: &Tensor, root: Rank, name: Option<&str>) -> Result<Handle> {
        self.submit_broadcast(tensor, tensor.clone(), root, name)
    }

    fn submit_broadcast(
        &self,
        tensor: &Tensor,
        output: Tensor,
        root: Rank,
        name: Option<&str>,
    ) -> Result<Handle> {
        if root >= self.size() {
            return Err(CollError::InvalidRank {
                rank: root,
                world_size: self.size(),
            });
        }
        let name = self.op_name("broadcast", name);
        let handle = self.dispatcher().broadcast(BroadcastRequest {
            input: tensor.clone(),
            output: output.clone(),
            root,
            name: name.clone(),
        })?;
        self.handles
            .register(handle, PendingOperation::single(tensor.clone(), output))?;
        tracing::debug!(rank = self.rank(), %handle, collective = %name, root, "broadcast submitted");
        Ok(handle)
    }

    /// Send `splits[i]` axis-0 rows of `tensor` to rank `i` and receive the
    /// rows every rank sends here, concatenated in rank order.
    ///
    /// Without `splits` the rows are divided evenly, which requires the
    /// row count to be a multiple of the world size.
    pub fn alltoall_async(
        &self,
        tensor: &Tensor,
        splits: Option<&[i32]>,
        name: Option<&str>,
    ) -> Result<Handle> {
        if let Some(s) = splits {
            self.check_splits(s, tensor.dim0()?)?;
        }
        let splits = Tensor::vector(splits.unwrap_or(&[]));
        let name = self.op_name("alltoall", name);
        let output = tensor.new_empty()?;
        let handle = self.dispatcher().alltoall(AlltoallRequest {
            input: tensor.clone(),
            splits: splits.clone(),
            output: output.clone(),
            name: name.clone(),
        })?;
        self.handles.register(
            handle,
            PendingOperation::single(tensor.clone(), output).with_aux(splits),
        )?;
        tracing::debug!(rank = self.rank(), %handle, collective = %name, "alltoall submitted");
        Ok(handle)
    }

    fn check_splits(&self, splits: &[i32], rows: usize) -> Result<()> {
        let total: i64 = splits.iter().map(|&s| i64::from(s)).sum();
        let valid = splits.len() == self.size() as usize
            && splits.iter().all(|&s| s >= 0)
            && usize::try_from(total).is_ok_and(|t| t == rows);
        if !valid {
            return Err(CollError::InvalidSplits {
                splits: splits.iter().map(|&s| i64::from(s)).collect(),
                rows,
                world_size: self.size(),
            });
        }
        Ok(())
    }
}
