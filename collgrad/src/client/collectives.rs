use crate::error::{CollError, Result};
use crate::tensor::Tensor;
use crate::types::{Handle, Rank};

use super::{CollectiveClient, ReduceOptions};

impl CollectiveClient {
    /// Blocking allreduce into a new tensor.
    pub fn allreduce(&self, tensor: &Tensor, opts: &ReduceOptions) -> Result<Tensor> {
        let handle = self.allreduce_async(tensor, opts)?;
        self.wait_single(handle, "allreduce")
    }

    /// Blocking in-place allreduce. Returns `tensor`, now holding the result.
    pub fn allreduce_(&self, tensor: &Tensor, opts: &ReduceOptions) -> Result<Tensor> {
        let handle = self.allreduce_async_(tensor, opts)?;
        self.wait_single(handle, "allreduce_")
    }

    pub fn grouped_allreduce(&self, tensors: &[Tensor], opts: &ReduceOptions) -> Result<Vec<Tensor>> {
        let handle = self.grouped_allreduce_async(tensors, opts)?;
        self.wait_group(handle, "grouped_allreduce")
    }

    pub fn grouped_allreduce_(&self, tensors: &[Tensor], opts: &ReduceOptions) -> Result<Vec<Tensor>> {
        let handle = self.grouped_allreduce_async_(tensors, opts)?;
        self.wait_group(handle, "grouped_allreduce_")
    }

    pub fn allgather(&self, tensor: &Tensor, name: Option<&str>) -> Result<Tensor> {
        let handle = self.allgather_async(tensor, name)?;
        self.wait_single(handle, "allgather")
    }

    pub fn broadcast(&self, tensor: &Tensor, root: Rank, name: Option<&str>) -> Result<Tensor> {
        let handle = self.broadcast_async(tensor, root, name)?;
        self.wait_single(handle, "broadcast")
    }

    pub fn broadcast_(&self, tensor: &Tensor, root: Rank, name: Option<&str>) -> Result<Tensor> {
        let handle = self.broadcast_async_(tensor, root, name)?;
        self.wait_single(handle, "broadcast_")
    }

    pub fn alltoall(
        &self,
        tensor: &Tensor,
        splits: Option<&[i32]>,
        name: Option<&str>,
    ) -> Result<Tensor> {
        let handle = self.alltoall_async(tensor, splits, name)?;
        self.wait_single(handle, "alltoall")
    }

    fn wait_single(&self, handle: Handle, operation: &'static str) -> Result<Tensor> {
        self.synchronize(handle)?
            .ok_or_else(|| consumed(operation, handle))?
            .into_single()
    }

    fn wait_group(&self, handle: Handle, operation: &'static str) -> Result<Vec<Tensor>> {
        self.synchronize(handle)?
            .ok_or_else(|| consumed(operation, handle))?
            .into_group()
    }
}

fn consumed(operation: &'static str, handle: Handle) -> CollError {
    CollError::UnexpectedOutput {
        operation,
        reason: format!("handle {handle} was synchronized elsewhere"),
    }
}
