//! Differentiable collectives.
//!
//! Each call runs the forward collective to completion, registers a
//! [`GraphNode`] with the caller's [`GradGraph`] and returns the result.
//! When the graph later runs the node's backward rule, the rule issues its
//! own collectives through the same client.
//!
//! ```no_run
//! use collgrad::autograd::{GradCollectives, Tape};
//! use collgrad::backend::LocalCluster;
//! use collgrad::client::ReduceOptions;
//! use collgrad::config::CollConfig;
//! use collgrad::tensor::Tensor;
//!
//! # fn main() -> collgrad::error::Result<()> {
//! let cluster = LocalCluster::new(1)?;
//! let client = cluster.client(0, CollConfig::default())?;
//! let tape = Tape::new();
//! let ops = GradCollectives::new(&client, &tape);
//!
//! let w = Tensor::vector(&[1.0f32, 2.0]);
//! let y = ops.allreduce(&w, ReduceOptions::new())?;
//! let grads = tape.backward(&client, &[(y.clone(), y.zeros_like()?)])?;
//! assert!(grads.get(&w).is_some());
//! # Ok(())
//! # }
//! ```

mod function;
mod graph;
mod ops;

use std::sync::Arc;

pub use function::{CollectiveFunction, Compressed};
pub use graph::{GradGraph, Gradients, GraphNode, NoGrad, Tape};
pub use ops::{AllgatherFn, AllreduceFn, AlltoallFn, BroadcastFn, GroupedAllreduceFn};

use crate::client::{CollectiveClient, ReduceOptions};
use crate::compression::{Compressor, NoCompression};
use crate::error::{CollError, Result};
use crate::tensor::Tensor;
use crate::types::Rank;

/// Differentiable entry points bound to one client and one graph.
pub struct GradCollectives<'a> {
    client: &'a CollectiveClient,
    graph: &'a dyn GradGraph,
    compressor: Arc<dyn Compressor>,
}

impl<'a> GradCollectives<'a> {
    pub fn new(client: &'a CollectiveClient, graph: &'a dyn GradGraph) -> Self {
        Self {
            client,
            graph,
            compressor: Arc::new(NoCompression),
        }
    }

    /// Compress tensors around every forward and backward collective.
    pub fn with_compressor(mut self, compressor: Arc<dyn Compressor>) -> Self {
        self.compressor = compressor;
        self
    }

    /// Reduce `tensor` across ranks. Backward sums the output gradient with
    /// the same scale factors.
    pub fn allreduce(&self, tensor: &Tensor, opts: ReduceOptions) -> Result<Tensor> {
        let outputs = self.apply(AllreduceFn { opts }, vec![tensor.clone()])?;
        into_single(outputs)
    }

    /// Reduce a list of tensors under one name.
    pub fn grouped_allreduce(&self, tensors: &[Tensor], opts: ReduceOptions) -> Result<Vec<Tensor>> {
        if tensors.is_empty() {
            return Err(CollError::EmptyGroup {
                operation: "grouped_allreduce",
            });
        }
        self.apply(GroupedAllreduceFn { opts }, tensors.to_vec())
    }

    /// Concatenate along axis 0 across ranks.
    pub fn allgather(&self, tensor: &Tensor, name: Option<&str>) -> Result<Tensor> {
        let f = AllgatherFn::new(name.map(str::to_string));
        into_single(self.apply(f, vec![tensor.clone()])?)
    }

    /// Copy `root`'s tensor to every rank.
    pub fn broadcast(&self, tensor: &Tensor, root: Rank, name: Option<&str>) -> Result<Tensor> {
        let f = BroadcastFn {
            root,
            name: name.map(str::to_string),
        };
        into_single(self.apply(f, vec![tensor.clone()])?)
    }

    /// Exchange axis-0 slices between ranks.
    pub fn alltoall(
        &self,
        tensor: &Tensor,
        splits: Option<&[i32]>,
        name: Option<&str>,
    ) -> Result<Tensor> {
        let f = AlltoallFn::new(splits.map(<[i32]>::to_vec), name.map(str::to_string));
        into_single(self.apply(f, vec![tensor.clone()])?)
    }

    fn apply<F>(&self, function: F, inputs: Vec<Tensor>) -> Result<Vec<Tensor>>
    where
        F: CollectiveFunction + 'static,
    {
        let mut function = Compressed::new(function, Arc::clone(&self.compressor));
        let outputs = function.forward(self.client, &inputs)?;
        self.graph.register(GraphNode {
            function: Box::new(function),
            inputs,
            outputs: outputs.clone(),
        })?;
        Ok(outputs)
    }
}

fn into_single(mut outputs: Vec<Tensor>) -> Result<Tensor> {
    match (outputs.pop(), outputs.is_empty()) {
        (Some(t), true) => Ok(t),
        _ => Err(CollError::UnexpectedOutput {
            operation: "differentiable collective",
            reason: "expected exactly one output".into(),
        }),
    }
}
