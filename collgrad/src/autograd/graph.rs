//! Differentiation-graph registration.
//!
//! A tensor engine with its own autograd implements [`GradGraph`] and wraps
//! each [`GraphNode`] into whatever node type it uses. [`Tape`] is a
//! self-contained recorder for callers without one.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::client::CollectiveClient;
use crate::error::{CollError, Result};
use crate::tensor::{Tensor, TensorId};

use super::CollectiveFunction;

/// One forward/backward pair attached to the graph.
pub struct GraphNode {
    pub function: Box<dyn CollectiveFunction>,
    pub inputs: Vec<Tensor>,
    pub outputs: Vec<Tensor>,
}

impl std::fmt::Debug for GraphNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphNode")
            .field("function", &self.function.op_name())
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.outputs.len())
            .finish()
    }
}

/// Registration primitive of a differentiation graph.
pub trait GradGraph: Send + Sync {
    fn register(&self, node: GraphNode) -> Result<()>;
}

/// Discards every node: forward only.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoGrad;

impl GradGraph for NoGrad {
    fn register(&self, _node: GraphNode) -> Result<()> {
        Ok(())
    }
}

/// Records nodes in execution order and replays them in reverse.
#[derive(Debug, Default)]
pub struct Tape {
    nodes: Mutex<Vec<GraphNode>>,
}

impl GradGraph for Tape {
    fn register(&self, node: GraphNode) -> Result<()> {
        self.lock()?.push(node);
        Ok(())
    }
}

impl Tape {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.lock()?.is_empty())
    }

    /// Backpropagate from `seeds`, pairs of (output tensor, its gradient).
    ///
    /// Every recorded node runs, newest first, even if no gradient reached
    /// its outputs (they are zero-filled). Each backward rule issues
    /// collectives, and skipping one on a single rank would leave the
    /// others waiting. The tape is empty afterwards.
    pub fn backward(
        &self,
        client: &CollectiveClient,
        seeds: &[(Tensor, Tensor)],
    ) -> Result<Gradients> {
        let nodes = std::mem::take(&mut *self.lock()?);
        let mut grads = Gradients::default();
        for (output, grad) in seeds {
            grads.accumulate(output, grad.deep_clone()?)?;
        }

        for node in nodes.iter().rev() {
            let grad_outputs = node
                .outputs
                .iter()
                .map(|o| match grads.get(o) {
                    Some(g) => Ok(g.clone()),
                    None => o.zeros_like(),
                })
                .collect::<Result<Vec<_>>>()?;
            let grad_inputs = node.function.backward(client, &grad_outputs)?;
            if grad_inputs.len() != node.inputs.len() {
                return Err(CollError::UnexpectedOutput {
                    operation: node.function.op_name(),
                    reason: format!(
                        "backward produced {} gradients for {} inputs",
                        grad_inputs.len(),
                        node.inputs.len()
                    ),
                });
            }
            for (input, g) in node.inputs.iter().zip(grad_inputs) {
                grads.accumulate(input, g)?;
            }
            tracing::trace!(function = node.function.op_name(), "backward step done");
        }
        Ok(grads)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<GraphNode>>> {
        self.nodes
            .lock()
            .map_err(|_| CollError::LockPoisoned("gradient tape"))
    }
}

/// Gradients keyed by tensor storage.
///
/// Keys are kept alive alongside their gradients so a storage address is
/// never reused while it identifies an entry.
#[derive(Debug, Default)]
pub struct Gradients {
    entries: HashMap<TensorId, (Tensor, Tensor)>,
}

impl Gradients {
    /// Gradient with respect to `tensor`, if any reached it.
    pub fn get(&self, tensor: &Tensor) -> Option<&Tensor> {
        self.entries.get(&tensor.id()).map(|(_, g)| g)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn accumulate(&mut self, tensor: &Tensor, grad: Tensor) -> Result<()> {
        match self.entries.get(&tensor.id()) {
            Some((_, existing)) => existing.add_(&grad),
            None => {
                self.entries.insert(tensor.id(), (tensor.clone(), grad));
                Ok(())
            }
        }
    }
}
