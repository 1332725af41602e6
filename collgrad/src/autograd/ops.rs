//! Forward/backward rules of the differentiable collectives.

use crate::client::{CollectiveClient, ReduceOptions};
use crate::error::{CollError, Result};
use crate::tensor::Tensor;
use crate::types::{Rank, ReduceOp};

use super::CollectiveFunction;

fn single<'a>(tensors: &'a [Tensor], operation: &'static str) -> Result<&'a Tensor> {
    match tensors {
        [t] => Ok(t),
        _ => Err(CollError::UnexpectedOutput {
            operation,
            reason: format!("expected exactly one tensor, got {}", tensors.len()),
        }),
    }
}

/// Gradients are reduced by plain summation with the forward scale factors.
fn backward_options(opts: &ReduceOptions) -> ReduceOptions {
    ReduceOptions::new()
        .op(ReduceOp::Sum)
        .prescale(opts.prescale)
        .postscale(opts.postscale)
}

#[derive(Debug, Clone)]
pub struct AllreduceFn {
    pub opts: ReduceOptions,
}

impl CollectiveFunction for AllreduceFn {
    fn op_name(&self) -> &'static str {
        "allreduce"
    }

    fn forward(&mut self, client: &CollectiveClient, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        let input = single(inputs, "allreduce forward")?;
        Ok(vec![client.allreduce(input, &self.opts)?])
    }

    fn backward(&self, client: &CollectiveClient, grad_outputs: &[Tensor]) -> Result<Vec<Tensor>> {
        let grad = single(grad_outputs, "allreduce backward")?;
        Ok(vec![client.allreduce(grad, &backward_options(&self.opts))?])
    }
}

#[derive(Debug, Clone)]
pub struct GroupedAllreduceFn {
    pub opts: ReduceOptions,
}

impl CollectiveFunction for GroupedAllreduceFn {
    fn op_name(&self) -> &'static str {
        "grouped_allreduce"
    }

    fn forward(&mut self, client: &CollectiveClient, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        client.grouped_allreduce(inputs, &self.opts)
    }

    fn backward(&self, client: &CollectiveClient, grad_outputs: &[Tensor]) -> Result<Vec<Tensor>> {
        client.grouped_allreduce(grad_outputs, &backward_options(&self.opts))
    }
}

/// Forward concatenates every rank's rows; backward hands each rank back
/// the slice of the summed gradient that its own rows produced.
#[derive(Debug, Clone, Default)]
pub struct AllgatherFn {
    pub name: Option<String>,
    rows: usize,
}

impl AllgatherFn {
    pub fn new(name: Option<String>) -> Self {
        Self { name, rows: 0 }
    }
}

impl CollectiveFunction for AllgatherFn {
    fn op_name(&self) -> &'static str {
        "allgather"
    }

    fn forward(&mut self, client: &CollectiveClient, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        let input = single(inputs, "allgather forward")?;
        self.rows = input.dim0()?;
        Ok(vec![client.allgather(input, self.name.as_deref())?])
    }

    fn backward(&self, client: &CollectiveClient, grad_outputs: &[Tensor]) -> Result<Vec<Tensor>> {
        let grad = single(grad_outputs, "allgather backward")?;
        let summed = client.allreduce(grad, &ReduceOptions::new().op(ReduceOp::Sum))?;

        let extents = client
            .allgather(&Tensor::vector(&[self.rows as i64]), None)?
            .to_vec::<i64>()?;
        let offset = gather_offset(&extents, client.rank())?;
        Ok(vec![summed.narrow(offset, self.rows)?])
    }
}

/// Rows contributed by all ranks below `rank`.
pub(crate) fn gather_offset(extents: &[i64], rank: Rank) -> Result<usize> {
    let lower = extents.get(..rank as usize).ok_or(CollError::InvalidRank {
        rank,
        world_size: extents.len() as u32,
    })?;
    let total: i64 = lower.iter().sum();
    usize::try_from(total).map_err(|_| CollError::UnexpectedOutput {
        operation: "allgather backward",
        reason: format!("negative row offset {total}"),
    })
}

/// Only the root's value reaches the output, so only the root receives a
/// gradient.
#[derive(Debug, Clone)]
pub struct BroadcastFn {
    pub root: Rank,
    pub name: Option<String>,
}

impl CollectiveFunction for BroadcastFn {
    fn op_name(&self) -> &'static str {
        "broadcast"
    }

    fn forward(&mut self, client: &CollectiveClient, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        let input = single(inputs, "broadcast forward")?;
        Ok(vec![client.broadcast(input, self.root, self.name.as_deref())?])
    }

    fn backward(&self, client: &CollectiveClient, grad_outputs: &[Tensor]) -> Result<Vec<Tensor>> {
        let grad = single(grad_outputs, "broadcast backward")?;
        let summed = client.allreduce(grad, &ReduceOptions::new().op(ReduceOp::Sum))?;
        if client.rank() != self.root {
            summed.zero_()?;
        }
        Ok(vec![summed])
    }
}

/// Backward sends each gradient row back to the rank it came from, which
/// needs the receive-side split sizes of the forward exchange.
#[derive(Debug, Clone, Default)]
pub struct AlltoallFn {
    pub splits: Option<Vec<i32>>,
    pub name: Option<String>,
    rows: usize,
}

impl AlltoallFn {
    pub fn new(splits: Option<Vec<i32>>, name: Option<String>) -> Self {
        Self {
            splits,
            name,
            rows: 0,
        }
    }
}

impl CollectiveFunction for AlltoallFn {
    fn op_name(&self) -> &'static str {
        "alltoall"
    }

    fn forward(&mut self, client: &CollectiveClient, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        let input = single(inputs, "alltoall forward")?;
        self.rows = input.dim0()?;
        Ok(vec![client.alltoall(
            input,
            self.splits.as_deref(),
            self.name.as_deref(),
        )?])
    }

    fn backward(&self, client: &CollectiveClient, grad_outputs: &[Tensor]) -> Result<Vec<Tensor>> {
        let grad = single(grad_outputs, "alltoall backward")?;
        let world = client.size() as usize;
        let send_splits = match &self.splits {
            Some(s) => s.clone(),
            None => vec![(self.rows / world) as i32; world],
        };
        // One split entry to every rank tells each peer what it received.
        let ones = vec![1i32; world];
        let recv_splits = client
            .alltoall(&Tensor::vector(&send_splits), Some(&ones), None)?
            .to_vec::<i32>()?;
        Ok(vec![client.alltoall(grad, Some(&recv_splits), None)?])
    }
}
