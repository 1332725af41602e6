//! Collective math for the in-process engine.
//!
//! Every function receives the contributions of one matched collective,
//! sorted by rank, and writes the result into each contributor's outputs.
//! All inputs are read before any output is written, so in-place requests
//! (input and output sharing storage) see the pre-collective values.
//! Failures are plain reason strings; the coordinator attaches the
//! operation name.

use crate::tensor::{Combine, kernels, row_elems};
use crate::types::{DataType, Rank, ReduceOp};

use crate::backend::{
    AllgatherRequest, AlltoallRequest, BroadcastRequest, GroupedAllreduceRequest,
};

type Outcome = Result<(), String>;

/// Below this squared norm a vector counts as zero for Adasum weighting.
const ADASUM_NORM_EPSILON: f64 = 1e-8;

struct Reduced {
    data: Vec<u8>,
    dtype: DataType,
    shape: Vec<usize>,
}

pub(super) fn allreduce(parts: &[(Rank, &GroupedAllreduceRequest)], world_size: u32) -> Outcome {
    let (_, first) = parts.first().ok_or("no contributions")?;
    for (rank, req) in parts {
        if req.op != first.op {
            return Err(format!(
                "rank {rank} requested {} while rank {} requested {}",
                req.op, parts[0].0, first.op
            ));
        }
        if req.inputs.len() != first.inputs.len() || req.outputs.len() != req.inputs.len() {
            return Err(format!(
                "rank {rank} submitted {} inputs and {} outputs, expected {} of each",
                req.inputs.len(),
                req.outputs.len(),
                first.inputs.len()
            ));
        }
    }

    let mut results = Vec::with_capacity(first.inputs.len());
    for position in 0..first.inputs.len() {
        results.push(reduce_position(parts, position, first.op, world_size)?);
    }

    for (_, req) in parts {
        let factor = req.postscale / f64::from(req.divisor.max(1));
        for (output, reduced) in req.outputs.iter().zip(&results) {
            let mut data = reduced.data.clone();
            kernels::scale_in_place(&mut data, reduced.dtype, factor);
            output
                .store(data, reduced.shape.clone())
                .map_err(|e| e.to_string())?;
        }
    }
    Ok(())
}

fn reduce_position(
    parts: &[(Rank, &GroupedAllreduceRequest)],
    position: usize,
    op: ReduceOp,
    world_size: u32,
) -> Result<Reduced, String> {
    let mut per_rank: Vec<Option<Vec<u8>>> = vec![None; world_size as usize];
    let mut layout: Option<(DataType, Vec<usize>)> = None;

    for (rank, req) in parts {
        let (mut data, dtype, shape) = req.inputs[position]
            .snapshot()
            .map_err(|e| e.to_string())?;
        let (d, s) = layout.get_or_insert_with(|| (dtype, shape.clone()));
        if *d != dtype || *s != shape {
            return Err(format!(
                "rank {rank} tensor {position} is {dtype}{shape:?}, expected {d}{s:?}"
            ));
        }
        kernels::scale_in_place(&mut data, dtype, req.prescale);
        let slot = per_rank
            .get_mut(*rank as usize)
            .ok_or_else(|| format!("rank {rank} outside world of {world_size}"))?;
        *slot = Some(data);
    }

    let (dtype, shape) = layout.ok_or("no contributions")?;
    let byte_len = shape.iter().product::<usize>() * dtype.size_in_bytes();
    // Joined ranks contribute zeros.
    let buffers: Vec<Vec<u8>> = per_rank
        .into_iter()
        .map(|b| b.unwrap_or_else(|| vec![0u8; byte_len]))
        .collect();

    let mut data = match op {
        ReduceOp::Sum | ReduceOp::Average => fold(buffers, dtype, Combine::Sum),
        ReduceOp::Min => fold(buffers, dtype, Combine::Min),
        ReduceOp::Max => fold(buffers, dtype, Combine::Max),
        ReduceOp::Product => fold(buffers, dtype, Combine::Product),
        ReduceOp::Adasum => {
            if !dtype.is_float() {
                return Err(format!("adasum is not defined for {dtype} tensors"));
            }
            let vectors = buffers
                .iter()
                .map(|b| kernels::to_f64_vec(b, dtype))
                .collect();
            kernels::from_f64_slice(&adasum(vectors), dtype)
        }
    };
    if op == ReduceOp::Average {
        kernels::scale_in_place(&mut data, dtype, 1.0 / f64::from(world_size));
    }
    Ok(Reduced { data, dtype, shape })
}

fn fold(buffers: Vec<Vec<u8>>, dtype: DataType, how: Combine) -> Vec<u8> {
    let mut iter = buffers.into_iter();
    let mut acc = iter.next().unwrap_or_default();
    for b in iter {
        kernels::combine_into(&mut acc, &b, dtype, how);
    }
    acc
}

/// Recursive-doubling Adasum over rank-ordered vectors.
fn adasum(mut vectors: Vec<Vec<f64>>) -> Vec<f64> {
    while vectors.len() > 1 {
        vectors = vectors
            .chunks(2)
            .filter_map(|pair| pair.iter().cloned().reduce(|a, b| adasum_pair(&a, &b)))
            .collect();
    }
    vectors.pop().unwrap_or_default()
}

fn adasum_pair(a: &[f64], b: &[f64]) -> Vec<f64> {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let a_sq: f64 = a.iter().map(|x| x * x).sum();
    let b_sq: f64 = b.iter().map(|x| x * x).sum();
    let a_coeff = if a_sq >= ADASUM_NORM_EPSILON {
        1.0 - dot / a_sq * 0.5
    } else {
        1.0
    };
    let b_coeff = if b_sq >= ADASUM_NORM_EPSILON {
        1.0 - dot / b_sq * 0.5
    } else {
        1.0
    };
    a.iter()
        .zip(b)
        .map(|(x, y)| a_coeff * x + b_coeff * y)
        .collect()
}

pub(super) fn allgather(parts: &[(Rank, &AllgatherRequest)]) -> Outcome {
    let mut layout: Option<(DataType, Vec<usize>)> = None;
    let mut rows = 0usize;
    let mut data = Vec::new();

    for (rank, req) in parts {
        let (bytes, dtype, shape) = req.input.snapshot().map_err(|e| e.to_string())?;
        let Some((&extent, trailing)) = shape.split_first() else {
            return Err(format!("rank {rank} submitted a scalar"));
        };
        let (d, t) = layout.get_or_insert_with(|| (dtype, trailing.to_vec()));
        if *d != dtype || t.as_slice() != trailing {
            return Err(format!(
                "rank {rank} rows are {dtype}{trailing:?}, expected {d}{t:?}"
            ));
        }
        rows += extent;
        data.extend_from_slice(&bytes);
    }

    let (_, trailing) = layout.ok_or("no contributions")?;
    let mut shape = vec![rows];
    shape.extend_from_slice(&trailing);
    for (_, req) in parts {
        req.output
            .store(data.clone(), shape.clone())
            .map_err(|e| e.to_string())?;
    }
    Ok(())
}

pub(super) fn broadcast(parts: &[(Rank, &BroadcastRequest)]) -> Outcome {
    let (_, first) = parts.first().ok_or("no contributions")?;
    let root = first.root;
    if let Some((rank, req)) = parts.iter().find(|(_, r)| r.root != root) {
        return Err(format!(
            "rank {rank} broadcasts from root {} while others use root {root}",
            req.root
        ));
    }
    let (_, root_req) = parts
        .iter()
        .find(|(rank, _)| *rank == root)
        .ok_or_else(|| format!("root rank {root} has joined and cannot broadcast"))?;
    let (data, dtype, shape) = root_req.input.snapshot().map_err(|e| e.to_string())?;

    for (rank, req) in parts {
        let (peer_dtype, peer_shape) = (
            req.input.dtype().map_err(|e| e.to_string())?,
            req.input.shape().map_err(|e| e.to_string())?,
        );
        if peer_dtype != dtype || peer_shape != shape {
            return Err(format!(
                "rank {rank} holds {peer_dtype}{peer_shape:?}, root holds {dtype}{shape:?}"
            ));
        }
    }
    for (_, req) in parts {
        req.output
            .store(data.clone(), shape.clone())
            .map_err(|e| e.to_string())?;
    }
    Ok(())
}

struct Outgoing {
    data: Vec<u8>,
    row_bytes: usize,
    offsets: Vec<usize>,
    splits: Vec<usize>,
}

pub(super) fn alltoall(parts: &[(Rank, &AlltoallRequest)], world_size: u32) -> Outcome {
    if parts.len() != world_size as usize {
        return Err(format!(
            "alltoall needs every rank, {} of {world_size} submitted",
            parts.len()
        ));
    }

    let mut layout: Option<(DataType, Vec<usize>)> = None;
    let mut outgoing = Vec::with_capacity(parts.len());
    for (rank, req) in parts {
        let (data, dtype, shape) = req.input.snapshot().map_err(|e| e.to_string())?;
        let Some((&rows, trailing)) = shape.split_first() else {
            return Err(format!("rank {rank} submitted a scalar"));
        };
        let (d, t) = layout.get_or_insert_with(|| (dtype, trailing.to_vec()));
        if *d != dtype || t.as_slice() != trailing {
            return Err(format!(
                "rank {rank} rows are {dtype}{trailing:?}, expected {d}{t:?}"
            ));
        }
        let requested = req.splits.to_f64_vec().map_err(|e| e.to_string())?;
        let splits = resolve_splits(&requested, rows, world_size)
            .map_err(|reason| format!("rank {rank}: {reason}"))?;
        let mut offsets = Vec::with_capacity(splits.len());
        let mut acc = 0;
        for s in &splits {
            offsets.push(acc);
            acc += s;
        }
        outgoing.push(Outgoing {
            data,
            row_bytes: row_elems(&shape) * dtype.size_in_bytes(),
            offsets,
            splits,
        });
    }

    let (_, trailing) = layout.ok_or("no contributions")?;
    for (dst, (_, req)) in parts.iter().enumerate() {
        let mut rows = 0;
        let mut data = Vec::new();
        for src in &outgoing {
            let start = src.offsets[dst] * src.row_bytes;
            let end = start + src.splits[dst] * src.row_bytes;
            data.extend_from_slice(&src.data[start..end]);
            rows += src.splits[dst];
        }
        let mut shape = vec![rows];
        shape.extend_from_slice(&trailing);
        req.output.store(data, shape).map_err(|e| e.to_string())?;
    }
    Ok(())
}

/// Per-destination row counts. An empty request splits the rows evenly.
fn resolve_splits(requested: &[f64], rows: usize, world_size: u32) -> Result<Vec<usize>, String> {
    let world = world_size as usize;
    if requested.is_empty() {
        if rows % world != 0 {
            return Err(format!("{rows} rows do not split evenly across {world} ranks"));
        }
        return Ok(vec![rows / world; world]);
    }
    if requested.len() != world {
        return Err(format!(
            "{} split sizes given for {world} ranks",
            requested.len()
        ));
    }
    if requested.iter().any(|&s| s < 0.0) {
        return Err(format!("negative split size in {requested:?}"));
    }
    let splits: Vec<usize> = requested.iter().map(|&s| s as usize).collect();
    let total: usize = splits.iter().sum();
    if total != rows {
        return Err(format!("split sizes sum to {total}, tensor has {rows} rows"));
    }
    Ok(splits)
}
