//! Differentiable collective operations for data-parallel training.
//!
//! A [`CollectiveClient`] turns collective requests into submissions to a
//! [`CommBackend`]: it resolves the effective reduction op and divisor for
//! the cluster topology, validates tensors against the engine's
//! capabilities and keeps operand buffers alive in a handle table until
//! the caller synchronizes. The [`autograd`] module pairs every collective
//! with its gradient rule.

pub mod autograd;
pub mod backend;
pub mod client;
pub mod collective;
pub mod compression;
pub mod config;
pub mod error;
pub mod tensor;
pub mod topology;
pub mod types;

pub use autograd::{GradCollectives, GradGraph, NoGrad, Tape};
pub use backend::{CommBackend, LocalCluster};
pub use client::{CollectiveClient, CollectiveOutput, ReduceOptions};
pub use collective::CapabilityTable;
pub use compression::{Compressor, Fp16Compressor, NoCompression};
pub use config::CollConfig;
pub use error::{CollError, ErrorKind, Result};
pub use tensor::Tensor;
pub use topology::{StaticTopology, Topology};
pub use types::{DataType, Device, DeviceKind, Handle, Rank, ReduceOp, TensorCategory};
