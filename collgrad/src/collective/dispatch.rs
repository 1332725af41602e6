//! Pre-dispatch validation and engine submission.
//!
//! The engine exposes one submission path per tensor category. Which
//! categories exist is decided once, from the engine's build flags, and kept
//! in a [`CapabilityTable`]; every call is checked against it before
//! anything reaches the engine.

use std::collections::BTreeSet;

use crate::backend::{
    AllgatherRequest, AllreduceRequest, AlltoallRequest, BroadcastRequest, CommBackend,
    GroupedAllreduceRequest,
};
use crate::error::{BackendError, CollError, Result};
use crate::tensor::Tensor;
use crate::topology::Topology;
use crate::types::{DataType, DeviceKind, Handle, TensorCategory};

/// Element types every engine build handles.
pub const BUILTIN_TYPES: [DataType; 8] = [
    DataType::U8,
    DataType::I8,
    DataType::I16,
    DataType::I32,
    DataType::I64,
    DataType::F16,
    DataType::F32,
    DataType::F64,
];

/// Supported element type × memory space combinations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityTable {
    supported: BTreeSet<TensorCategory>,
}

impl CapabilityTable {
    /// Host categories always; accelerator categories when the engine was
    /// built with accelerator support.
    pub fn from_topology(topology: &dyn Topology) -> Self {
        let mut spaces = vec![DeviceKind::Host];
        if topology.accelerator_built() {
            spaces.push(DeviceKind::Accelerator);
        }
        let supported = spaces
            .into_iter()
            .flat_map(|device| {
                BUILTIN_TYPES
                    .iter()
                    .map(move |&dtype| TensorCategory::new(dtype, device))
            })
            .collect();
        Self { supported }
    }

    /// Table with exactly `categories`.
    pub fn from_categories(categories: impl IntoIterator<Item = TensorCategory>) -> Self {
        Self {
            supported: categories.into_iter().collect(),
        }
    }

    pub fn allow(mut self, category: TensorCategory) -> Self {
        self.supported.insert(category);
        self
    }

    pub fn supports(&self, category: TensorCategory) -> bool {
        self.supported.contains(&category)
    }

    pub fn categories(&self) -> impl Iterator<Item = TensorCategory> + '_ {
        self.supported.iter().copied()
    }

    /// Resolve the tensor's category, failing if the build lacks it or the
    /// tensor is not contiguous. Type support is checked first.
    pub fn check(&self, tensor: &Tensor) -> Result<TensorCategory> {
        let category = self.category_of(tensor)?;
        ensure_contiguous(tensor)?;
        Ok(category)
    }

    /// Validate a group: the first tensor selects the category, every
    /// tensor must be contiguous.
    pub fn check_group(&self, tensors: &[Tensor]) -> Result<TensorCategory> {
        let first = tensors.first().ok_or(CollError::EmptyGroup {
            operation: "grouped_allreduce",
        })?;
        let category = self.category_of(first)?;
        for t in tensors {
            ensure_contiguous(t)?;
        }
        Ok(category)
    }

    fn category_of(&self, tensor: &Tensor) -> Result<TensorCategory> {
        let (dtype, device) = (tensor.dtype()?, tensor.device()?);
        let category = TensorCategory::new(dtype, device.kind());
        if !self.supports(category) {
            return Err(CollError::UnsupportedType { dtype, device });
        }
        Ok(category)
    }
}

fn ensure_contiguous(tensor: &Tensor) -> Result<()> {
    if !tensor.is_contiguous()? {
        return Err(CollError::NotContiguous {
            shape: tensor.shape()?,
        });
    }
    Ok(())
}

fn rejected(operation: &'static str, name: &str, source: BackendError) -> CollError {
    CollError::internal_with_source(format!("engine rejected {operation} '{name}'"), source)
}

/// Validates requests and hands them to the engine.
pub struct Dispatcher<'a> {
    backend: &'a dyn CommBackend,
    capabilities: &'a CapabilityTable,
}

impl<'a> Dispatcher<'a> {
    pub fn new(backend: &'a dyn CommBackend, capabilities: &'a CapabilityTable) -> Self {
        Self {
            backend,
            capabilities,
        }
    }

    pub fn allreduce(&self, request: AllreduceRequest) -> Result<Handle> {
        let category = self.capabilities.check(&request.input)?;
        let name = request.name.clone();
        self.backend
            .submit_allreduce(category, request)
            .map_err(|e| rejected("allreduce", &name, e))
    }

    pub fn grouped_allreduce(&self, request: GroupedAllreduceRequest) -> Result<Handle> {
        let category = self.capabilities.check_group(&request.inputs)?;
        let name = request.name.clone();
        self.backend
            .submit_grouped_allreduce(category, request)
            .map_err(|e| rejected("grouped_allreduce", &name, e))
    }

    pub fn allgather(&self, request: AllgatherRequest) -> Result<Handle> {
        let category = self.capabilities.check(&request.input)?;
        let name = request.name.clone();
        self.backend
            .submit_allgather(category, request)
            .map_err(|e| rejected("allgather", &name, e))
    }

    pub fn broadcast(&self, request: BroadcastRequest) -> Result<Handle> {
        let category = self.capabilities.check(&request.input)?;
        let name = request.name.clone();
        self.backend
            .submit_broadcast(category, request)
            .map_err(|e| rejected("broadcast", &name, e))
    }

    pub fn alltoall(&self, request: AlltoallRequest) -> Result<Handle> {
        let category = self.capabilities.check(&request.input)?;
        let name = request.name.clone();
        self.backend
            .submit_alltoall(category, request)
            .map_err(|e| rejected("alltoall", &name, e))
    }
}
