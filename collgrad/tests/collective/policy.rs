//! Policy and validation failures never reach the engine.

use std::sync::{Arc, Mutex};

use collgrad::backend::{
    AllgatherRequest, AllreduceRequest, AlltoallRequest, BackendResult, BroadcastRequest,
    CommBackend, GroupedAllreduceRequest,
};
use collgrad::error::ErrorKind;
use collgrad::{
    CollConfig, CollError, CollectiveClient, DataType, Device, Handle, Rank, ReduceOp,
    ReduceOptions, StaticTopology, Tensor, TensorCategory,
};

/// Records every submission; completes everything immediately.
#[derive(Default)]
struct RecordingBackend {
    submitted: Mutex<Vec<(&'static str, TensorCategory, ReduceOp, u32)>>,
    reject: bool,
}

impl RecordingBackend {
    fn rejecting() -> Self {
        Self {
            reject: true,
            ..Self::default()
        }
    }

    fn record(
        &self,
        kind: &'static str,
        category: TensorCategory,
        op: ReduceOp,
        divisor: u32,
    ) -> BackendResult<Handle> {
        if self.reject {
            return Err("queue closed".into());
        }
        let mut submitted = self.submitted.lock().unwrap();
        submitted.push((kind, category, op, divisor));
        Ok(Handle(submitted.len() as u64))
    }

    fn count(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }

    fn last(&self) -> (&'static str, TensorCategory, ReduceOp, u32) {
        *self.submitted.lock().unwrap().last().unwrap()
    }
}

impl CommBackend for RecordingBackend {
    fn submit_allreduce(
        &self,
        category: TensorCategory,
        request: AllreduceRequest,
    ) -> BackendResult<Handle> {
        self.record("allreduce", category, request.op, request.divisor)
    }

    fn submit_grouped_allreduce(
        &self,
        category: TensorCategory,
        request: GroupedAllreduceRequest,
    ) -> BackendResult<Handle> {
        self.record("grouped_allreduce", category, request.op, request.divisor)
    }

    fn submit_allgather(
        &self,
        category: TensorCategory,
        _request: AllgatherRequest,
    ) -> BackendResult<Handle> {
        self.record("allgather", category, ReduceOp::Sum, 1)
    }

    fn submit_broadcast(
        &self,
        category: TensorCategory,
        _request: BroadcastRequest,
    ) -> BackendResult<Handle> {
        self.record("broadcast", category, ReduceOp::Sum, 1)
    }

    fn submit_alltoall(
        &self,
        category: TensorCategory,
        _request: AlltoallRequest,
    ) -> BackendResult<Handle> {
        self.record("alltoall", category, ReduceOp::Sum, 1)
    }

    fn poll(&self, _handle: Handle) -> BackendResult<bool> {
        Ok(true)
    }

    fn wait_and_release(&self, _handle: Handle) -> BackendResult<()> {
        Ok(())
    }

    fn join(&self, _device: Device) -> BackendResult<Rank> {
        Ok(0)
    }
}

fn client_with(
    topology: StaticTopology,
    config: CollConfig,
) -> (Arc<RecordingBackend>, CollectiveClient) {
    let backend = Arc::new(RecordingBackend::default());
    let client = CollectiveClient::new(backend.clone(), Arc::new(topology), config);
    (backend, client)
}

fn on_accelerator() -> Tensor {
    Tensor::zeros(&[4], DataType::F32, Device::Accelerator(0))
}

fn adasum() -> ReduceOptions {
    ReduceOptions::new().op(ReduceOp::Adasum)
}

#[test]
fn test_heterogeneous_gpu_adasum_never_dispatches() {
    let topology = StaticTopology::host_only(0, 4)
        .with_local_size(2)
        .with_accelerator(true)
        .heterogeneous();
    let (backend, client) = client_with(topology, CollConfig::default());

    let err = client.allreduce_async(&on_accelerator(), &adasum()).unwrap_err();
    assert!(matches!(err, CollError::HeterogeneousAdasum), "{err}");
    assert_eq!(err.kind(), ErrorKind::Capability);
    assert_eq!(backend.count(), 0);
    assert_eq!(client.pending().unwrap(), 0);
}

#[test]
fn test_gpu_adasum_non_power_of_two_nodes() {
    // 6 ranks, 2 per node: 3 nodes.
    let topology = StaticTopology::host_only(0, 6)
        .with_local_size(2)
        .with_accelerator(true);
    let (backend, client) = client_with(topology, CollConfig::default());

    let err = client.allreduce_async(&on_accelerator(), &adasum()).unwrap_err();
    assert!(matches!(err, CollError::NonPowerOfTwoNodes { nodes: 3 }), "{err}");
    assert_eq!(backend.count(), 0);
}

#[test]
fn test_gpu_adasum_divisor_is_local_size() {
    let topology = StaticTopology::host_only(0, 8)
        .with_local_size(4)
        .with_accelerator(true)
        .with_framework_averaging();
    let (backend, client) = client_with(topology, CollConfig::default());

    client.allreduce_async(&on_accelerator(), &adasum()).unwrap();
    let (kind, category, op, divisor) = backend.last();
    assert_eq!(kind, "allreduce");
    assert_eq!(category.device, collgrad::DeviceKind::Accelerator);
    assert_eq!(op, ReduceOp::Adasum);
    assert_eq!(divisor, 4);
}

#[test]
fn test_cpu_adasum_non_power_of_two_ranks() {
    let (backend, client) = client_with(StaticTopology::host_only(0, 3), CollConfig::default());
    let err = client
        .grouped_allreduce_async(&[Tensor::vector(&[1.0f32])], &adasum())
        .unwrap_err();
    assert!(matches!(err, CollError::NonPowerOfTwoRanks { ranks: 3 }), "{err}");
    assert_eq!(backend.count(), 0);
}

#[test]
fn test_gpu_adasum_without_aware_transport_falls_back() {
    let topology = StaticTopology::host_only(0, 4)
        .with_local_size(2)
        .with_accelerator(false)
        .heterogeneous();
    let (backend, client) = client_with(topology, CollConfig::default());

    // Heterogeneity only matters on the accelerator path.
    client.allreduce_async(&on_accelerator(), &adasum()).unwrap();
    let (_, _, op, divisor) = backend.last();
    assert_eq!((op, divisor), (ReduceOp::Adasum, 1));
}

#[test]
fn test_gpu_adasum_strict_mode_errors() {
    let topology = StaticTopology::host_only(0, 4).with_accelerator(false);
    let config = CollConfig {
        strict_gpu_adasum: true,
        ..CollConfig::default()
    };
    let (backend, client) = client_with(topology, config);

    let err = client.allreduce_async(&on_accelerator(), &adasum()).unwrap_err();
    assert!(matches!(err, CollError::AdasumGpuTransportMissing), "{err}");
    assert_eq!(backend.count(), 0);
}

#[test]
fn test_average_divisor_follows_build() {
    let plain = StaticTopology::host_only(0, 4);
    let (backend, client) = client_with(plain, CollConfig::default());
    client
        .allreduce_async(&Tensor::vector(&[1.0f32]), &ReduceOptions::new())
        .unwrap();
    assert_eq!(backend.last().2, ReduceOp::Average);
    assert_eq!(backend.last().3, 1);

    let averaging = StaticTopology::host_only(0, 4)
        .with_accelerator(true)
        .with_framework_averaging();
    let (backend, client) = client_with(averaging, CollConfig::default());
    client
        .allreduce_async(&Tensor::vector(&[1.0f32]), &ReduceOptions::new())
        .unwrap();
    assert_eq!(backend.last().2, ReduceOp::Sum);
    assert_eq!(backend.last().3, 4);
}

#[test]
fn test_configured_default_op() {
    let config = CollConfig {
        default_op: ReduceOp::Max,
        ..CollConfig::default()
    };
    let (backend, client) = client_with(StaticTopology::host_only(0, 3), config);
    client
        .allreduce_async(&Tensor::vector(&[1i32]), &ReduceOptions::new())
        .unwrap();
    assert_eq!(backend.last().2, ReduceOp::Max);
}

#[test]
fn test_unsupported_type_rejected() {
    let (backend, client) = client_with(StaticTopology::host_only(0, 2), CollConfig::default());
    let t = Tensor::zeros(&[3], DataType::BF16, Device::Cpu);

    let err = client.allreduce_async(&t, &ReduceOptions::new()).unwrap_err();
    assert!(
        matches!(err, CollError::UnsupportedType { dtype: DataType::BF16, device: Device::Cpu }),
        "{err}"
    );
    assert_eq!(err.kind(), ErrorKind::UnsupportedType);

    // Accelerator tensors need an accelerator build.
    let err = client.broadcast_async(&on_accelerator(), 0, None).unwrap_err();
    assert!(matches!(err, CollError::UnsupportedType { .. }), "{err}");
    assert_eq!(backend.count(), 0);
}

#[test]
fn test_non_contiguous_rejected() {
    let (backend, client) = client_with(StaticTopology::host_only(0, 2), CollConfig::default());
    let m = Tensor::from_slice(&[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3])
        .unwrap()
        .transpose()
        .unwrap();

    let err = client.allgather_async(&m, None).unwrap_err();
    assert!(matches!(err, CollError::NotContiguous { .. }), "{err}");
    assert_eq!(err.kind(), ErrorKind::Layout);

    // Every member of a group is checked, not just the first.
    let ok = Tensor::vector(&[1.0f32]);
    let err = client
        .grouped_allreduce_async(&[ok, m.clone()], &ReduceOptions::new())
        .unwrap_err();
    assert!(matches!(err, CollError::NotContiguous { .. }), "{err}");

    let fixed = m.contiguous().unwrap();
    client.allgather_async(&fixed, None).unwrap();
    assert_eq!(backend.count(), 1);
}

#[test]
fn test_engine_rejection_is_internal() {
    let backend = Arc::new(RecordingBackend::rejecting());
    let client = CollectiveClient::new(
        backend,
        Arc::new(StaticTopology::host_only(0, 2)),
        CollConfig::default(),
    );
    let err = client
        .alltoall_async(&Tensor::vector(&[1.0f32, 2.0]), None, Some("exchange"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
    assert!(err.to_string().contains("exchange"), "{err}");
    assert_eq!(client.pending().unwrap(), 0);
}

#[test]
fn test_custom_capabilities() {
    let (backend, client) = client_with(StaticTopology::host_only(0, 2), CollConfig::default());
    let client = client.with_capabilities(collgrad::CapabilityTable::from_categories([
        TensorCategory::new(DataType::F64, collgrad::DeviceKind::Host),
    ]));

    let err = client
        .allreduce_async(&Tensor::vector(&[1.0f32]), &ReduceOptions::new())
        .unwrap_err();
    assert!(matches!(err, CollError::UnsupportedType { .. }), "{err}");
    client
        .allreduce_async(&Tensor::vector(&[1.0f64]), &ReduceOptions::new())
        .unwrap();
    assert_eq!(backend.count(), 1);
}
