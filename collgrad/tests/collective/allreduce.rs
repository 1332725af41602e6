use collgrad::{CollConfig, DataType, LocalCluster, ReduceOp, ReduceOptions, StaticTopology, Tensor};

use super::helpers::{run_on, run_ranks};

#[test]
fn test_allreduce_sum_4_ranks() {
    run_ranks(4, |client| {
        let v = Tensor::vector(&[1.0f32, 2.0, 3.0]);
        let out = client
            .allreduce(&v, &ReduceOptions::new().op(ReduceOp::Sum))
            .unwrap();
        assert_eq!(out.to_vec::<f32>().unwrap(), vec![4.0, 8.0, 12.0]);
        // The input is left untouched.
        assert_eq!(v.to_vec::<f32>().unwrap(), vec![1.0, 2.0, 3.0]);
    });
}

#[test]
fn test_allreduce_sum_3_ranks_i32() {
    run_ranks(3, |client| {
        let rank = client.rank() as i32;
        let v = Tensor::vector(&[rank + 1; 8]);
        let out = client
            .allreduce(&v, &ReduceOptions::new().op(ReduceOp::Sum))
            .unwrap();
        assert_eq!(out.dtype().unwrap(), DataType::I32);
        assert_eq!(out.to_vec::<i32>().unwrap(), vec![6; 8], "rank {rank}");
    });
}

#[test]
fn test_allreduce_default_op_is_average() {
    run_ranks(4, |client| {
        let v = Tensor::vector(&[client.rank() as f32; 4]);
        let out = client.allreduce(&v, &ReduceOptions::new()).unwrap();
        assert_eq!(out.to_vec::<f32>().unwrap(), vec![1.5; 4]);
    });
}

#[test]
fn test_allreduce_average_with_framework_averaging() {
    // Average becomes Sum plus a world-size divisor; the numbers must not
    // change.
    let topology = StaticTopology::host_only(0, 4)
        .with_accelerator(true)
        .with_framework_averaging();
    let cluster = LocalCluster::with_topology(topology).unwrap();
    run_on(&cluster, CollConfig::default(), |client| {
        let v = Tensor::vector(&[(client.rank() * 2) as f64; 3]);
        let out = client
            .allreduce(&v, &ReduceOptions::new().op(ReduceOp::Average))
            .unwrap();
        assert_eq!(out.to_vec::<f64>().unwrap(), vec![3.0; 3]);
    });
}

#[test]
fn test_allreduce_scale_factors() {
    run_ranks(2, |client| {
        let v = Tensor::vector(&[1.0f32, 2.0]);
        let opts = ReduceOptions::new()
            .op(ReduceOp::Sum)
            .prescale(3.0)
            .postscale(0.5);
        let out = client.allreduce(&v, &opts).unwrap();
        assert_eq!(out.to_vec::<f32>().unwrap(), vec![3.0, 6.0]);
    });
}

#[test]
fn test_allreduce_min_max() {
    run_ranks(3, |client| {
        let r = client.rank() as f32;
        let v = Tensor::vector(&[r, -r]);
        let max = client
            .allreduce(&v, &ReduceOptions::new().op(ReduceOp::Max))
            .unwrap();
        let min = client
            .allreduce(&v, &ReduceOptions::new().op(ReduceOp::Min))
            .unwrap();
        assert_eq!(max.to_vec::<f32>().unwrap(), vec![2.0, 0.0]);
        assert_eq!(min.to_vec::<f32>().unwrap(), vec![0.0, -2.0]);
    });
}

#[test]
fn test_allreduce_adasum_identical_vectors() {
    // Identical contributions combine to the vector itself.
    run_ranks(2, |client| {
        let v = Tensor::vector(&[3.0f64, 4.0]);
        let out = client
            .allreduce(&v, &ReduceOptions::new().op(ReduceOp::Adasum))
            .unwrap();
        assert_eq!(out.to_vec::<f64>().unwrap(), vec![3.0, 4.0]);
    });
}

#[test]
fn test_allreduce_adasum_orthogonal_vectors() {
    // Orthogonal contributions add up.
    run_ranks(2, |client| {
        let v = if client.rank() == 0 {
            Tensor::vector(&[1.0f64, 0.0])
        } else {
            Tensor::vector(&[0.0f64, 2.0])
        };
        let out = client
            .allreduce(&v, &ReduceOptions::new().op(ReduceOp::Adasum))
            .unwrap();
        assert_eq!(out.to_vec::<f64>().unwrap(), vec![1.0, 2.0]);
    });
}

#[test]
fn test_allreduce_in_place() {
    run_ranks(2, |client| {
        let v = Tensor::vector(&[client.rank() as f32 + 1.0; 5]);
        let out = client
            .allreduce_(&v, &ReduceOptions::new().op(ReduceOp::Sum))
            .unwrap();
        assert!(out.same_storage(&v));
        assert_eq!(v.to_vec::<f32>().unwrap(), vec![3.0; 5]);
    });
}

#[test]
fn test_allreduce_named_ops_complete() {
    run_ranks(2, |client| {
        let a = Tensor::vector(&[1.0f32]);
        let b = Tensor::vector(&[10.0f32]);
        let sum = ReduceOptions::new().op(ReduceOp::Sum);
        let ra = client.allreduce(&a, &sum.clone().name("grad.a")).unwrap();
        let rb = client.allreduce(&b, &sum.name("grad.b")).unwrap();
        assert_eq!(ra.to_vec::<f32>().unwrap(), vec![2.0]);
        assert_eq!(rb.to_vec::<f32>().unwrap(), vec![20.0]);
    });
}

#[test]
fn test_allreduce_matrix_keeps_shape() {
    run_ranks(2, |client| {
        let m = Tensor::from_slice(&[1i64, 2, 3, 4, 5, 6], &[2, 3]).unwrap();
        let out = client
            .allreduce(&m, &ReduceOptions::new().op(ReduceOp::Sum))
            .unwrap();
        assert_eq!(out.shape().unwrap(), vec![2, 3]);
        assert_eq!(out.to_vec::<i64>().unwrap(), vec![2, 4, 6, 8, 10, 12]);
    });
}
