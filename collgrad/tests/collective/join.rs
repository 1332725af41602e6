use collgrad::{Device, ReduceOp, ReduceOptions, Tensor};

use super::helpers::{collect_ranks, run_ranks};

#[test]
fn test_join_single_rank() {
    run_ranks(1, |client| {
        assert_eq!(client.join(Device::Cpu).unwrap(), 0);
    });
}

#[test]
fn test_joined_rank_contributes_zeros() {
    // Rank 2 runs out of work first; the others keep reducing without it.
    let results = collect_ranks(3, |client| {
        let mut reduced = None;
        if client.rank() != 2 {
            let t = Tensor::vector(&[client.rank() as f32 + 1.0; 2]);
            let out = client
                .allreduce(&t, &ReduceOptions::new().op(ReduceOp::Sum).name("tail"))
                .unwrap();
            reduced = Some(out.to_vec::<f32>().unwrap());
        }
        let last = client.join(Device::Cpu).unwrap();
        (reduced, last)
    });

    assert_eq!(results[0].0.as_deref(), Some(&[3.0f32, 3.0][..]));
    assert_eq!(results[1].0.as_deref(), Some(&[3.0f32, 3.0][..]));
    assert!(results[2].0.is_none());

    // Every rank learns the same last joiner.
    let last = results[0].1;
    assert!(results.iter().all(|(_, l)| *l == last));
    assert!(last < 3);
}

#[test]
fn test_join_all_ranks_reports_same_last() {
    let lasts = collect_ranks(4, |client| client.join(Device::Cpu).unwrap());
    assert!(lasts.windows(2).all(|w| w[0] == w[1]));
    assert!(lasts[0] < 4);
}

#[test]
fn test_join_is_reusable() {
    // State resets once everyone has joined.
    run_ranks(2, |client| {
        client.join(Device::Cpu).unwrap();
        let t = Tensor::vector(&[1i32]);
        let out = client
            .allreduce(&t, &ReduceOptions::new().op(ReduceOp::Sum))
            .unwrap();
        assert_eq!(out.to_vec::<i32>().unwrap(), vec![2]);
        client.join(Device::Cpu).unwrap();
    });
}
