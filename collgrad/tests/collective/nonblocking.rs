use collgrad::{
    CollConfig, CollectiveOutput, ErrorKind, Handle, LocalCluster, ReduceOp, ReduceOptions, Tensor,
};

use super::helpers::run_ranks;

fn sum() -> ReduceOptions {
    ReduceOptions::new().op(ReduceOp::Sum)
}

/// Poll until complete; a completed handle must synchronize without
/// blocking.
#[test]
fn test_poll_then_synchronize() {
    run_ranks(1, |client| {
        let t = Tensor::vector(&[2.0f32; 4]);
        let handle = client.allreduce_async(&t, &sum()).unwrap();
        while !client.poll(handle).unwrap() {
            std::thread::yield_now();
        }
        let out = client.synchronize(handle).unwrap().unwrap();
        assert_eq!(out.into_single().unwrap().to_vec::<f32>().unwrap(), vec![2.0; 4]);
    });
}

#[test]
fn test_pending_until_every_rank_submits() {
    let cluster = LocalCluster::new(2).unwrap();
    let clients = cluster.clients(CollConfig::default()).unwrap();
    let t0 = Tensor::vector(&[1.0f32]);
    let t1 = Tensor::vector(&[5.0f32]);

    let h0 = clients[0].allreduce_async(&t0, &sum()).unwrap();
    assert!(!clients[0].poll(h0).unwrap());
    assert_eq!(clients[0].pending().unwrap(), 1);

    let h1 = clients[1].allreduce_async(&t1, &sum()).unwrap();
    for (client, handle) in clients.iter().zip([h0, h1]) {
        let out = client.synchronize(handle).unwrap().unwrap();
        assert_eq!(out.into_single().unwrap().to_vec::<f32>().unwrap(), vec![6.0]);
        assert_eq!(client.pending().unwrap(), 0);
    }
}

#[test]
fn test_named_ops_match_out_of_order() {
    // Rank 1 submits in the opposite order; names decide the matching.
    let cluster = LocalCluster::new(2).unwrap();
    let clients = cluster.clients(CollConfig::default()).unwrap();
    let a = Tensor::vector(&[1i32]);
    let b = Tensor::vector(&[100i32]);

    let h0a = clients[0].allreduce_async(&a, &sum().name("a")).unwrap();
    let h0b = clients[0].allreduce_async(&b, &sum().name("b")).unwrap();
    let h1b = clients[1].allreduce_async(&b, &sum().name("b")).unwrap();
    let h1a = clients[1].allreduce_async(&a, &sum().name("a")).unwrap();

    let value = |client: &collgrad::CollectiveClient, h: Handle| {
        let out = client.synchronize(h).unwrap().unwrap().into_single().unwrap();
        out.to_vec::<i32>().unwrap()[0]
    };
    assert_eq!(value(&clients[0], h0a), 2);
    assert_eq!(value(&clients[0], h0b), 200);
    assert_eq!(value(&clients[1], h1a), 2);
    assert_eq!(value(&clients[1], h1b), 200);
}

#[test]
fn test_synchronize_consumed_handle_returns_none() {
    run_ranks(2, |client| {
        let t = Tensor::vector(&[1.0f32]);
        let handle = client.allreduce_async(&t, &sum()).unwrap();
        assert!(client.synchronize(handle).unwrap().is_some());
        assert!(client.synchronize(handle).unwrap().is_none());
        assert!(client.poll(handle).unwrap());
    });
}

#[test]
fn test_poll_unknown_handle_is_complete() {
    run_ranks(1, |client| {
        assert!(client.poll(Handle(9_999)).unwrap());
        assert!(client.synchronize(Handle(9_999)).unwrap().is_none());
    });
}

#[test]
fn test_concurrent_handles() {
    run_ranks(4, |client| {
        let r = client.rank() as f32 + 1.0;
        let a = Tensor::vector(&[r; 4]);
        let b = Tensor::vector(&[10.0 * r; 4]);
        let ha = client.allreduce_async(&a, &sum()).unwrap();
        let hb = client.allreduce_async(&b, &sum()).unwrap();
        assert_ne!(ha, hb);
        assert_eq!(client.pending().unwrap(), 2);

        let out_b = client.synchronize(hb).unwrap().unwrap().into_single().unwrap();
        let out_a = client.synchronize(ha).unwrap().unwrap().into_single().unwrap();
        assert_eq!(out_a.to_vec::<f32>().unwrap(), vec![10.0; 4]);
        assert_eq!(out_b.to_vec::<f32>().unwrap(), vec![100.0; 4]);
    });
}

#[test]
fn test_grouped_handle_yields_group() {
    run_ranks(2, |client| {
        let ts = [Tensor::vector(&[1.0f32]), Tensor::vector(&[2.0f32, 3.0])];
        let handle = client.grouped_allreduce_async(&ts, &sum()).unwrap();
        match client.synchronize(handle).unwrap() {
            Some(CollectiveOutput::Group(outs)) => {
                assert_eq!(outs[0].to_vec::<f32>().unwrap(), vec![2.0]);
                assert_eq!(outs[1].to_vec::<f32>().unwrap(), vec![4.0, 6.0]);
            }
            other => panic!("expected a group output, got {other:?}"),
        }
    });
}

#[test]
fn test_nonblocking_broadcast_and_allgather() {
    run_ranks(3, |client| {
        let t = Tensor::vector(&[client.rank() as i64]);
        let hb = client.broadcast_async(&t, 2, None).unwrap();
        let hg = client.allgather_async(&t, None).unwrap();
        let gathered = client.synchronize(hg).unwrap().unwrap().into_single().unwrap();
        let broadcast = client.synchronize(hb).unwrap().unwrap().into_single().unwrap();
        assert_eq!(gathered.to_vec::<i64>().unwrap(), vec![0, 1, 2]);
        assert_eq!(broadcast.to_vec::<i64>().unwrap(), vec![2]);
    });
}

#[test]
fn test_reset_discards_pending() {
    let cluster = LocalCluster::new(2).unwrap();
    let clients = cluster.clients(CollConfig::default()).unwrap();
    let t = Tensor::vector(&[1.0f32]);
    let handle = clients[0].allreduce_async(&t, &sum()).unwrap();

    assert_eq!(clients[0].reset().unwrap(), 1);
    assert_eq!(clients[0].pending().unwrap(), 0);
    // Nothing left to wait for.
    assert!(clients[0].synchronize(handle).unwrap().is_none());
}

#[test]
fn test_auto_names_scope() {
    let cluster = LocalCluster::new(2).unwrap();
    let config = CollConfig {
        name_scope: Some("step7/".into()),
        ..CollConfig::default()
    };
    super::helpers::run_on(&cluster, config, |client| {
        let t = Tensor::vector(&[1u8]);
        let out = client.allreduce(&t, &sum()).unwrap();
        assert_eq!(out.to_vec::<u8>().unwrap(), vec![2]);
    });
}

#[test]
fn test_engine_failure_surfaces_at_synchronize() {
    // Ranks disagree on the broadcast shape; the engine accepts both
    // submissions and fails the collective once it runs.
    run_ranks(2, |client| {
        let t = match client.rank() {
            0 => Tensor::vector(&[1.0f32, 2.0]),
            _ => Tensor::vector(&[1.0f32]),
        };
        let handle = client.broadcast_async(&t, 0, Some("b")).unwrap();
        let err = client.synchronize(handle).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal, "{err}");
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert!(source.is_some_and(|s| s.contains("'b'")), "{err}");

        // The entry is released even though the collective failed.
        assert_eq!(client.pending().unwrap(), 0);
        assert!(client.synchronize(handle).unwrap().is_none());
        assert!(client.poll(handle).unwrap());
    });
}
