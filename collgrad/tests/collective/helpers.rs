use std::sync::Mutex;

use collgrad::{CollConfig, CollectiveClient, LocalCluster};

/// Helper: run `f` once per rank of a fresh host-only cluster, each on its
/// own thread. Panics in any rank fail the test.
pub fn run_ranks<F>(world_size: u32, f: F)
where
    F: Fn(&CollectiveClient) + Sync,
{
    let cluster = LocalCluster::new(world_size).unwrap();
    run_on(&cluster, CollConfig::default(), f);
}

/// Same as [`run_ranks`] on a caller-built cluster.
pub fn run_on<F>(cluster: &LocalCluster, config: CollConfig, f: F)
where
    F: Fn(&CollectiveClient) + Sync,
{
    let clients = cluster.clients(config).unwrap();
    std::thread::scope(|s| {
        for client in &clients {
            let f = &f;
            s.spawn(move || f(client));
        }
    });
}

/// Run `f` on every rank and collect the per-rank results in rank order.
pub fn collect_ranks<T, F>(world_size: u32, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(&CollectiveClient) -> T + Sync,
{
    let results = Mutex::new(Vec::new());
    run_ranks(world_size, |client| {
        let value = f(client);
        results.lock().unwrap().push((client.rank(), value));
    });
    let mut results = results.into_inner().unwrap();
    results.sort_by_key(|(rank, _)| *rank);
    results.into_iter().map(|(_, v)| v).collect()
}
