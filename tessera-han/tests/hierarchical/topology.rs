use std::sync::Arc;
use tessera::{LocalFabric, ModuleCatalog, ModuleKind, ProcessGroup, TunedModule};
use tessera_han::{HanConfig, HanModule};

use super::helpers::{CountingModule, grid, init_tracing, run_han};

#[tokio::test]
async fn test_resolve_is_cached() {
    init_tracing();
    let fabric = grid(2, 2);
    let counting = Arc::new(CountingModule::new(Arc::new(TunedModule::new())));
    let groups = ProcessGroup::bootstrap_local(&fabric, Arc::clone(&counting) as _);

    let mut handles = Vec::new();
    for g in groups {
        let han = HanModule::enable(&g, ModuleCatalog::standard(), HanConfig::default()).unwrap();
        handles.push(tokio::spawn(async move {
            let first = han.topology(&g).await.unwrap();
            let second = han.topology(&g).await.unwrap();
            assert!(Arc::ptr_eq(&first, &second));
            assert!(Arc::ptr_eq(first.local(), second.local()));
            assert!(Arc::ptr_eq(first.cross(), second.cross()));
            assert_eq!(first.vranks(), second.vranks());
            assert!(Arc::ptr_eq(&first, &han.cached_topology(&g).unwrap()));
            assert_eq!(han.stats().resolutions, 1);
        }));
    }
    for h in handles {
        h.await.unwrap();
    }
    // One vrank exchange per rank, none for the second resolve.
    assert_eq!(counting.allgathers(), 4);
}

async fn check_vrank_invariant(fabric: Arc<LocalFabric>, locations: u32, per_location: u32) {
    run_han(fabric, HanConfig::default(), move |group, han| async move {
        let topo = han.topology(&group).await.unwrap();
        assert_eq!(topo.local_size(), per_location);
        assert_eq!(topo.location_count(), locations);

        let own = topo.vranks()[group.rank() as usize];
        assert_eq!(own, per_location * topo.cross().rank() + topo.local().rank());

        let mut sorted = topo.vranks().to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..locations * per_location).collect::<Vec<_>>());

        assert_eq!(topo.local().coll().unwrap().kind(), ModuleKind::Tuned);
        assert_eq!(topo.is_local_root(), topo.local().rank() == 0);
    })
    .await;
}

#[tokio::test]
async fn test_vrank_invariant_grid() {
    check_vrank_invariant(grid(3, 2), 3, 2).await;
    check_vrank_invariant(grid(2, 5), 2, 5).await;
}

#[tokio::test]
async fn test_vrank_invariant_interleaved() {
    let fabric = LocalFabric::builder(8)
        .locations(["x", "y", "z", "w", "w", "z", "y", "x"])
        .build()
        .unwrap();
    check_vrank_invariant(fabric, 4, 2).await;
}

#[tokio::test]
async fn test_root_mapping_round_trips() {
    run_han(grid(3, 2), HanConfig::default(), |group, han| async move {
        let topo = han.topology(&group).await.unwrap();
        for root in 0..group.size() {
            let roots = topo.root_ranks(root).unwrap();
            let vrank = topo.vranks()[root as usize];
            assert_eq!(roots.cross_root * topo.local_size() + roots.local_root, vrank);
        }
        assert!(topo.root_ranks(group.size()).is_err());
    })
    .await;
}
