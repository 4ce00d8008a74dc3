use std::sync::Arc;
use tessera::{
    BasicModule, DataType, LocalFabric, ModuleKind, ReduceOp, SendBuf, TesseraError, TunedModule,
};

use super::helpers::{run_collective, run_on};

#[tokio::test]
async fn test_split_by_parity() {
    run_collective(6, |group| async move {
        let rank = group.rank();
        let color = rank % 2;
        // Reverse order inside each color.
        let key = 100 - rank;
        let sub = group
            .split(color, key, Arc::new(BasicModule::new()))
            .await
            .unwrap();

        assert_eq!(sub.size(), 3);
        assert_eq!(sub.rank(), 2 - rank / 2);
        assert_eq!(sub.coll().unwrap().kind(), ModuleKind::Basic);
        assert_ne!(sub.id(), group.id());

        let mut data = vec![rank as f32];
        unsafe {
            sub.allreduce(
                SendBuf::InPlace,
                data.as_mut_ptr() as u64,
                1,
                DataType::F32,
                ReduceOp::Sum,
            )
            .await
            .unwrap();
        }
        let expected = if color == 0 { 6.0 } else { 9.0 };
        assert_eq!(data[0], expected);
    })
    .await;
}

#[tokio::test]
async fn test_split_shared_groups_by_location() {
    let fabric = LocalFabric::builder(6)
        .locations(["b", "a", "b", "a", "b", "a"])
        .build()
        .unwrap();
    run_on(fabric, Arc::new(TunedModule::new()), |group| async move {
        let rank = group.rank();
        let local = group
            .split_shared(rank, Arc::new(TunedModule::new()))
            .await
            .unwrap();

        assert_eq!(local.size(), 3);
        assert_eq!(local.rank(), rank / 2);
        assert_eq!(local.location(), group.location());
    })
    .await;
}

#[tokio::test]
async fn test_split_shared_without_locality() {
    let fabric = LocalFabric::builder(3).without_locality().build().unwrap();
    run_on(fabric, Arc::new(TunedModule::new()), |group| async move {
        let err = group
            .split_shared(group.rank(), Arc::new(TunedModule::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, TesseraError::TopologyUnavailable { .. }), "{err}");
    })
    .await;
}

#[tokio::test]
async fn test_subgroups_do_not_cross_talk() {
    run_collective(4, |group| async move {
        let rank = group.rank();
        let sub = group
            .split(rank / 2, rank, Arc::new(TunedModule::new()))
            .await
            .unwrap();

        // Run collectives on both groups back to back.
        let mut a = vec![1u64; 2];
        let mut b = vec![1u64; 2];
        unsafe {
            sub.allreduce(SendBuf::InPlace, a.as_mut_ptr() as u64, 2, DataType::U64, ReduceOp::Sum)
                .await
                .unwrap();
            group
                .allreduce(SendBuf::InPlace, b.as_mut_ptr() as u64, 2, DataType::U64, ReduceOp::Sum)
                .await
                .unwrap();
        }
        assert_eq!(a, vec![2, 2]);
        assert_eq!(b, vec![4, 4]);
    })
    .await;
}
