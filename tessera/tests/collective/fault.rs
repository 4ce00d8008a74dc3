use std::sync::Arc;
use std::time::Duration;
use tessera::{DataType, LocalFabric, ReduceOp, SendBuf, TesseraConfig, TesseraError, TunedModule};

use super::helpers::run_on;

#[tokio::test]
async fn test_failed_peer_surfaces_error() {
    let fabric = LocalFabric::builder(3)
        .config(TesseraConfig::default().with_collective_timeout(Duration::from_millis(200)))
        .build()
        .unwrap();
    fabric.fail_rank(2);

    run_on(fabric, Arc::new(TunedModule::new()), |group| async move {
        let mut data = vec![1.0f32; 4];
        let result = unsafe {
            group
                .allreduce(
                    SendBuf::InPlace,
                    data.as_mut_ptr() as u64,
                    4,
                    DataType::F32,
                    ReduceOp::Sum,
                )
                .await
        };
        assert!(result.is_err(), "rank {} should fail", group.rank());
    })
    .await;
}

#[tokio::test]
async fn test_missing_peer_times_out() {
    let fabric = LocalFabric::builder(2)
        .config(TesseraConfig::default().with_collective_timeout(Duration::from_millis(50)))
        .build()
        .unwrap();
    let groups = tessera::ProcessGroup::bootstrap_local(&fabric, Arc::new(TunedModule::new()));

    // Only rank 0 participates.
    let mut data = vec![0u8; 4];
    let err = unsafe {
        groups[0]
            .broadcast(data.as_mut_ptr() as u64, 4, DataType::U8, 1)
            .await
    }
    .unwrap_err();
    match err {
        TesseraError::CollectiveFailed { reason, .. } => {
            assert!(reason.contains("timed out"), "{reason}")
        }
        other => panic!("unexpected error: {other}"),
    }
}
