use std::sync::Arc;
use std::time::Duration;

use tessera::{DataType, LocalFabric, ReduceOp, SendBuf, TesseraConfig};
use tessera_han::{AllreduceAlgorithm, HanConfig};
use tokio::sync::Barrier;

use super::helpers::{expected_sum, grid, rank_input, run_han, segmented};

#[tokio::test]
async fn test_iallreduce_runs_callback_pipeline() {
    run_han(grid(2, 3), segmented(4), |group, han| async move {
        han.topology(&group).await.unwrap();
        let mut data = rank_input(group.rank(), 27);
        let request = unsafe {
            group
                .iallreduce(
                    SendBuf::InPlace,
                    data.as_mut_ptr() as u64,
                    27,
                    DataType::I64,
                    ReduceOp::Sum,
                )
                .unwrap()
        };
        request.wait().await.unwrap();
        assert_eq!(data, expected_sum(6, 27));
        assert_eq!(han.stats().pipeline_runs, 1);
    })
    .await;
}

#[tokio::test]
async fn test_iallreduce_completion_callback() {
    run_han(grid(2, 2), segmented(2), |group, han| async move {
        han.topology(&group).await.unwrap();
        let mut data = rank_input(group.rank(), 9);
        let (tx, rx) = tokio::sync::oneshot::channel();
        let request = unsafe {
            group
                .iallreduce(
                    SendBuf::InPlace,
                    data.as_mut_ptr() as u64,
                    9,
                    DataType::I64,
                    ReduceOp::Sum,
                )
                .unwrap()
        };
        request.set_completion_callback(move |result| {
            let _ = tx.send(result.is_ok());
        });
        assert!(rx.await.unwrap());
        assert_eq!(data, expected_sum(4, 9));
        assert_eq!(han.stats().pipeline_runs, 1);
    })
    .await;
}

#[tokio::test]
async fn test_iallreduce_before_resolution_uses_fallback() {
    run_han(grid(2, 2), segmented(2), |group, han| async move {
        let mut first = rank_input(group.rank(), 6);
        let mut second = rank_input(group.rank(), 6);
        let requests = unsafe {
            [
                group
                    .iallreduce(
                        SendBuf::InPlace,
                        first.as_mut_ptr() as u64,
                        6,
                        DataType::I64,
                        ReduceOp::Sum,
                    )
                    .unwrap(),
                group
                    .iallreduce(
                        SendBuf::InPlace,
                        second.as_mut_ptr() as u64,
                        6,
                        DataType::I64,
                        ReduceOp::Sum,
                    )
                    .unwrap(),
            ]
        };
        for request in requests {
            request.wait().await.unwrap();
        }
        assert_eq!(first, expected_sum(4, 6));
        assert_eq!(second, expected_sum(4, 6));

        let stats = han.stats();
        assert_eq!(stats.pipeline_runs, 0);
        assert_eq!(stats.resolutions, 0);
        assert_eq!(stats.fallbacks, 2);
    })
    .await;
}

#[tokio::test]
async fn test_overlapping_iallreduce_pipelines() {
    run_han(grid(3, 2), segmented(3), |group, han| async move {
        han.topology(&group).await.unwrap();
        let mut sums = rank_input(group.rank(), 20);
        let mut maxes = vec![group.rank() as f64; 11];
        let first = unsafe {
            group
                .iallreduce(
                    SendBuf::InPlace,
                    sums.as_mut_ptr() as u64,
                    20,
                    DataType::I64,
                    ReduceOp::Sum,
                )
                .unwrap()
        };
        let second = unsafe {
            group
                .iallreduce(
                    SendBuf::InPlace,
                    maxes.as_mut_ptr() as u64,
                    11,
                    DataType::F64,
                    ReduceOp::Max,
                )
                .unwrap()
        };
        second.wait().await.unwrap();
        first.wait().await.unwrap();
        assert_eq!(sums, expected_sum(6, 20));
        assert_eq!(maxes, vec![5.0; 11]);
        assert_eq!(han.stats().pipeline_runs, 2);
    })
    .await;
}

#[tokio::test]
async fn test_iallreduce_non_commutative_falls_back() {
    run_han(grid(2, 2), HanConfig::default(), |group, han| async move {
        let mut data = vec![(group.rank() + 1) as f64; 2];
        let request = unsafe {
            group
                .iallreduce(
                    SendBuf::InPlace,
                    data.as_mut_ptr() as u64,
                    2,
                    DataType::F64,
                    super::helpers::subtract_op(),
                )
                .unwrap()
        };
        request.wait().await.unwrap();
        assert_eq!(data, vec![-8.0; 2]);
        assert_eq!(han.stats().pipeline_runs, 0);
    })
    .await;
}

#[tokio::test]
async fn test_ibcast_then_allreduce_with_skew() {
    run_han(grid(2, 2), segmented(4), |group, han| async move {
        han.topology(&group).await.unwrap();
        let rank = group.rank();
        if rank % 2 == 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let mut shared = if rank == 1 { rank_input(1, 10) } else { vec![0; 10] };
        let request = unsafe {
            group
                .ibcast(shared.as_mut_ptr() as u64, 10, DataType::I64, 1)
                .unwrap()
        };
        let mut data = rank_input(rank, 16);
        unsafe {
            group
                .allreduce(
                    SendBuf::InPlace,
                    data.as_mut_ptr() as u64,
                    16,
                    DataType::I64,
                    ReduceOp::Sum,
                )
                .await
                .unwrap();
        }
        request.wait().await.unwrap();

        assert_eq!(shared, rank_input(1, 10), "rank {rank}");
        assert_eq!(data, expected_sum(4, 16), "rank {rank}");
        assert_eq!(han.stats().fallbacks, 0);
    })
    .await;
}

#[tokio::test]
async fn test_ireduce_mixed_with_blocking_collectives() {
    let config = segmented(2).with_algorithm(AllreduceAlgorithm::Callback);
    run_han(grid(3, 2), config, |group, han| async move {
        han.topology(&group).await.unwrap();
        let rank = group.rank();
        if rank % 2 == 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let mut reduced = vec![(rank + 1) as i32; 5];
        let reduce = unsafe {
            group
                .ireduce(
                    SendBuf::InPlace,
                    reduced.as_mut_ptr() as u64,
                    5,
                    DataType::I32,
                    ReduceOp::Sum,
                    3,
                )
                .unwrap()
        };
        let mut shared = if rank == 4 { vec![2.5f32; 6] } else { vec![0.0; 6] };
        unsafe {
            group
                .broadcast(shared.as_mut_ptr() as u64, 6, DataType::F32, 4)
                .await
                .unwrap();
        }
        let mut summed = rank_input(rank, 7);
        let allreduce = unsafe {
            group
                .iallreduce(
                    SendBuf::InPlace,
                    summed.as_mut_ptr() as u64,
                    7,
                    DataType::I64,
                    ReduceOp::Sum,
                )
                .unwrap()
        };
        allreduce.wait().await.unwrap();
        reduce.wait().await.unwrap();

        if rank == 3 {
            assert_eq!(reduced, vec![21; 5]);
        }
        assert_eq!(shared, vec![2.5f32; 6], "rank {rank}");
        assert_eq!(summed, expected_sum(6, 7), "rank {rank}");
        let stats = han.stats();
        assert_eq!(stats.fallbacks, 0);
        assert_eq!(stats.pipeline_runs, 1);
    })
    .await;
}

#[tokio::test]
async fn test_rooted_requests_before_resolution_use_fallback() {
    run_han(grid(2, 2), HanConfig::default(), |group, han| async move {
        let rank = group.rank();
        let mut shared = if rank == 2 { vec![7i64; 4] } else { vec![0; 4] };
        let mut reduced = vec![rank as i64; 4];
        let requests = unsafe {
            [
                group
                    .ibcast(shared.as_mut_ptr() as u64, 4, DataType::I64, 2)
                    .unwrap(),
                group
                    .ireduce(
                        SendBuf::InPlace,
                        reduced.as_mut_ptr() as u64,
                        4,
                        DataType::I64,
                        ReduceOp::Sum,
                        1,
                    )
                    .unwrap(),
            ]
        };
        for request in requests {
            request.wait().await.unwrap();
        }
        assert_eq!(shared, vec![7; 4]);
        if rank == 1 {
            assert_eq!(reduced, vec![6; 4]);
        }
        let stats = han.stats();
        assert_eq!(stats.resolutions, 0);
        assert_eq!(stats.fallbacks, 2);
    })
    .await;
}

#[tokio::test]
async fn test_dropped_iallreduce_leaves_buffer_untouched() {
    let config = segmented(2).with_algorithm(AllreduceAlgorithm::Callback);
    run_han(grid(2, 2), config, |group, han| async move {
        han.topology(&group).await.unwrap();
        let rank = group.rank();
        let mut data = rank_input(rank, 8);
        let request = unsafe {
            group
                .iallreduce(
                    SendBuf::InPlace,
                    data.as_mut_ptr() as u64,
                    8,
                    DataType::I64,
                    ReduceOp::Sum,
                )
                .unwrap()
        };
        drop(request);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(data, rank_input(rank, 8), "rank {rank}");

        // The group stays usable after the abandoned call.
        unsafe {
            group
                .allreduce(
                    SendBuf::InPlace,
                    data.as_mut_ptr() as u64,
                    8,
                    DataType::I64,
                    ReduceOp::Sum,
                )
                .await
                .unwrap();
        }
        assert_eq!(data, expected_sum(4, 8), "rank {rank}");
        assert_eq!(han.stats().pipeline_runs, 2);
    })
    .await;
}

async fn check_failure_propagates(algorithm: AllreduceAlgorithm) {
    let fabric = LocalFabric::builder(6)
        .uniform_locations(3, 2)
        .config(TesseraConfig::default().with_collective_timeout(Duration::from_millis(300)))
        .build()
        .unwrap();
    let barrier = Arc::new(Barrier::new(6));
    let config = segmented(4).with_algorithm(algorithm);

    run_han(fabric, config, move |group, _han| {
        let barrier = Arc::clone(&barrier);
        async move {
            let mut data = rank_input(group.rank(), 12);
            unsafe {
                group
                    .allreduce(
                        SendBuf::InPlace,
                        data.as_mut_ptr() as u64,
                        12,
                        DataType::I64,
                        ReduceOp::Sum,
                    )
                    .await
                    .unwrap();
            }

            barrier.wait().await;
            if group.rank() == 0 {
                group.fabric().fail_rank(5);
            }
            barrier.wait().await;

            let result = unsafe {
                group
                    .allreduce(
                        SendBuf::InPlace,
                        data.as_mut_ptr() as u64,
                        12,
                        DataType::I64,
                        ReduceOp::Sum,
                    )
                    .await
            };
            let err = result.expect_err("allreduce with a failed rank must fail");
            assert!(err.to_string().contains("han"), "rank {}: {err}", group.rank());
        }
    })
    .await;
}

#[tokio::test]
async fn test_pipelined_failure_propagates() {
    check_failure_propagates(AllreduceAlgorithm::Pipelined).await;
}

#[tokio::test]
async fn test_callback_failure_propagates() {
    check_failure_propagates(AllreduceAlgorithm::Callback).await;
}
