use tessera::{DataType, LocalFabric, ReduceOp, SendBuf};
use tessera_han::HanConfig;

use super::helpers::{grid, rank_input, run_han};

#[tokio::test]
async fn test_broadcast_from_every_root() {
    run_han(grid(3, 2), HanConfig::default(), |group, han| async move {
        for root in 0..group.size() {
            let mut data = if group.rank() == root {
                rank_input(root, 10)
            } else {
                vec![0; 10]
            };
            unsafe {
                group
                    .broadcast(data.as_mut_ptr() as u64, 10, DataType::I64, root)
                    .await
                    .unwrap();
            }
            assert_eq!(data, rank_input(root, 10), "rank {} root {root}", group.rank());
        }
        assert_eq!(han.stats().resolutions, 1);
        assert!(!han.is_unsupported(&group));
    })
    .await;
}

#[tokio::test]
async fn test_broadcast_interleaved_locations() {
    let fabric = LocalFabric::builder(6)
        .locations(["p", "q", "q", "p", "p", "q"])
        .build()
        .unwrap();
    run_han(fabric, HanConfig::default(), |group, _han| async move {
        let mut data = if group.rank() == 4 { vec![3.5f32; 7] } else { vec![0.0; 7] };
        unsafe {
            group
                .broadcast(data.as_mut_ptr() as u64, 7, DataType::F32, 4)
                .await
                .unwrap();
        }
        assert_eq!(data, vec![3.5f32; 7]);
    })
    .await;
}

#[tokio::test]
async fn test_reduce_to_every_root() {
    run_han(grid(2, 3), HanConfig::default(), |group, _han| async move {
        let rank = group.rank();
        for root in 0..group.size() {
            let mut data = vec![(rank + 1) as i32; 6];
            unsafe {
                group
                    .reduce(
                        SendBuf::InPlace,
                        data.as_mut_ptr() as u64,
                        6,
                        DataType::I32,
                        ReduceOp::Sum,
                        root,
                    )
                    .await
                    .unwrap();
            }
            if rank == root {
                assert_eq!(data, vec![21; 6], "root {root}");
            } else {
                assert_eq!(data, vec![(rank + 1) as i32; 6], "rank {rank} root {root} changed");
            }
        }
    })
    .await;
}

#[tokio::test]
async fn test_reduce_separate_buffers() {
    run_han(grid(2, 2), HanConfig::default(), |group, _han| async move {
        let rank = group.rank();
        let input = vec![10 - rank as i64, rank as i64];
        let mut output = vec![-1i64; 2];
        unsafe {
            group
                .reduce(
                    SendBuf::Ptr(input.as_ptr() as u64),
                    output.as_mut_ptr() as u64,
                    2,
                    DataType::I64,
                    ReduceOp::Min,
                    3,
                )
                .await
                .unwrap();
        }
        if rank == 3 {
            assert_eq!(output, vec![7, 0]);
        } else {
            assert_eq!(output, vec![-1, -1]);
        }
    })
    .await;
}
