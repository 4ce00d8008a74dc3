use tessera::DataType;

use super::helpers::{run_basic, run_collective};

#[tokio::test]
async fn test_broadcast_tree_path() {
    // Above the default tree threshold.
    run_collective(7, |group| async move {
        let rank = group.rank();
        let mut data: Vec<u64> = if rank == 2 {
            (100..116).collect()
        } else {
            vec![0; 16]
        };

        unsafe {
            group
                .broadcast(data.as_mut_ptr() as u64, 16, DataType::U64, 2)
                .await
                .unwrap();
        }

        assert_eq!(data, (100..116).collect::<Vec<u64>>(), "rank {rank}");
    })
    .await;
}

#[tokio::test]
async fn test_broadcast_flat_path() {
    run_basic(3, |group| async move {
        let mut data = if group.rank() == 0 {
            vec![1.5f64, -2.5]
        } else {
            vec![0.0; 2]
        };
        unsafe {
            group
                .broadcast(data.as_mut_ptr() as u64, 2, DataType::F64, 0)
                .await
                .unwrap();
        }
        assert_eq!(data, vec![1.5, -2.5]);
    })
    .await;
}

#[tokio::test]
async fn test_broadcast_single_rank() {
    run_collective(1, |group| async move {
        let mut data = vec![9u8; 3];
        unsafe {
            group
                .broadcast(data.as_mut_ptr() as u64, 3, DataType::U8, 0)
                .await
                .unwrap();
        }
        assert_eq!(data, vec![9u8; 3]);
    })
    .await;
}
