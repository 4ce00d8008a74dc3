use tessera::DataType;

use super::helpers::run_collective;

#[tokio::test]
async fn test_allgather_rank_order() {
    run_collective(4, |group| async move {
        let rank = group.rank();
        let send = vec![rank * 10, rank * 10 + 1];
        let mut recv = vec![0u32; 8];

        unsafe {
            group
                .allgather(
                    send.as_ptr() as u64,
                    recv.as_mut_ptr() as u64,
                    2,
                    DataType::U32,
                )
                .await
                .unwrap();
        }

        assert_eq!(recv, vec![0, 1, 10, 11, 20, 21, 30, 31], "rank {rank}");
    })
    .await;
}
