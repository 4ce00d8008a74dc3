use tessera::{DataType, ReduceOp, SendBuf};

use super::helpers::{run_basic, run_collective, subtract_op};

#[tokio::test]
async fn test_allreduce_2_ranks_f32() {
    run_collective(2, |group| async move {
        let rank = group.rank();
        let mut data = vec![(rank + 1) as f32; 4];
        let ptr = data.as_mut_ptr() as u64;

        unsafe {
            group
                .allreduce(SendBuf::InPlace, ptr, 4, DataType::F32, ReduceOp::Sum)
                .await
                .unwrap();
        }

        assert_eq!(data, vec![3.0f32; 4], "rank {rank} allreduce failed");
    })
    .await;
}

#[tokio::test]
async fn test_allreduce_5_ranks_uneven_chunks() {
    run_collective(5, |group| async move {
        let rank = group.rank();
        let mut data: Vec<i64> = (0..7).map(|i| i * 10 + rank as i64).collect();
        let ptr = data.as_mut_ptr() as u64;

        unsafe {
            group
                .allreduce(SendBuf::InPlace, ptr, 7, DataType::I64, ReduceOp::Sum)
                .await
                .unwrap();
        }

        let expected: Vec<i64> = (0..7).map(|i| i * 50 + 10).collect();
        assert_eq!(data, expected, "rank {rank}");
    })
    .await;
}

#[tokio::test]
async fn test_allreduce_separate_send_buffer() {
    run_collective(3, |group| async move {
        let rank = group.rank();
        let input = vec![rank as u32 + 1; 6];
        let mut output = vec![0u32; 6];

        unsafe {
            group
                .allreduce(
                    SendBuf::Ptr(input.as_ptr() as u64),
                    output.as_mut_ptr() as u64,
                    6,
                    DataType::U32,
                    ReduceOp::Max,
                )
                .await
                .unwrap();
        }

        assert_eq!(output, vec![3u32; 6]);
        assert_eq!(input, vec![rank as u32 + 1; 6], "input must be untouched");
    })
    .await;
}

#[tokio::test]
async fn test_allreduce_zero_count() {
    run_collective(3, |group| async move {
        let mut data: Vec<f32> = Vec::new();
        unsafe {
            group
                .allreduce(
                    SendBuf::InPlace,
                    data.as_mut_ptr() as u64,
                    0,
                    DataType::F32,
                    ReduceOp::Sum,
                )
                .await
                .unwrap();
        }
    })
    .await;
}

#[tokio::test]
async fn test_allreduce_non_commutative_keeps_rank_order() {
    // ((1 - 2) - 3) - 4 = -8 on every rank.
    run_collective(4, |group| async move {
        let mut data = vec![(group.rank() + 1) as f64; 3];
        unsafe {
            group
                .allreduce(
                    SendBuf::InPlace,
                    data.as_mut_ptr() as u64,
                    3,
                    DataType::F64,
                    subtract_op(),
                )
                .await
                .unwrap();
        }
        assert_eq!(data, vec![-8.0f64; 3]);
    })
    .await;
}

#[tokio::test]
async fn test_basic_allreduce_matches_tuned_for_integers() {
    run_basic(6, |group| async move {
        let mut data: Vec<i32> = (0..10).map(|i| i * (group.rank() as i32 + 1)).collect();
        unsafe {
            group
                .allreduce(
                    SendBuf::InPlace,
                    data.as_mut_ptr() as u64,
                    10,
                    DataType::I32,
                    ReduceOp::Sum,
                )
                .await
                .unwrap();
        }
        let expected: Vec<i32> = (0..10).map(|i| i * 21).collect();
        assert_eq!(data, expected);
    })
    .await;
}
