use tessera::{DataType, LocalFabric, ReduceOp, SendBuf};
use tessera_han::{AllreduceAlgorithm, HanConfig};

use super::helpers::{expected_sum, flat_sum, grid, rank_input, run_han, segmented};

const SEG: usize = 8;

async fn check_counts(algorithm: AllreduceAlgorithm, counts: &'static [usize]) {
    let config = segmented(SEG).with_algorithm(algorithm);
    run_han(grid(3, 4), config, move |group, han| async move {
        let rank = group.rank();
        let world = group.size();
        for &count in counts {
            let mut data = rank_input(rank, count);
            unsafe {
                group
                    .allreduce(
                        SendBuf::InPlace,
                        data.as_mut_ptr() as u64,
                        count,
                        DataType::I64,
                        ReduceOp::Sum,
                    )
                    .await
                    .unwrap();
            }

            let mut flat = rank_input(rank, count);
            flat_sum(&group, &han, &mut flat).await;

            assert_eq!(data, flat, "rank {rank} count {count}: differs from flat");
            assert_eq!(data, expected_sum(world, count), "rank {rank} count {count}");
        }
        let expected_runs = counts.iter().filter(|&&c| c > 0).count() as u64;
        let stats = han.stats();
        if algorithm != AllreduceAlgorithm::Simple {
            assert_eq!(stats.pipeline_runs, expected_runs);
        }
        assert_eq!(stats.resolutions, 1);
    })
    .await;
}

#[tokio::test]
async fn test_pipelined_matches_flat_at_segment_boundaries() {
    check_counts(
        AllreduceAlgorithm::Pipelined,
        &[0, 1, SEG - 1, SEG, SEG + 1, 10 * SEG],
    )
    .await;
}

#[tokio::test]
async fn test_callback_matches_flat_at_segment_boundaries() {
    check_counts(
        AllreduceAlgorithm::Callback,
        &[0, 1, SEG - 1, SEG, SEG + 1, 10 * SEG],
    )
    .await;
}

#[tokio::test]
async fn test_simple_matches_flat() {
    check_counts(AllreduceAlgorithm::Simple, &[0, 1, 10 * SEG + 3]).await;
}

#[tokio::test]
async fn test_short_last_segment_stays_in_range() {
    // 2 full segments and a 3-element tail; the sentinel past `count` must
    // survive every stage.
    const COUNT: usize = 2 * SEG + 3;
    const SENTINEL: i64 = -7777;
    run_han(grid(2, 3), segmented(SEG), |group, _han| async move {
        let rank = group.rank();
        let mut data = rank_input(rank, COUNT);
        data.extend([SENTINEL; 4]);

        unsafe {
            group
                .allreduce(
                    SendBuf::InPlace,
                    data.as_mut_ptr() as u64,
                    COUNT,
                    DataType::I64,
                    ReduceOp::Sum,
                )
                .await
                .unwrap();
        }

        let expected = expected_sum(group.size(), COUNT);
        let tail = &data[2 * SEG..COUNT];
        assert_eq!(tail.iter().sum::<i64>(), expected[2 * SEG..].iter().sum::<i64>());
        assert_eq!(&data[..COUNT], &expected[..]);
        assert_eq!(&data[COUNT..], &[SENTINEL; 4]);
    })
    .await;
}

#[tokio::test]
async fn test_separate_send_buffer() {
    run_han(grid(2, 2), segmented(4), |group, _han| async move {
        let rank = group.rank();
        let input = rank_input(rank, 13);
        let mut output = vec![0i64; 13];

        unsafe {
            group
                .allreduce(
                    SendBuf::Ptr(input.as_ptr() as u64),
                    output.as_mut_ptr() as u64,
                    13,
                    DataType::I64,
                    ReduceOp::Sum,
                )
                .await
                .unwrap();
        }

        assert_eq!(output, expected_sum(4, 13));
        assert_eq!(input, rank_input(rank, 13), "input must be untouched");
    })
    .await;
}

#[tokio::test]
async fn test_interleaved_locations() {
    let fabric = LocalFabric::builder(6)
        .locations(["a", "b", "b", "a", "a", "b"])
        .build()
        .unwrap();
    run_han(fabric, segmented(5), |group, han| async move {
        let mut data: Vec<f64> = (0..23).map(|i| (i as f64) * 0.5 + group.rank() as f64).collect();
        unsafe {
            group
                .allreduce(
                    SendBuf::InPlace,
                    data.as_mut_ptr() as u64,
                    23,
                    DataType::F64,
                    ReduceOp::Max,
                )
                .await
                .unwrap();
        }
        let expected: Vec<f64> = (0..23).map(|i| (i as f64) * 0.5 + 5.0).collect();
        assert_eq!(data, expected);
        assert_eq!(han.stats().pipeline_runs, 1);
    })
    .await;
}

#[tokio::test]
async fn test_whole_message_in_one_segment() {
    run_han(grid(2, 2), HanConfig::default(), |group, han| async move {
        let mut data = rank_input(group.rank(), 100);
        unsafe {
            group
                .allreduce(
                    SendBuf::InPlace,
                    data.as_mut_ptr() as u64,
                    100,
                    DataType::I64,
                    ReduceOp::Sum,
                )
                .await
                .unwrap();
        }
        assert_eq!(data, expected_sum(4, 100));
        assert_eq!(han.stats().pipeline_runs, 1);
    })
    .await;
}
