use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tessera::{DataType, ReduceOp, RequestGroup, SendBuf};

use super::helpers::run_collective;

#[tokio::test]
async fn test_iallreduce_wait() {
    run_collective(3, |group| async move {
        let mut data = vec![(group.rank() + 1) as f32; 5];
        let req = unsafe {
            group
                .iallreduce(
                    SendBuf::InPlace,
                    data.as_mut_ptr() as u64,
                    5,
                    DataType::F32,
                    ReduceOp::Sum,
                )
                .unwrap()
        };
        req.wait().await.unwrap();
        assert_eq!(data, vec![6.0f32; 5]);
    })
    .await;
}

#[tokio::test]
async fn test_ibcast_completion_callback() {
    run_collective(4, |group| async move {
        let mut data = if group.rank() == 1 { vec![42u32; 3] } else { vec![0; 3] };
        let hits = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = tokio::sync::oneshot::channel();

        let req = unsafe {
            group
                .ibcast(data.as_mut_ptr() as u64, 3, DataType::U32, 1)
                .unwrap()
        };
        let h = Arc::clone(&hits);
        req.set_completion_callback(move |result| {
            result.unwrap();
            h.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(());
        });

        rx.await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(data, vec![42u32; 3]);
    })
    .await;
}

#[tokio::test]
async fn test_request_group_overlapping_collectives() {
    run_collective(2, |group| async move {
        let rank = group.rank();
        let mut a = vec![rank as i32 + 1; 4];
        let mut b = vec![0f64; 2];
        if rank == 0 {
            b = vec![3.25, 4.5];
        }

        let mut reqs = RequestGroup::new();
        unsafe {
            reqs.push(
                group
                    .iallreduce(SendBuf::InPlace, a.as_mut_ptr() as u64, 4, DataType::I32, ReduceOp::Prod)
                    .unwrap(),
            );
            reqs.push(
                group
                    .ireduce(SendBuf::InPlace, b.as_mut_ptr() as u64, 2, DataType::F64, ReduceOp::Max, 0)
                    .unwrap(),
            );
        }
        assert_eq!(reqs.len(), 2);
        reqs.wait_all().await.unwrap();

        assert_eq!(a, vec![2; 4]);
        if rank == 0 {
            assert_eq!(b, vec![3.25, 4.5]);
        }
    })
    .await;
}
