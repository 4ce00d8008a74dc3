use crate::collective::broadcast::flat_broadcast;
use crate::collective::helpers::{
    ChunkLayout, CollectiveTag, collective_recv_exact, collective_send, step_tag,
};
use crate::collective::reduce::linear_reduce;
use crate::error::Result;
use crate::group::ProcessGroup;
use crate::reduce::reduce_slice;
use crate::types::{DataType, ReduceOp};

/// Ring-allreduce.
///
/// Algorithm:
/// 1. Scatter-reduce: N-1 rounds. Each rank sends one chunk to the next rank
///    and receives one chunk from the previous rank, reducing it.
/// 2. Allgather: N-1 rounds. Each rank sends its fully-reduced chunk to the
///    next rank and receives from the previous rank.
///
/// Input is read from `src_ptr`; every rank receives the result in `dst_ptr`.
///
/// # Safety
/// Both pointers must be valid for `count * dtype.size_in_bytes()` bytes.
pub(crate) async unsafe fn ring_allreduce(
    group: &ProcessGroup,
    src_ptr: u64,
    dst_ptr: u64,
    count: usize,
    dtype: DataType,
    op: ReduceOp,
    tag: CollectiveTag,
) -> Result<()> {
    let world = group.size() as usize;
    let rank = group.rank() as usize;

    let elem_size = dtype.size_in_bytes();
    let total_bytes = count * elem_size;
    let mut buf = unsafe { group.adapter().load(src_ptr, total_bytes)? };

    if world > 1 {
        let layout = ChunkLayout::new(count, world);
        let next = ((rank + 1) % world) as u32;
        let prev = ((rank + world - 1) % world) as u32;

        // Phase 1: Scatter-reduce (N-1 rounds).
        for step in 0..(world - 1) {
            let send_idx = (rank + world - step) % world;
            let send_off = layout.offsets[send_idx] * elem_size;
            let send_len = layout.chunk_count(send_idx) * elem_size;

            let recv_idx = (rank + world - step - 1) % world;
            let recv_off = layout.offsets[recv_idx] * elem_size;
            let recv_count = layout.chunk_count(recv_idx);
            let recv_len = recv_count * elem_size;

            // Send and recv touch different chunks; snapshot the send side
            // so the receive can borrow `buf` mutably afterwards.
            let send_snapshot = buf[send_off..send_off + send_len].to_vec();
            let round_tag = step_tag(tag, step);

            let (_, received) = tokio::try_join!(
                collective_send(group, next, &send_snapshot, "allreduce", round_tag),
                collective_recv_exact(group, prev, recv_len, "allreduce", round_tag),
            )?;
            reduce_slice(
                &mut buf[recv_off..recv_off + recv_len],
                &received,
                recv_count,
                dtype,
                op,
            )?;
        }

        // Phase 2: Allgather (N-1 rounds).
        for step in 0..(world - 1) {
            let send_idx = (rank + world + 1 - step) % world;
            let send_off = layout.offsets[send_idx] * elem_size;
            let send_len = layout.chunk_count(send_idx) * elem_size;

            let recv_idx = (rank + world - step) % world;
            let recv_off = layout.offsets[recv_idx] * elem_size;
            let recv_len = layout.chunk_count(recv_idx) * elem_size;

            let send_snapshot = buf[send_off..send_off + send_len].to_vec();
            let round_tag = step_tag(tag, world + step);

            let (_, received) = tokio::try_join!(
                collective_send(group, next, &send_snapshot, "allreduce", round_tag),
                collective_recv_exact(group, prev, recv_len, "allreduce", round_tag),
            )?;
            buf[recv_off..recv_off + recv_len].copy_from_slice(&received);
        }
    }

    unsafe { group.adapter().store(&buf, dst_ptr)? };

    Ok(())
}

/// Linear allreduce: rank-ordered reduce to rank 0, then a flat broadcast.
///
/// Bitwise reproducible for a given group, and safe for non-commutative
/// operators.
///
/// # Safety
/// Both pointers must be valid for `count * dtype.size_in_bytes()` bytes.
pub(crate) async unsafe fn linear_allreduce(
    group: &ProcessGroup,
    src_ptr: u64,
    dst_ptr: u64,
    count: usize,
    dtype: DataType,
    op: ReduceOp,
    tag: CollectiveTag,
) -> Result<()> {
    unsafe {
        linear_reduce(group, src_ptr, dst_ptr, count, dtype, op, 0, step_tag(tag, 0)).await?;
        flat_broadcast(group, dst_ptr, count, dtype, 0, step_tag(tag, 1)).await
    }
}
