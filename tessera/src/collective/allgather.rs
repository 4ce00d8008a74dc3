use crate::collective::helpers::{
    CollectiveTag, collective_recv_exact, collective_send, step_tag,
};
use crate::error::Result;
use crate::group::ProcessGroup;
use crate::types::DataType;

/// Ring allgather: each rank contributes `count` elements, result is all
/// contributions concatenated in rank order.
///
/// Uses N-1 ring rounds where each rank forwards the latest received chunk
/// to its successor.
///
/// # Safety
/// - `send_ptr` must point to at least `count * dtype.size_in_bytes()` bytes.
/// - `recv_ptr` must point to at least `count * group.size() * dtype.size_in_bytes()` bytes.
pub(crate) async unsafe fn ring_allgather(
    group: &ProcessGroup,
    send_ptr: u64,
    recv_ptr: u64,
    count: usize,
    dtype: DataType,
    tag: CollectiveTag,
) -> Result<()> {
    let world = group.size() as usize;
    let rank = group.rank() as usize;

    let chunk_bytes = count * dtype.size_in_bytes();
    let total_bytes = chunk_bytes * world;

    // Place our own data at position `rank`.
    let mut buf = vec![0u8; total_bytes];
    let own_data = unsafe { group.adapter().load(send_ptr, chunk_bytes)? };
    buf[rank * chunk_bytes..(rank + 1) * chunk_bytes].copy_from_slice(&own_data);

    let next = ((rank + 1) % world) as u32;
    let prev = ((rank + world - 1) % world) as u32;

    for step in 0..world.saturating_sub(1) {
        let send_idx = (rank + world - step) % world;
        let recv_idx = (rank + world - step - 1) % world;

        let send_data = buf[send_idx * chunk_bytes..(send_idx + 1) * chunk_bytes].to_vec();

        let round_tag = step_tag(tag, step);
        let (_, received) = tokio::try_join!(
            collective_send(group, next, &send_data, "allgather", round_tag),
            collective_recv_exact(group, prev, chunk_bytes, "allgather", round_tag),
        )?;
        buf[recv_idx * chunk_bytes..(recv_idx + 1) * chunk_bytes].copy_from_slice(&received);
    }

    unsafe { group.adapter().store(&buf, recv_ptr)? };

    Ok(())
}
