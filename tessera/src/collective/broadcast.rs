use crate::collective::helpers::{CollectiveTag, collective_recv_exact, collective_send};
use crate::error::Result;
use crate::group::ProcessGroup;
use crate::types::{DataType, Rank};
use futures::future::try_join_all;

/// Tree broadcast: root sends data to all other ranks via a binary tree.
///
/// Falls back to flat broadcast for groups smaller than the configured
/// `tree_broadcast_threshold`.
///
/// # Safety
/// `ptr` must be valid for at least `count * dtype.size_in_bytes()` bytes.
pub(crate) async unsafe fn tree_broadcast(
    group: &ProcessGroup,
    ptr: u64,
    count: usize,
    dtype: DataType,
    root: Rank,
    tag: CollectiveTag,
) -> Result<()> {
    let world = group.size();
    group.check_rank(root)?;

    if world <= 1 {
        return Ok(());
    }

    if world < group.config().tree_broadcast_threshold {
        return unsafe { flat_broadcast(group, ptr, count, dtype, root, tag).await };
    }

    let rank = group.rank();
    let total_bytes = count * dtype.size_in_bytes();

    // Remap ranks so root becomes logical rank 0.
    let logical = |r: Rank| -> Rank { (r + world - root) % world };
    let physical = |l: Rank| -> Rank { (l + root) % world };
    let my_logical = logical(rank);

    let data = if my_logical == 0 {
        unsafe { group.adapter().load(ptr, total_bytes)? }
    } else {
        let parent = physical((my_logical - 1) / 2);
        let received = collective_recv_exact(group, parent, total_bytes, "broadcast", tag).await?;
        unsafe { group.adapter().store(&received, ptr)? };
        received.to_vec()
    };

    // Send to children concurrently.
    let futs: Vec<_> = [2 * my_logical + 1, 2 * my_logical + 2]
        .into_iter()
        .filter(|&child| child < world)
        .map(|child| collective_send(group, physical(child), &data, "broadcast", tag))
        .collect();
    if !futs.is_empty() {
        try_join_all(futs).await?;
    }

    Ok(())
}

/// Flat broadcast: root sends to all other ranks directly.
///
/// # Safety
/// `ptr` must be valid for at least `count * dtype.size_in_bytes()` bytes.
pub(crate) async unsafe fn flat_broadcast(
    group: &ProcessGroup,
    ptr: u64,
    count: usize,
    dtype: DataType,
    root: Rank,
    tag: CollectiveTag,
) -> Result<()> {
    let world = group.size();
    let rank = group.rank();
    group.check_rank(root)?;
    let total_bytes = count * dtype.size_in_bytes();

    if rank == root {
        let data = unsafe { group.adapter().load(ptr, total_bytes)? };
        let futs: Vec<_> = (0..world)
            .filter(|&r| r != root)
            .map(|r| collective_send(group, r, &data, "broadcast", tag))
            .collect();
        try_join_all(futs).await?;
    } else {
        let received = collective_recv_exact(group, root, total_bytes, "broadcast", tag).await?;
        unsafe { group.adapter().store(&received, ptr)? };
    }

    Ok(())
}
