use crate::collective::helpers::{
    CollectiveTag, collective_recv_exact, collective_send, step_tag,
};
use crate::error::Result;
use crate::group::ProcessGroup;
use crate::reduce::reduce_slice;
use crate::types::{DataType, Rank, ReduceOp};

/// Tree reduce: reduce data from all ranks to a single root rank.
///
/// Uses a binomial tree algorithm with O(log N) steps. Handles non-power-of-2
/// group sizes by first reducing excess ranks into the lower power-of-2 set.
/// Operands are combined in tree order, so `op` must be commutative.
///
/// The input is read from `src_ptr`; only the root writes `dst_ptr`.
///
/// # Safety
/// `src_ptr` must be valid for reads and, at the root, `dst_ptr` for writes
/// of `count * dtype.size_in_bytes()` bytes.
#[allow(clippy::too_many_arguments)]
pub(crate) async unsafe fn tree_reduce(
    group: &ProcessGroup,
    src_ptr: u64,
    dst_ptr: u64,
    count: usize,
    dtype: DataType,
    op: ReduceOp,
    root: Rank,
    tag: CollectiveTag,
) -> Result<()> {
    let world = group.size() as usize;
    let rank = group.rank() as usize;
    let root = root as usize;
    group.check_rank(root as Rank)?;

    let total_bytes = count * dtype.size_in_bytes();
    let mut buf = unsafe { group.adapter().load(src_ptr, total_bytes)? };

    if world > 1 {
        let vrank = (rank + world - root) % world;

        let p2 = if world.is_power_of_two() {
            world
        } else {
            world.next_power_of_two() >> 1
        };
        let excess = world - p2;

        let mut participating = true;
        if vrank < excess {
            let partner_real = (vrank + p2 + root) % world;
            let received = collective_recv_exact(
                group,
                partner_real as Rank,
                total_bytes,
                "reduce",
                step_tag(tag, 0),
            )
            .await?;
            reduce_slice(&mut buf, &received, count, dtype, op)?;
        } else if vrank >= p2 {
            let partner_real = (vrank - p2 + root) % world;
            collective_send(group, partner_real as Rank, &buf, "reduce", step_tag(tag, 0))
                .await?;
            participating = false;
        }

        if participating {
            let log2 = p2.trailing_zeros() as usize;
            for round in 0..log2 {
                let mask = 1 << round;
                let partner_vrank = vrank ^ mask;
                let partner_real = ((partner_vrank + root) % world) as Rank;
                let round_tag = step_tag(tag, round + 1);
                if vrank & mask != 0 {
                    collective_send(group, partner_real, &buf, "reduce", round_tag).await?;
                    break;
                }
                let received =
                    collective_recv_exact(group, partner_real, total_bytes, "reduce", round_tag)
                        .await?;
                reduce_slice(&mut buf, &received, count, dtype, op)?;
            }
        }
    }

    if rank == root {
        unsafe { group.adapter().store(&buf, dst_ptr)? };
    }

    Ok(())
}

/// Linear reduce: the root collects every contribution and folds them in
/// rank order, `((x0 op x1) op x2) ...`.
///
/// The combination order is fixed by rank alone, which makes the result
/// bitwise reproducible and correct for non-commutative operators.
///
/// # Safety
/// Same contract as [`tree_reduce`].
#[allow(clippy::too_many_arguments)]
pub(crate) async unsafe fn linear_reduce(
    group: &ProcessGroup,
    src_ptr: u64,
    dst_ptr: u64,
    count: usize,
    dtype: DataType,
    op: ReduceOp,
    root: Rank,
    tag: CollectiveTag,
) -> Result<()> {
    let world = group.size();
    let rank = group.rank();
    group.check_rank(root)?;
    let total_bytes = count * dtype.size_in_bytes();

    if rank != root {
        let data = unsafe { group.adapter().load(src_ptr, total_bytes)? };
        return collective_send(group, root, &data, "reduce", tag).await;
    }

    let own = unsafe { group.adapter().load(src_ptr, total_bytes)? };
    let mut acc: Option<Vec<u8>> = None;
    for r in 0..world {
        let contribution = if r == root {
            own.clone()
        } else {
            collective_recv_exact(group, r, total_bytes, "reduce", tag)
                .await?
                .to_vec()
        };
        match acc.as_mut() {
            None => acc = Some(contribution),
            Some(acc) => reduce_slice(acc, &contribution, count, dtype, op)?,
        }
    }

    if let Some(acc) = acc {
        unsafe { group.adapter().store(&acc, dst_ptr)? };
    }
    Ok(())
}
