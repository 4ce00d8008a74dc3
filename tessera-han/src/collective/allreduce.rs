use tessera::{DataType, ReduceOp, SendBuf};

use crate::error::{HanError, Result};
use crate::topology::TopologyCache;

/// Unsegmented hierarchical allreduce.
///
/// 1. Reduce onto each local root.
/// 2. Allreduce among the local roots.
/// 3. Broadcast from each local root to its location.
///
/// # Safety
/// `rbuf` and a `SendBuf::Ptr` input must be valid for
/// `count * dtype.size_in_bytes()` bytes.
pub async unsafe fn simple_allreduce(
    topo: &TopologyCache,
    sbuf: SendBuf,
    rbuf: u64,
    count: usize,
    dtype: DataType,
    op: ReduceOp,
) -> Result<()> {
    if !op.is_commutative() {
        return Err(HanError::UnsupportedOperator { op: op.to_string() });
    }
    let (local, cross) = (topo.local(), topo.cross());
    let intra = local.coll()?;

    unsafe {
        intra
            .reduce(local, sbuf, rbuf, count, dtype, op, 0, local.next_collective_tag())
            .await
            .map_err(HanError::stage("local-reduce"))?;

        if topo.is_local_root() {
            let inter = cross.coll()?;
            inter
                .allreduce(
                    cross,
                    SendBuf::InPlace,
                    rbuf,
                    count,
                    dtype,
                    op,
                    cross.next_collective_tag(),
                )
                .await
                .map_err(HanError::stage("cross-allreduce"))?;
        }

        intra
            .broadcast(local, rbuf, count, dtype, 0, local.next_collective_tag())
            .await
            .map_err(HanError::stage("local-broadcast"))
    }
}
