use tessera::{DataType, Rank, ReduceOp, SendBuf};

use super::RootedTags;
use crate::error::{HanError, Result};
use crate::topology::{RootRanks, TopologyCache};

/// Hierarchical reduce to `root` (a rank of the original group), whose
/// place in the decomposition is `roots`.
///
/// Every location reduces onto the rank holding the root's local rank, and
/// those ranks reduce across locations onto the root. Intermediate ranks
/// stage their partial result in a scratch buffer, so only the root's
/// `rbuf` is written.
///
/// # Safety
/// At the root, `rbuf` must be valid for `count * dtype.size_in_bytes()`
/// bytes; a `SendBuf::Ptr` input (or `rbuf` for `InPlace`) must be readable
/// for as many bytes on every rank.
#[allow(clippy::too_many_arguments)]
pub async unsafe fn hierarchical_reduce(
    topo: &TopologyCache,
    rank: Rank,
    sbuf: SendBuf,
    rbuf: u64,
    count: usize,
    dtype: DataType,
    op: ReduceOp,
    root: Rank,
    roots: RootRanks,
    tags: RootedTags,
) -> Result<()> {
    if !op.is_commutative() {
        return Err(HanError::UnsupportedOperator { op: op.to_string() });
    }
    let (local, cross) = (topo.local(), topo.cross());
    let holds_local_result = local.rank() == roots.local_root;
    let is_root = rank == root;

    let mut scratch = Vec::new();
    let partial = if holds_local_result && !is_root {
        scratch.resize(count * dtype.size_in_bytes(), 0u8);
        scratch.as_mut_ptr() as u64
    } else {
        rbuf
    };

    unsafe {
        local
            .coll()?
            .reduce(
                local,
                SendBuf::Ptr(sbuf.resolve(rbuf)),
                partial,
                count,
                dtype,
                op,
                roots.local_root,
                tags.local,
            )
            .await
            .map_err(HanError::stage("local-reduce"))?;

        if holds_local_result {
            let input = if is_root {
                SendBuf::InPlace
            } else {
                SendBuf::Ptr(partial)
            };
            cross
                .coll()?
                .reduce(
                    cross,
                    input,
                    partial,
                    count,
                    dtype,
                    op,
                    roots.cross_root,
                    tags.cross_tag()?,
                )
                .await
                .map_err(HanError::stage("cross-reduce"))?;
        }
    }
    Ok(())
}
