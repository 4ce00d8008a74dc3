use tessera::DataType;

use super::RootedTags;
use crate::error::{HanError, Result};
use crate::topology::{RootRanks, TopologyCache};

/// Hierarchical broadcast from the rank at `roots`.
///
/// The ranks that share the root's local rank broadcast across locations
/// first, then every location broadcasts from that rank.
///
/// # Safety
/// `ptr` must be valid for `count * dtype.size_in_bytes()` bytes.
pub async unsafe fn hierarchical_broadcast(
    topo: &TopologyCache,
    ptr: u64,
    count: usize,
    dtype: DataType,
    roots: RootRanks,
    tags: RootedTags,
) -> Result<()> {
    let (local, cross) = (topo.local(), topo.cross());

    unsafe {
        if local.rank() == roots.local_root {
            cross
                .coll()?
                .broadcast(cross, ptr, count, dtype, roots.cross_root, tags.cross_tag()?)
                .await
                .map_err(HanError::stage("cross-broadcast"))?;
        }

        local
            .coll()?
            .broadcast(local, ptr, count, dtype, roots.local_root, tags.local)
            .await
            .map_err(HanError::stage("local-broadcast"))
    }
}
