mod allreduce;
mod broadcast;
mod reduce;

pub use allreduce::simple_allreduce;
pub use broadcast::hierarchical_broadcast;
pub use reduce::hierarchical_reduce;

use tessera::CollectiveTag;

use crate::error::{HanError, Result};
use crate::topology::{RootRanks, TopologyCache};

/// Subgroup tags for one rooted collective.
///
/// Taken when the collective is issued, so that a collective started now and
/// run later still uses the tags of its place in the call sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootedTags {
    pub local: CollectiveTag,
    /// Only on the ranks that share the root's local rank.
    pub cross: Option<CollectiveTag>,
}

impl RootedTags {
    /// Take the next tags on the subgroups this rank uses for a collective
    /// rooted at `roots`.
    pub fn take(topo: &TopologyCache, roots: RootRanks) -> Self {
        let cross = (topo.local().rank() == roots.local_root)
            .then(|| topo.cross().next_collective_tag());
        Self {
            local: topo.local().next_collective_tag(),
            cross,
        }
    }

    fn cross_tag(&self) -> Result<CollectiveTag> {
        self.cross.ok_or_else(|| HanError::ResourceExhaustion {
            what: "no cross subgroup tag reserved on this rank".into(),
        })
    }
}
