use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tessera::{CollModule, DataType, ProcessGroup, Rank, TesseraError};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::error::{HanError, Result};

/// The two-level decomposition of one group, from this rank's perspective.
///
/// `local` holds every rank that shares this rank's location; `cross` holds
/// the ranks at other locations with the same local rank as this one. Ranks
/// are renumbered into virtual ranks `local_size * cross_rank + local_rank`.
pub struct TopologyCache {
    local: Arc<ProcessGroup>,
    cross: Arc<ProcessGroup>,
    /// Virtual rank of every rank of the original group, indexed by rank.
    vranks: Vec<u32>,
}

/// Where a rooted collective's root sits in the decomposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootRanks {
    /// Rank of the root's location within a cross subgroup.
    pub cross_root: Rank,
    /// Rank of the root within its local subgroup.
    pub local_root: Rank,
}

impl TopologyCache {
    pub fn local(&self) -> &Arc<ProcessGroup> {
        &self.local
    }

    pub fn cross(&self) -> &Arc<ProcessGroup> {
        &self.cross
    }

    pub fn vranks(&self) -> &[u32] {
        &self.vranks
    }

    pub fn local_size(&self) -> u32 {
        self.local.size()
    }

    /// Number of distinct locations.
    pub fn location_count(&self) -> u32 {
        self.cross.size()
    }

    /// True on the rank that represents its location in the cross stages.
    pub fn is_local_root(&self) -> bool {
        self.local.rank() == 0
    }

    /// One location, or one rank per location: either level would carry the
    /// whole collective on its own.
    pub fn is_degenerate(&self) -> bool {
        self.location_count() == 1 || self.local_size() == 1
    }

    /// Map a rank of the original group onto its cross and local ranks.
    pub fn root_ranks(&self, root: Rank) -> Result<RootRanks> {
        let vrank = self.vranks.get(root as usize).copied().ok_or_else(|| {
            HanError::Tessera(TesseraError::InvalidRank {
                rank: root,
                world_size: self.vranks.len() as u32,
            })
        })?;
        Ok(split_vrank(vrank, self.local_size()))
    }
}

impl std::fmt::Debug for TopologyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopologyCache")
            .field("local", &self.local)
            .field("cross", &self.cross)
            .field("vranks", &self.vranks)
            .finish()
    }
}

fn split_vrank(vrank: u32, local_size: u32) -> RootRanks {
    RootRanks {
        cross_root: vrank / local_size,
        local_root: vrank % local_size,
    }
}

/// Builds and caches the decomposition of each group this module serves.
///
/// Subgroups are created with the modules passed in here, and the virtual
/// rank exchange runs on `fallback`, so resolving never re-enters the
/// hierarchical module.
pub struct TopologyResolver {
    fallback: Arc<dyn CollModule>,
    intra: Arc<dyn CollModule>,
    inter: Arc<dyn CollModule>,
    /// Keyed by (communicator id, fabric rank). Each cell is initialized once;
    /// a failed initialization leaves it empty.
    cells: Mutex<HashMap<(u32, Rank), Arc<OnceCell<Arc<TopologyCache>>>>>,
}

impl TopologyResolver {
    pub fn new(
        fallback: Arc<dyn CollModule>,
        intra: Arc<dyn CollModule>,
        inter: Arc<dyn CollModule>,
    ) -> Self {
        Self {
            fallback,
            intra,
            inter,
            cells: Mutex::new(HashMap::new()),
        }
    }

    /// Return the decomposition of `group`, building it on first use.
    ///
    /// Collective over `group` the first time it is called for that group.
    /// Concurrent callers for the same group wait for a single build.
    pub async fn resolve(&self, group: &Arc<ProcessGroup>) -> Result<Arc<TopologyCache>> {
        let cell = self.cell(group)?;
        cell.get_or_try_init(|| self.build(group))
            .await
            .map(Arc::clone)
    }

    /// The cached decomposition of `group`, if one was built.
    pub fn cached(&self, group: &ProcessGroup) -> Option<Arc<TopologyCache>> {
        let cells = self.cells.lock().ok()?;
        cells
            .get(&(group.id(), group.global_rank()))
            .and_then(|cell| cell.get().cloned())
    }

    fn cell(&self, group: &ProcessGroup) -> Result<Arc<OnceCell<Arc<TopologyCache>>>> {
        let mut cells = self
            .cells
            .lock()
            .map_err(|_| TesseraError::LockPoisoned("topology cache"))?;
        Ok(Arc::clone(
            cells
                .entry((group.id(), group.global_rank()))
                .or_default(),
        ))
    }

    async fn build(&self, group: &Arc<ProcessGroup>) -> Result<Arc<TopologyCache>> {
        let rank = group.rank();

        let local = group
            .split_shared(rank, Arc::clone(&self.intra))
            .await
            .map_err(split_error)?;
        let cross = group
            .split(local.rank(), rank, Arc::clone(&self.inter))
            .await
            .map_err(split_error)?;

        let local_size = local.size();
        let vrank = local_size * cross.rank() + local.rank();

        // [local_size, vrank] per rank.
        let send = [local_size, vrank];
        let mut recv = vec![0u32; 2 * group.size() as usize];
        let tag = group.next_collective_tag();
        unsafe {
            self.fallback
                .allgather(
                    group,
                    send.as_ptr() as u64,
                    recv.as_mut_ptr() as u64,
                    2,
                    DataType::U32,
                    tag,
                )
                .await
                .map_err(HanError::stage("vrank exchange"))?;
        }

        let vranks = match check_layout(&recv) {
            Ok(vranks) => vranks,
            Err(e) => {
                warn!(comm_id = group.id(), rank, error = %e, "rejecting topology");
                return Err(e);
            }
        };

        debug!(
            comm_id = group.id(),
            rank,
            vrank,
            local_size,
            locations = cross.size(),
            "resolved topology"
        );

        Ok(Arc::new(TopologyCache {
            local,
            cross,
            vranks,
        }))
    }
}

impl std::fmt::Debug for TopologyResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopologyResolver")
            .field("fallback", &self.fallback.kind())
            .field("intra", &self.intra.kind())
            .field("inter", &self.inter.kind())
            .finish()
    }
}

fn split_error(e: TesseraError) -> HanError {
    match e {
        TesseraError::TopologyUnavailable { reason } | TesseraError::SplitFailed { reason } => {
            HanError::UnsupportedTopology { reason }
        }
        other => HanError::stage("subgroup split")(other),
    }
}

/// Validate gathered `[local_size, vrank]` records and extract the vranks.
///
/// Every location must hold the same number of ranks, and the vranks must
/// number the group densely.
fn check_layout(records: &[u32]) -> Result<Vec<u32>> {
    let world = records.len() / 2;
    let mut seen = vec![false; world];
    let mut vranks = Vec::with_capacity(world);
    let expected_size = records.first().copied().unwrap_or(0);

    for (r, rec) in records.chunks_exact(2).enumerate() {
        let (local_size, vrank) = (rec[0], rec[1]);
        if local_size != expected_size {
            return Err(HanError::UnsupportedTopology {
                reason: format!(
                    "uneven locations: rank {r} shares its location with {local_size} ranks, rank 0 with {expected_size}"
                ),
            });
        }
        match seen.get_mut(vrank as usize) {
            Some(slot) if !*slot => *slot = true,
            _ => {
                return Err(HanError::UnsupportedTopology {
                    reason: format!("virtual rank {vrank} of rank {r} is out of range or taken"),
                });
            }
        }
        vranks.push(vrank);
    }
    Ok(vranks)
}
