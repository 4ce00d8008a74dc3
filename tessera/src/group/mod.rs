mod collectives;
mod split;

use crate::coll::CollModule;
use crate::collective::{CollectiveTag, TagBlock, collective_tag};
use crate::config::TesseraConfig;
use crate::device::DeviceAdapter;
use crate::error::{Result, TesseraError};
use crate::transport::{LocalFabric, PooledBuf};
use crate::types::Rank;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// An ordered set of participants that run collectives together.
///
/// A group is the view one rank has of a communicator: its own rank and the
/// size, a communicator id that isolates its traffic on the fabric, and the
/// collective module currently installed for it. Groups derived with
/// [`ProcessGroup::split`] share the parent's fabric and are fully independent
/// of the parent afterwards.
///
/// # Example
///
/// ```no_run
/// use tessera::{LocalFabric, ProcessGroup, TunedModule};
/// use std::sync::Arc;
///
/// # fn example() -> tessera::Result<()> {
/// let fabric = LocalFabric::new(4)?;
/// let groups = ProcessGroup::bootstrap_local(&fabric, Arc::new(TunedModule::new()));
///
/// // Each group has a unique rank in [0, size).
/// assert_eq!(groups[0].rank(), 0);
/// assert_eq!(groups[0].size(), 4);
/// # Ok(())
/// # }
/// ```
pub struct ProcessGroup {
    rank: Rank,
    size: u32,
    /// Communicator ID. 0 = the bootstrap (world) group.
    comm_id: u32,
    /// Local rank -> global (fabric) rank.
    rank_map: Vec<Rank>,
    fabric: Arc<LocalFabric>,
    /// Counter for collective tags. All members advance it in lockstep
    /// because collectives are called in the same order everywhere.
    collective_seq: AtomicU64,
    /// Split generation counter, also advanced in lockstep; mixed into
    /// derived comm_ids.
    split_generation: AtomicU64,
    coll: RwLock<Arc<dyn CollModule>>,
}

impl ProcessGroup {
    pub(crate) fn new(
        rank: Rank,
        comm_id: u32,
        rank_map: Vec<Rank>,
        fabric: Arc<LocalFabric>,
        coll: Arc<dyn CollModule>,
    ) -> Self {
        Self {
            rank,
            size: rank_map.len() as u32,
            comm_id,
            rank_map,
            fabric,
            // Sequence 0 is reserved so no collective tag is ever zero.
            collective_seq: AtomicU64::new(1),
            split_generation: AtomicU64::new(0),
            coll: RwLock::new(coll),
        }
    }

    /// Create the world group for every rank of `fabric`, all with `coll`
    /// installed.
    pub fn bootstrap_local(
        fabric: &Arc<LocalFabric>,
        coll: Arc<dyn CollModule>,
    ) -> Vec<Arc<ProcessGroup>> {
        let world = fabric.world_size();
        let rank_map: Vec<Rank> = (0..world).collect();
        (0..world)
            .map(|r| {
                Arc::new(ProcessGroup::new(
                    r,
                    0,
                    rank_map.clone(),
                    Arc::clone(fabric),
                    Arc::clone(&coll),
                ))
            })
            .collect()
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Communicator id; stable for the lifetime of the group.
    pub fn id(&self) -> u32 {
        self.comm_id
    }

    /// This member's rank on the fabric.
    pub fn global_rank(&self) -> Rank {
        self.rank_map[self.rank as usize]
    }

    /// Translate a rank in this group into a fabric rank.
    pub fn global_rank_of(&self, rank: Rank) -> Result<Rank> {
        self.rank_map
            .get(rank as usize)
            .copied()
            .ok_or(TesseraError::InvalidRank {
                rank,
                world_size: self.size,
            })
    }

    /// Location label of this member, if the fabric carries one.
    pub fn location(&self) -> Option<&str> {
        self.fabric.location(self.global_rank())
    }

    pub fn fabric(&self) -> &Arc<LocalFabric> {
        &self.fabric
    }

    pub fn config(&self) -> &TesseraConfig {
        self.fabric.config()
    }

    pub fn adapter(&self) -> &Arc<dyn DeviceAdapter> {
        self.fabric.adapter()
    }

    /// The collective module currently serving this group.
    pub fn coll(&self) -> Result<Arc<dyn CollModule>> {
        let guard = self
            .coll
            .read()
            .map_err(|_| TesseraError::LockPoisoned("collective module"))?;
        Ok(Arc::clone(&*guard))
    }

    /// Install `module` for this group, returning the one it replaces.
    pub fn set_coll(&self, module: Arc<dyn CollModule>) -> Result<Arc<dyn CollModule>> {
        let mut guard = self
            .coll
            .write()
            .map_err(|_| TesseraError::LockPoisoned("collective module"))?;
        Ok(std::mem::replace(&mut *guard, module))
    }

    /// Allocate the tag for the next collective on this group.
    pub fn next_collective_tag(&self) -> CollectiveTag {
        collective_tag(self.collective_seq.fetch_add(1, Ordering::Relaxed))
    }

    /// Allocate `n` consecutive collective tags at once.
    pub fn reserve_collective_tags(&self, n: usize) -> TagBlock {
        let n = n as u64;
        let first = self.collective_seq.fetch_add(n, Ordering::Relaxed);
        TagBlock::new(first, n)
    }

    pub(crate) fn check_rank(&self, rank: Rank) -> Result<()> {
        if rank >= self.size {
            return Err(TesseraError::InvalidRank {
                rank,
                world_size: self.size,
            });
        }
        Ok(())
    }

    pub(crate) fn send_to(&self, dest: Rank, tag: CollectiveTag, data: &[u8]) -> Result<()> {
        let dst = self.global_rank_of(dest)?;
        self.fabric
            .send(self.comm_id, self.global_rank(), dst, tag, data)
    }

    pub(crate) async fn recv_from(&self, src: Rank, tag: CollectiveTag) -> Result<PooledBuf> {
        let src = self.global_rank_of(src)?;
        let timeout = self.config().collective_timeout;
        self.fabric
            .recv(self.comm_id, src, self.global_rank(), tag, timeout)
            .await
    }
}

impl std::fmt::Debug for ProcessGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessGroup")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .field("comm_id", &self.comm_id)
            .finish()
    }
}
