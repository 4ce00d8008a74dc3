use crate::config::TesseraConfig;
use crate::device::{CpuAdapter, DeviceAdapter};
use crate::error::{Result, TesseraError};
use crate::transport::buffer_pool::{BufferPool, PooledBuf};
use crate::types::Rank;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Addresses one ordered message stream into a rank's mailbox:
/// `(comm_id, source global rank, tag)`.
type LaneKey = (u32, Rank, u64);

/// A lane. Lazily created by whichever side touches it first; the receiver
/// is parked here between receives and claimed while a receive is pending.
struct Lane {
    tx: mpsc::UnboundedSender<PooledBuf>,
    rx: Option<mpsc::UnboundedReceiver<PooledBuf>>,
}

impl Lane {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx: Some(rx) }
    }
}

#[derive(Default)]
struct Mailbox {
    lanes: Mutex<HashMap<LaneKey, Lane>>,
}

/// An in-process, fully connected transport between `world` ranks.
///
/// Each rank owns a mailbox demultiplexed by `(comm_id, src, tag)`, so
/// concurrent collectives on different groups or tags never observe each
/// other's messages. Messages within one lane are delivered in send order.
///
/// Every rank may carry a location label; ranks with the same label form a
/// shared-locality group for `ProcessGroup::split_shared`.
pub struct LocalFabric {
    mailboxes: Vec<Mailbox>,
    locations: Vec<Option<String>>,
    failed: Vec<AtomicBool>,
    pool: Arc<BufferPool>,
    adapter: Arc<dyn DeviceAdapter>,
    config: TesseraConfig,
}

/// Builder for [`LocalFabric`].
pub struct FabricBuilder {
    world: u32,
    locations: Option<Vec<Option<String>>>,
    adapter: Arc<dyn DeviceAdapter>,
    config: TesseraConfig,
}

impl FabricBuilder {
    /// Assign one location label per rank, in rank order.
    pub fn locations<S: Into<String>>(mut self, labels: impl IntoIterator<Item = S>) -> Self {
        self.locations = Some(labels.into_iter().map(|s| Some(s.into())).collect());
        self
    }

    /// Place `per_location` consecutive ranks on each of `count` locations
    /// named `loc0`, `loc1`, ...
    pub fn uniform_locations(self, count: u32, per_location: u32) -> Self {
        let labels: Vec<String> = (0..count)
            .flat_map(|l| (0..per_location).map(move |_| format!("loc{l}")))
            .collect();
        self.locations(labels)
    }

    /// Leave every rank without a location label.
    pub fn without_locality(mut self) -> Self {
        self.locations = Some(vec![None; self.world as usize]);
        self
    }

    pub fn adapter(mut self, adapter: Arc<dyn DeviceAdapter>) -> Self {
        self.adapter = adapter;
        self
    }

    pub fn config(mut self, config: TesseraConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Arc<LocalFabric>> {
        let world = self.world as usize;
        let locations = match self.locations {
            Some(labels) => labels,
            None => {
                let host = gethostname::gethostname().to_string_lossy().into_owned();
                vec![Some(host); world]
            }
        };
        if locations.len() != world {
            return Err(TesseraError::transport(format!(
                "{} location labels supplied for a fabric of {world} ranks",
                locations.len()
            )));
        }

        let pool = BufferPool::new(self.config.pool_capacity, self.config.pool_max_buffer_bytes);
        Ok(Arc::new(LocalFabric {
            mailboxes: (0..world).map(|_| Mailbox::default()).collect(),
            locations,
            failed: (0..world).map(|_| AtomicBool::new(false)).collect(),
            pool,
            adapter: self.adapter,
            config: self.config,
        }))
    }
}

impl LocalFabric {
    pub fn builder(world: u32) -> FabricBuilder {
        FabricBuilder {
            world,
            locations: None,
            adapter: Arc::new(CpuAdapter::new()),
            config: TesseraConfig::default(),
        }
    }

    /// A fabric of `world` ranks, all located on this host.
    pub fn new(world: u32) -> Result<Arc<Self>> {
        Self::builder(world).build()
    }

    pub fn world_size(&self) -> u32 {
        self.mailboxes.len() as u32
    }

    pub fn location(&self, rank: Rank) -> Option<&str> {
        self.locations
            .get(rank as usize)
            .and_then(|l| l.as_deref())
    }

    pub fn config(&self) -> &TesseraConfig {
        &self.config
    }

    pub fn adapter(&self) -> &Arc<dyn DeviceAdapter> {
        &self.adapter
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Mark `rank` as failed: every later send or receive touching it errors.
    pub fn fail_rank(&self, rank: Rank) {
        if let Some(flag) = self.failed.get(rank as usize) {
            flag.store(true, Ordering::Release);
        }
    }

    pub fn is_failed(&self, rank: Rank) -> bool {
        self.failed
            .get(rank as usize)
            .is_some_and(|f| f.load(Ordering::Acquire))
    }

    /// Number of lanes currently allocated in `rank`'s mailbox.
    pub fn pending_lanes(&self, rank: Rank) -> Result<usize> {
        let mailbox = self.mailbox(rank)?;
        let lanes = mailbox
            .lanes
            .lock()
            .map_err(|_| TesseraError::LockPoisoned("fabric mailbox"))?;
        Ok(lanes.len())
    }

    fn mailbox(&self, rank: Rank) -> Result<&Mailbox> {
        self.mailboxes
            .get(rank as usize)
            .ok_or_else(|| TesseraError::InvalidRank {
                rank,
                world_size: self.world_size(),
            })
    }

    fn check_alive(&self, rank: Rank) -> Result<()> {
        if self.is_failed(rank) {
            return Err(TesseraError::PeerDisconnected { rank });
        }
        Ok(())
    }

    /// Deliver `data` from global rank `src` to global rank `dst`.
    pub(crate) fn send(
        &self,
        comm_id: u32,
        src: Rank,
        dst: Rank,
        tag: u64,
        data: &[u8],
    ) -> Result<()> {
        self.check_alive(src)?;
        self.check_alive(dst)?;
        let payload = self.pool.copy_from(data);
        let mailbox = self.mailbox(dst)?;
        let mut lanes = mailbox
            .lanes
            .lock()
            .map_err(|_| TesseraError::LockPoisoned("fabric mailbox"))?;
        let key = (comm_id, src, tag);
        let lane = lanes.entry(key).or_insert_with(Lane::new);
        if let Err(mpsc::error::SendError(payload)) = lane.tx.send(payload) {
            // The previous receiver was dropped mid-receive; start a fresh lane.
            let fresh = Lane::new();
            let _ = fresh.tx.send(payload);
            lanes.insert(key, fresh);
        }
        Ok(())
    }

    /// Receive the next message on `(comm_id, src, tag)` in `dst`'s mailbox.
    pub(crate) async fn recv(
        &self,
        comm_id: u32,
        src: Rank,
        dst: Rank,
        tag: u64,
        timeout: Duration,
    ) -> Result<PooledBuf> {
        self.check_alive(dst)?;
        self.check_alive(src)?;
        let mailbox = self.mailbox(dst)?;
        let mut claim = ClaimedLane::claim(mailbox, (comm_id, src, tag))?;

        match tokio::time::timeout(timeout, claim.rx_mut().recv()).await {
            Ok(Some(buf)) => Ok(buf),
            Ok(None) => Err(TesseraError::PeerDisconnected { rank: src }),
            Err(_) => {
                if self.is_failed(src) {
                    return Err(TesseraError::PeerDisconnected { rank: src });
                }
                Err(TesseraError::transport(format!(
                    "recv from rank {src} timed out after {}ms",
                    timeout.as_millis()
                )))
            }
        }
    }
}

/// Exclusive claim on a lane's receiver for the duration of one receive.
///
/// On drop the receiver is parked back in the mailbox, or the lane is removed
/// if nothing is queued on it. Sends happen under the mailbox lock, so an
/// empty receiver observed under the lock cannot miss a message.
struct ClaimedLane<'a> {
    mailbox: &'a Mailbox,
    key: LaneKey,
    rx: mpsc::UnboundedReceiver<PooledBuf>,
    tx: mpsc::UnboundedSender<PooledBuf>,
}

impl<'a> ClaimedLane<'a> {
    fn claim(mailbox: &'a Mailbox, key: LaneKey) -> Result<Self> {
        let mut lanes = mailbox
            .lanes
            .lock()
            .map_err(|_| TesseraError::LockPoisoned("fabric mailbox"))?;
        let lane = lanes.entry(key).or_insert_with(Lane::new);
        let rx = lane.rx.take().ok_or_else(|| {
            TesseraError::transport(format!(
                "concurrent receive on lane (comm {}, src {}, tag {:#x})",
                key.0, key.1, key.2
            ))
        })?;
        Ok(Self {
            mailbox,
            key,
            rx,
            tx: lane.tx.clone(),
        })
    }

    fn rx_mut(&mut self) -> &mut mpsc::UnboundedReceiver<PooledBuf> {
        &mut self.rx
    }
}

impl Drop for ClaimedLane<'_> {
    fn drop(&mut self) {
        let Ok(mut lanes) = self.mailbox.lanes.lock() else {
            return;
        };
        let (_, rx) = mpsc::unbounded_channel();
        let rx = std::mem::replace(&mut self.rx, rx);
        match lanes.get_mut(&self.key) {
            Some(lane) if lane.tx.same_channel(&self.tx) => {
                if rx.is_empty() {
                    lanes.remove(&self.key);
                } else {
                    lane.rx = Some(rx);
                }
            }
            _ => {}
        }
    }
}
