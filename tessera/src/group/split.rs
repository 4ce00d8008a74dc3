use crate::coll::CollModule;
use crate::error::{Result, TesseraError};
use crate::types::{DataType, Rank};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::debug;

use super::ProcessGroup;

/// Location label buffer size (256 bytes, null-padded) plus a presence flag.
const LOCATION_BUF_SIZE: usize = 256;
const LOCATION_RECORD: usize = LOCATION_BUF_SIZE + 1;

impl ProcessGroup {
    /// Split this group into sub-groups.
    ///
    /// All ranks must call `split` collectively. Ranks with the same `color`
    /// end up in the same sub-group, ordered by `key` (ties broken by rank in
    /// this group).
    ///
    /// `coll` is installed on the new group as its collective module. The
    /// exchange that builds the sub-groups uses the flat ring allgather
    /// directly, never this group's installed module, so splitting is safe
    /// to call from inside a collective module.
    pub async fn split(
        &self,
        color: u32,
        key: u32,
        coll: Arc<dyn CollModule>,
    ) -> Result<Arc<ProcessGroup>> {
        let world = self.size as usize;
        let rank = self.rank;

        // Step 1: exchange (color, key) tuples: [color: u32 LE][key: u32 LE].
        let mut my_info = [0u8; 8];
        my_info[..4].copy_from_slice(&color.to_le_bytes());
        my_info[4..].copy_from_slice(&key.to_le_bytes());
        let mut all_info = vec![0u8; 8 * world];

        let tag = self.next_collective_tag();
        unsafe {
            crate::collective::ring_allgather(
                self,
                my_info.as_ptr() as u64,
                all_info.as_mut_ptr() as u64,
                8,
                DataType::U8,
                tag,
            )
            .await
            .map_err(|e| TesseraError::SplitFailed {
                reason: format!("(color, key) exchange failed: {e}"),
            })?;
        }

        // Step 2: parse all (color, key) tuples.
        let mut entries: Vec<(Rank, u32, u32)> = Vec::with_capacity(world);
        for (r, chunk) in all_info.chunks_exact(8).enumerate() {
            let c = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            let k = u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
            entries.push((r as Rank, c, k));
        }

        // Step 3: find our group (same color), sort by (key, rank).
        let mut members: Vec<(Rank, u32)> = entries
            .iter()
            .filter(|&&(_, c, _)| c == color)
            .map(|&(r, _, k)| (r, k))
            .collect();
        members.sort_by_key(|&(r, k)| (k, r));

        let new_rank = members
            .iter()
            .position(|&(r, _)| r == rank)
            .ok_or_else(|| TesseraError::SplitFailed {
                reason: format!("rank {rank} missing from its own color group {color}"),
            })? as Rank;

        // Step 4: derive a comm_id every member agrees on. All members advance
        // split_generation in lockstep, so (parent id, generation, color)
        // names this sub-group uniquely.
        let split_gen = self.split_generation.fetch_add(1, Ordering::Relaxed);
        let new_comm_id = derive_comm_id(self.comm_id, split_gen, color);

        // Step 5: map new ranks onto fabric ranks.
        let rank_map = members
            .iter()
            .map(|&(r, _)| self.global_rank_of(r))
            .collect::<Result<Vec<Rank>>>()?;

        debug!(
            parent = self.comm_id,
            comm_id = new_comm_id,
            color,
            rank = new_rank,
            size = rank_map.len(),
            "split process group"
        );

        Ok(Arc::new(ProcessGroup::new(
            new_rank,
            new_comm_id,
            rank_map,
            Arc::clone(&self.fabric),
            coll,
        )))
    }

    /// Split into groups of ranks that share a location label.
    ///
    /// Colors are assigned in order of first appearance of each label, so
    /// the sub-group containing rank 0 gets color 0. Fails with
    /// `TopologyUnavailable` on every rank if any rank has no label.
    pub async fn split_shared(
        &self,
        key: u32,
        coll: Arc<dyn CollModule>,
    ) -> Result<Arc<ProcessGroup>> {
        let world = self.size as usize;

        // Record: [present: u8][label: 256 bytes, null-padded].
        let mut send_buf = [0u8; LOCATION_RECORD];
        if let Some(label) = self.location() {
            let bytes = label.as_bytes();
            let copy_len = bytes.len().min(LOCATION_BUF_SIZE);
            send_buf[0] = 1;
            send_buf[1..1 + copy_len].copy_from_slice(&bytes[..copy_len]);
        }
        let mut recv_buf = vec![0u8; LOCATION_RECORD * world];

        let tag = self.next_collective_tag();
        unsafe {
            crate::collective::ring_allgather(
                self,
                send_buf.as_ptr() as u64,
                recv_buf.as_mut_ptr() as u64,
                LOCATION_RECORD,
                DataType::U8,
                tag,
            )
            .await?;
        }

        let mut labels: Vec<String> = Vec::with_capacity(world);
        for (r, record) in recv_buf.chunks_exact(LOCATION_RECORD).enumerate() {
            if record[0] == 0 {
                return Err(TesseraError::TopologyUnavailable {
                    reason: format!("rank {r} has no location label"),
                });
            }
            let label = &record[1..];
            let end = label
                .iter()
                .position(|&b| b == 0)
                .unwrap_or(LOCATION_BUF_SIZE);
            labels.push(String::from_utf8_lossy(&label[..end]).into_owned());
        }

        // Unique labels in order of first appearance.
        let seen: indexmap::IndexSet<&str> = labels.iter().map(String::as_str).collect();
        let own = labels
            .get(self.rank as usize)
            .ok_or(TesseraError::UnknownPeer { rank: self.rank })?;
        let color = seen
            .get_index_of(own.as_str())
            .ok_or_else(|| TesseraError::TopologyUnavailable {
                reason: format!("own location {own:?} not found in gathered labels"),
            })?;

        self.split(color as u32, key, coll).await
    }
}

/// FNV-1a over (parent comm_id, generation, color), folded to a non-zero u32.
fn derive_comm_id(parent: u32, generation: u64, color: u32) -> u32 {
    let mut h: u64 = 0xcbf29ce484222325;
    let bytes = parent
        .to_le_bytes()
        .into_iter()
        .chain(generation.to_le_bytes())
        .chain(color.to_le_bytes());
    for b in bytes {
        h ^= b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    // 0 is reserved for the world group.
    let id = ((h >> 32) ^ h) as u32;
    if id == 0 { 1 } else { id }
}
