use crate::error::{Result, TesseraError};
use crate::group::ProcessGroup;
use crate::transport::PooledBuf;
use crate::types::Rank;

/// Tag shared by every message of one collective invocation.
///
/// The upper 48 bits carry the group's collective sequence number; the low
/// 16 bits are free for the algorithm to number its rounds (see [`step_tag`]).
pub type CollectiveTag = u64;

const STEP_BITS: u32 = 16;
const STEP_MASK: u64 = (1 << STEP_BITS) - 1;

/// Tag for the collective with sequence number `seq`.
pub fn collective_tag(seq: u64) -> CollectiveTag {
    seq << STEP_BITS
}

/// Derive the tag for round `step` of the collective tagged `tag`.
pub(crate) fn step_tag(tag: CollectiveTag, step: usize) -> CollectiveTag {
    tag | (step as u64 & STEP_MASK)
}

/// A contiguous block of collective tags reserved up front on one group.
///
/// Every member must reserve the same block size at the same point in its
/// call sequence so that tag `i` names the same collective everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagBlock {
    first_seq: u64,
    len: u64,
}

impl TagBlock {
    pub(crate) fn new(first_seq: u64, len: u64) -> Self {
        Self { first_seq, len }
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The `i`-th tag of the block, or `None` past its end.
    pub fn tag(&self, i: usize) -> Option<CollectiveTag> {
        let i = i as u64;
        (i < self.len).then(|| collective_tag(self.first_seq + i))
    }
}

/// Send bytes to a peer, wrapping errors as `CollectiveFailed`.
pub(crate) async fn collective_send(
    group: &ProcessGroup,
    dest: Rank,
    data: &[u8],
    operation: &'static str,
    tag: CollectiveTag,
) -> Result<()> {
    group
        .send_to(dest, tag, data)
        .map_err(|e| TesseraError::CollectiveFailed {
            operation,
            rank: dest,
            reason: e.to_string(),
        })
}

/// Receive bytes from a peer with the configured timeout, wrapping errors
/// as `CollectiveFailed`.
pub(crate) async fn collective_recv(
    group: &ProcessGroup,
    src: Rank,
    operation: &'static str,
    tag: CollectiveTag,
) -> Result<PooledBuf> {
    group
        .recv_from(src, tag)
        .await
        .map_err(|e| TesseraError::CollectiveFailed {
            operation,
            rank: src,
            reason: e.to_string(),
        })
}

/// Receive exactly `expected` bytes from `src`.
pub(crate) async fn collective_recv_exact(
    group: &ProcessGroup,
    src: Rank,
    expected: usize,
    operation: &'static str,
    tag: CollectiveTag,
) -> Result<PooledBuf> {
    let received = collective_recv(group, src, operation, tag).await?;
    if received.len() != expected {
        return Err(TesseraError::BufferSizeMismatch {
            expected,
            actual: received.len(),
        });
    }
    Ok(received)
}

/// Splits `count` elements into `world` near-equal chunks; the first
/// `count % world` chunks carry one extra element.
pub(crate) struct ChunkLayout {
    pub offsets: Vec<usize>,
    counts: Vec<usize>,
}

impl ChunkLayout {
    pub fn new(count: usize, world: usize) -> Self {
        let base = count / world;
        let extra = count % world;
        let mut offsets = Vec::with_capacity(world);
        let mut counts = Vec::with_capacity(world);
        let mut off = 0;
        for i in 0..world {
            let c = base + usize::from(i < extra);
            offsets.push(off);
            counts.push(c);
            off += c;
        }
        Self { offsets, counts }
    }

    pub fn chunk_count(&self, idx: usize) -> usize {
        self.counts[idx]
    }
}
