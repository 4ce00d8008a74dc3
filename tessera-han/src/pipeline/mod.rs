//! Segmented four-stage allreduce pipeline.
//!
//! A message is cut into segments and every segment goes through
//! local-reduce, cross-reduce, cross-broadcast and local-broadcast, in that
//! order. The cross stages run only on local roots. Stages of different
//! segments overlap, at most [`PIPELINE_DEPTH`] segments in flight.

mod blocking;
mod callback;

pub(crate) use blocking::run_allreduce;
pub(crate) use callback::{run_allreduce_callback, start_allreduce_callback};

use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tessera::{CollModule, CollectiveTag, DataType, ReduceOp, Request, SendBuf, TagBlock};

use crate::error::{HanError, Result};
use crate::topology::TopologyCache;

/// Number of segments that can be between their first and last stage at once.
pub const PIPELINE_DEPTH: usize = 4;

/// How a message is cut into segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentPlan {
    elem_size: usize,
    segment_count: usize,
    elements_per_segment: usize,
    last_segment_elements: usize,
}

impl SegmentPlan {
    /// Segments of `segment_bytes / dtype size` elements each. A segment
    /// size smaller than one element or at least the whole message gives a
    /// single segment.
    pub fn new(count: usize, dtype: DataType, segment_bytes: usize) -> Result<Self> {
        let elem_size = dtype.size_in_bytes();
        let total = count
            .checked_mul(elem_size)
            .ok_or_else(|| HanError::ResourceExhaustion {
                what: format!("{count} elements of {dtype} overflow the address space"),
            })?;

        let per = if elem_size <= segment_bytes && segment_bytes < total {
            segment_bytes / elem_size
        } else {
            count
        };
        if per == 0 {
            return Ok(Self {
                elem_size,
                segment_count: 0,
                elements_per_segment: 0,
                last_segment_elements: 0,
            });
        }

        let segment_count = count.div_ceil(per);
        Ok(Self {
            elem_size,
            segment_count,
            elements_per_segment: per,
            last_segment_elements: count - per * (segment_count - 1),
        })
    }

    pub fn segment_count(&self) -> usize {
        self.segment_count
    }

    pub fn elements_per_segment(&self) -> usize {
        self.elements_per_segment
    }

    pub fn last_segment_elements(&self) -> usize {
        self.last_segment_elements
    }

    pub fn segment(&self, index: usize) -> Option<SegmentRange> {
        if index >= self.segment_count {
            return None;
        }
        let elements = if index + 1 == self.segment_count {
            self.last_segment_elements
        } else {
            self.elements_per_segment
        };
        let first = index * self.elements_per_segment;
        Some(SegmentRange {
            index,
            first,
            elements,
            byte_offset: first * self.elem_size,
            bytes: elements * self.elem_size,
        })
    }
}

/// The element range one segment covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentRange {
    pub index: usize,
    pub first: usize,
    pub elements: usize,
    pub byte_offset: usize,
    pub bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    LocalReduce,
    CrossReduce,
    CrossBroadcast,
    LocalBroadcast,
}

impl Stage {
    pub const fn name(self) -> &'static str {
        match self {
            Stage::LocalReduce => "local-reduce",
            Stage::CrossReduce => "cross-reduce",
            Stage::CrossBroadcast => "cross-broadcast",
            Stage::LocalBroadcast => "local-broadcast",
        }
    }

    pub const fn is_cross(self) -> bool {
        matches!(self, Stage::CrossReduce | Stage::CrossBroadcast)
    }

    /// The stage that follows this one on a rank, skipping the cross stages
    /// on ranks that are not local roots.
    pub const fn next(self, local_root: bool) -> Option<Stage> {
        match self {
            Stage::LocalReduce if local_root => Some(Stage::CrossReduce),
            Stage::LocalReduce => Some(Stage::LocalBroadcast),
            Stage::CrossReduce => Some(Stage::CrossBroadcast),
            Stage::CrossBroadcast => Some(Stage::LocalBroadcast),
            Stage::LocalBroadcast => None,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One stage of one segment, with everything needed to run it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineTask {
    pub stage: Stage,
    pub range: SegmentRange,
    pub tag: CollectiveTag,
}

/// Per-call state shared by every task of one pipelined allreduce.
pub(crate) struct StageContext {
    topo: Arc<TopologyCache>,
    intra: Arc<dyn CollModule>,
    inter: Arc<dyn CollModule>,
    sbuf: SendBuf,
    rbuf: u64,
    dtype: DataType,
    op: ReduceOp,
    plan: SegmentPlan,
    /// Two tags per segment on the local subgroup: reduce, then broadcast.
    local_tags: TagBlock,
    /// Same layout on the cross subgroup; local roots only.
    cross_tags: Option<TagBlock>,
}

impl StageContext {
    /// Plan the call and reserve its tags on both subgroups.
    ///
    /// Every rank must call this at the same point of its collective sequence.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        topo: Arc<TopologyCache>,
        sbuf: SendBuf,
        rbuf: u64,
        count: usize,
        dtype: DataType,
        op: ReduceOp,
        segment_bytes: usize,
    ) -> Result<Self> {
        if !op.is_commutative() {
            return Err(HanError::UnsupportedOperator { op: op.to_string() });
        }
        let plan = SegmentPlan::new(count, dtype, segment_bytes)?;
        let tags = 2 * plan.segment_count();
        let intra = topo.local().coll()?;
        let inter = topo.cross().coll()?;
        let local_tags = topo.local().reserve_collective_tags(tags);
        let cross_tags = topo
            .is_local_root()
            .then(|| topo.cross().reserve_collective_tags(tags));
        Ok(Self {
            topo,
            intra,
            inter,
            sbuf,
            rbuf,
            dtype,
            op,
            plan,
            local_tags,
            cross_tags,
        })
    }

    pub(crate) fn plan(&self) -> &SegmentPlan {
        &self.plan
    }

    pub(crate) fn is_local_root(&self) -> bool {
        self.topo.is_local_root()
    }

    /// Build the task for `stage` of segment `index`.
    pub(crate) fn task(&self, stage: Stage, index: usize) -> Result<PipelineTask> {
        let range = self
            .plan
            .segment(index)
            .ok_or_else(|| HanError::ResourceExhaustion {
                what: format!("segment {index} past the end of the plan"),
            })?;
        let block = if stage.is_cross() {
            self.cross_tags.as_ref()
        } else {
            Some(&self.local_tags)
        };
        let slot = match stage {
            Stage::LocalReduce | Stage::CrossReduce => 2 * index,
            Stage::LocalBroadcast | Stage::CrossBroadcast => 2 * index + 1,
        };
        let tag = block
            .and_then(|b| b.tag(slot))
            .ok_or_else(|| HanError::ResourceExhaustion {
                what: format!("no {stage} tag for segment {index}"),
            })?;
        Ok(PipelineTask { stage, range, tag })
    }

    fn segment_ptr(&self, range: &SegmentRange) -> u64 {
        self.rbuf + range.byte_offset as u64
    }

    /// Run `task` to completion.
    ///
    /// # Safety
    /// The caller's buffers must cover the whole plan until this resolves.
    pub(crate) unsafe fn run<'a>(&'a self, task: PipelineTask) -> BoxFuture<'a, Result<()>> {
        async move {
            let range = task.range;
            let ptr = self.segment_ptr(&range);
            let (n, dtype, op, tag) = (range.elements, self.dtype, self.op, task.tag);
            let sbuf = self.sbuf.offset(range.byte_offset);
            let (local, cross) = (self.topo.local(), self.topo.cross());
            let result = unsafe {
                match task.stage {
                    Stage::LocalReduce => {
                        self.intra.reduce(local, sbuf, ptr, n, dtype, op, 0, tag).await
                    }
                    Stage::CrossReduce => {
                        self.inter
                            .reduce(cross, SendBuf::InPlace, ptr, n, dtype, op, 0, tag)
                            .await
                    }
                    Stage::CrossBroadcast => {
                        self.inter.broadcast(cross, ptr, n, dtype, 0, tag).await
                    }
                    Stage::LocalBroadcast => {
                        self.intra.broadcast(local, ptr, n, dtype, 0, tag).await
                    }
                }
            };
            result.map_err(HanError::stage(task.stage.name()))
        }
        .boxed()
    }

    /// Start `task` as a non-blocking sub-collective.
    ///
    /// # Safety
    /// The caller's buffers must cover the whole plan until the request
    /// completes.
    pub(crate) unsafe fn start(&self, task: &PipelineTask) -> Request {
        let range = task.range;
        let ptr = self.segment_ptr(&range);
        let (n, dtype, op, tag) = (range.elements, self.dtype, self.op, task.tag);
        let local = Arc::clone(self.topo.local());
        let cross = Arc::clone(self.topo.cross());
        let intra = Arc::clone(&self.intra);
        let inter = Arc::clone(&self.inter);
        unsafe {
            match task.stage {
                Stage::LocalReduce => {
                    let sbuf = self.sbuf.offset(range.byte_offset);
                    intra.ireduce(local, sbuf, ptr, n, dtype, op, 0, tag)
                }
                Stage::CrossReduce => {
                    inter.ireduce(cross, SendBuf::InPlace, ptr, n, dtype, op, 0, tag)
                }
                Stage::CrossBroadcast => inter.ibcast(cross, ptr, n, dtype, 0, tag),
                Stage::LocalBroadcast => intra.ibcast(local, ptr, n, dtype, 0, tag),
            }
        }
    }
}
