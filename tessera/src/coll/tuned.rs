use crate::coll::{CollModule, ModuleKind};
use crate::collective::{self, CollectiveTag};
use crate::error::Result;
use crate::group::ProcessGroup;
use crate::types::{DataType, Rank, ReduceOp, SendBuf};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::trace;

/// Tree and ring collectives.
///
/// Commutative reductions use a binomial tree (reduce) or a ring
/// (allreduce). Non-commutative ones drop to the linear algorithms, which
/// keep the rank order.
#[derive(Debug, Default, Clone, Copy)]
pub struct TunedModule;

impl TunedModule {
    pub fn new() -> Self {
        Self
    }
}

impl CollModule for TunedModule {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Tuned
    }

    // Every algorithm here has a combination order fixed by group size.
    fn is_reproducible(&self) -> bool {
        true
    }

    unsafe fn allreduce<'a>(
        &'a self,
        group: &'a Arc<ProcessGroup>,
        sbuf: SendBuf,
        rbuf: u64,
        count: usize,
        dtype: DataType,
        op: ReduceOp,
        tag: CollectiveTag,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let src = sbuf.resolve(rbuf);
            unsafe {
                if op.is_commutative() {
                    collective::ring_allreduce(group, src, rbuf, count, dtype, op, tag).await
                } else {
                    trace!(comm_id = group.id(), %op, "non-commutative allreduce, using linear");
                    collective::linear_allreduce(group, src, rbuf, count, dtype, op, tag).await
                }
            }
        }
        .boxed()
    }

    unsafe fn reduce<'a>(
        &'a self,
        group: &'a Arc<ProcessGroup>,
        sbuf: SendBuf,
        rbuf: u64,
        count: usize,
        dtype: DataType,
        op: ReduceOp,
        root: Rank,
        tag: CollectiveTag,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let src = sbuf.resolve(rbuf);
            unsafe {
                if op.is_commutative() {
                    collective::tree_reduce(group, src, rbuf, count, dtype, op, root, tag).await
                } else {
                    collective::linear_reduce(group, src, rbuf, count, dtype, op, root, tag).await
                }
            }
        }
        .boxed()
    }

    unsafe fn broadcast<'a>(
        &'a self,
        group: &'a Arc<ProcessGroup>,
        ptr: u64,
        count: usize,
        dtype: DataType,
        root: Rank,
        tag: CollectiveTag,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            unsafe { collective::tree_broadcast(group, ptr, count, dtype, root, tag).await }
        }
        .boxed()
    }

    unsafe fn allgather<'a>(
        &'a self,
        group: &'a Arc<ProcessGroup>,
        send_ptr: u64,
        recv_ptr: u64,
        count: usize,
        dtype: DataType,
        tag: CollectiveTag,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            unsafe {
                collective::ring_allgather(group, send_ptr, recv_ptr, count, dtype, tag).await
            }
        }
        .boxed()
    }
}
