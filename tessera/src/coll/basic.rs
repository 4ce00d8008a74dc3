use crate::coll::{CollModule, ModuleKind};
use crate::collective::{self, CollectiveTag};
use crate::error::Result;
use crate::group::ProcessGroup;
use crate::types::{DataType, Rank, ReduceOp, SendBuf};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::sync::Arc;

/// Linear collectives.
///
/// Reductions are folded at the root in rank order, so results do not
/// depend on timing and non-commutative operators are combined correctly.
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicModule;

impl BasicModule {
    pub fn new() -> Self {
        Self
    }
}

impl CollModule for BasicModule {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Basic
    }

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
            unsafe {
                collective::linear_allreduce(
                    group,
                    sbuf.resolve(rbuf),
                    rbuf,
                    count,
                    dtype,
                    op,
                    tag,
                )
                .await
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
            unsafe {
                collective::linear_reduce(
                    group,
                    sbuf.resolve(rbuf),
                    rbuf,
                    count,
                    dtype,
                    op,
                    root,
                    tag,
                )
                .await
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
            unsafe { collective::flat_broadcast(group, ptr, count, dtype, root, tag).await }
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
