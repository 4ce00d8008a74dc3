use crate::error::Result;
use crate::request::Request;
use crate::types::{DataType, Rank, ReduceOp, SendBuf};
use std::sync::Arc;

use super::ProcessGroup;

impl ProcessGroup {
    /// Allreduce through the installed collective module.
    ///
    /// The input is read from `sbuf` (or `rbuf` for [`SendBuf::InPlace`]) and
    /// every rank receives the result in `rbuf`.
    ///
    /// # Safety
    /// `rbuf` and a `SendBuf::Ptr` input must be valid for
    /// `count * dtype.size_in_bytes()` bytes until the call returns.
    pub async unsafe fn allreduce(
        self: &Arc<Self>,
        sbuf: SendBuf,
        rbuf: u64,
        count: usize,
        dtype: DataType,
        op: ReduceOp,
    ) -> Result<()> {
        let coll = self.coll()?;
        let tag = self.next_collective_tag();
        unsafe { coll.allreduce(self, sbuf, rbuf, count, dtype, op, tag).await }
    }

    /// Reduce to `root` through the installed collective module. Only the
    /// root's `rbuf` is written.
    ///
    /// # Safety
    /// Same contract as [`ProcessGroup::allreduce`].
    pub async unsafe fn reduce(
        self: &Arc<Self>,
        sbuf: SendBuf,
        rbuf: u64,
        count: usize,
        dtype: DataType,
        op: ReduceOp,
        root: Rank,
    ) -> Result<()> {
        let coll = self.coll()?;
        let tag = self.next_collective_tag();
        unsafe {
            coll.reduce(self, sbuf, rbuf, count, dtype, op, root, tag)
                .await
        }
    }

    /// Broadcast `ptr` from `root` through the installed collective module.
    ///
    /// # Safety
    /// `ptr` must be valid for `count * dtype.size_in_bytes()` bytes.
    pub async unsafe fn broadcast(
        self: &Arc<Self>,
        ptr: u64,
        count: usize,
        dtype: DataType,
        root: Rank,
    ) -> Result<()> {
        let coll = self.coll()?;
        let tag = self.next_collective_tag();
        unsafe { coll.broadcast(self, ptr, count, dtype, root, tag).await }
    }

    /// Allgather `count` elements per rank into `recv_ptr`, in rank order.
    ///
    /// # Safety
    /// - `send_ptr` must point to at least `count * dtype.size_in_bytes()` bytes.
    /// - `recv_ptr` must point to at least `count * size() * dtype.size_in_bytes()` bytes.
    pub async unsafe fn allgather(
        self: &Arc<Self>,
        send_ptr: u64,
        recv_ptr: u64,
        count: usize,
        dtype: DataType,
    ) -> Result<()> {
        let coll = self.coll()?;
        let tag = self.next_collective_tag();
        unsafe {
            coll.allgather(self, send_ptr, recv_ptr, count, dtype, tag)
                .await
        }
    }

    /// Non-blocking allreduce. Returns a request that completes when the
    /// result is in `rbuf`.
    ///
    /// # Safety
    /// Buffers must remain valid until the request completes.
    pub unsafe fn iallreduce(
        self: &Arc<Self>,
        sbuf: SendBuf,
        rbuf: u64,
        count: usize,
        dtype: DataType,
        op: ReduceOp,
    ) -> Result<Request> {
        let coll = self.coll()?;
        let tag = self.next_collective_tag();
        Ok(unsafe { coll.iallreduce(Arc::clone(self), sbuf, rbuf, count, dtype, op, tag) })
    }

    /// Non-blocking reduce to `root`.
    ///
    /// # Safety
    /// Buffers must remain valid until the request completes.
    pub unsafe fn ireduce(
        self: &Arc<Self>,
        sbuf: SendBuf,
        rbuf: u64,
        count: usize,
        dtype: DataType,
        op: ReduceOp,
        root: Rank,
    ) -> Result<Request> {
        let coll = self.coll()?;
        let tag = self.next_collective_tag();
        Ok(unsafe { coll.ireduce(Arc::clone(self), sbuf, rbuf, count, dtype, op, root, tag) })
    }

    /// Non-blocking broadcast from `root`.
    ///
    /// # Safety
    /// `ptr` must remain valid until the request completes.
    pub unsafe fn ibcast(
        self: &Arc<Self>,
        ptr: u64,
        count: usize,
        dtype: DataType,
        root: Rank,
    ) -> Result<Request> {
        let coll = self.coll()?;
        let tag = self.next_collective_tag();
        Ok(unsafe { coll.ibcast(Arc::clone(self), ptr, count, dtype, root, tag) })
    }
}
