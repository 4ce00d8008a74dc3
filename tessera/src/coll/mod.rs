//! Collective module table.
//!
//! A [`CollModule`] is one complete implementation of the collective
//! operations for a group. Each group has exactly one module installed at a
//! time; modules that decompose a collective (the hierarchical module, for
//! instance) keep a handle on the module they replaced and call it
//! explicitly instead of going back through the group.

mod basic;
mod tuned;

pub use basic::BasicModule;
pub use tuned::TunedModule;

use crate::collective::CollectiveTag;
use crate::error::Result;
use crate::group::ProcessGroup;
use crate::request::Request;
use crate::types::{DataType, Rank, ReduceOp, SendBuf};
use futures::future::BoxFuture;
use std::sync::Arc;

/// Which implementation family a module belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    /// Linear algorithms with a fixed, rank-ordered combination order.
    Basic,
    /// Tree and ring algorithms.
    Tuned,
    /// Hierarchical (node-local + internode) decomposition.
    Han,
}

impl ModuleKind {
    pub const fn name(self) -> &'static str {
        match self {
            ModuleKind::Basic => "basic",
            ModuleKind::Tuned => "tuned",
            ModuleKind::Han => "han",
        }
    }
}

impl std::fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for ModuleKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "basic" => Ok(ModuleKind::Basic),
            "tuned" => Ok(ModuleKind::Tuned),
            "han" => Ok(ModuleKind::Han),
            other => Err(format!("unknown collective module {other:?}")),
        }
    }
}

/// One implementation of the collective operations.
///
/// Every operation receives the tag to use for its traffic. Callers allocate
/// it from the group (see [`ProcessGroup::next_collective_tag`]) so that all
/// members agree on it.
///
/// Blocking operations return a boxed future so the trait stays
/// dyn-compatible. The non-blocking variants default to spawning the
/// blocking operation.
pub trait CollModule: Send + Sync + 'static {
    fn kind(&self) -> ModuleKind;

    /// Whether results are bitwise identical across runs for a fixed group.
    fn is_reproducible(&self) -> bool {
        false
    }

    /// # Safety
    /// `rbuf` and a `SendBuf::Ptr` input must be valid for
    /// `count * dtype.size_in_bytes()` bytes until the future resolves.
    #[allow(clippy::too_many_arguments)]
    unsafe fn allreduce<'a>(
        &'a self,
        group: &'a Arc<ProcessGroup>,
        sbuf: SendBuf,
        rbuf: u64,
        count: usize,
        dtype: DataType,
        op: ReduceOp,
        tag: CollectiveTag,
    ) -> BoxFuture<'a, Result<()>>;

    /// # Safety
    /// Same contract as [`CollModule::allreduce`]; `rbuf` is only written at `root`.
    #[allow(clippy::too_many_arguments)]
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
    ) -> BoxFuture<'a, Result<()>>;

    /// # Safety
    /// `ptr` must be valid for `count * dtype.size_in_bytes()` bytes.
    unsafe fn broadcast<'a>(
        &'a self,
        group: &'a Arc<ProcessGroup>,
        ptr: u64,
        count: usize,
        dtype: DataType,
        root: Rank,
        tag: CollectiveTag,
    ) -> BoxFuture<'a, Result<()>>;

    /// # Safety
    /// `send_ptr` must hold `count` elements and `recv_ptr` room for
    /// `count * group.size()` elements.
    unsafe fn allgather<'a>(
        &'a self,
        group: &'a Arc<ProcessGroup>,
        send_ptr: u64,
        recv_ptr: u64,
        count: usize,
        dtype: DataType,
        tag: CollectiveTag,
    ) -> BoxFuture<'a, Result<()>>;

    /// # Safety
    /// Buffers must remain valid until the request completes.
    #[allow(clippy::too_many_arguments)]
    unsafe fn iallreduce(
        self: Arc<Self>,
        group: Arc<ProcessGroup>,
        sbuf: SendBuf,
        rbuf: u64,
        count: usize,
        dtype: DataType,
        op: ReduceOp,
        tag: CollectiveTag,
    ) -> Request {
        Request::spawn(async move {
            unsafe {
                self.allreduce(&group, sbuf, rbuf, count, dtype, op, tag)
                    .await
            }
        })
    }

    /// # Safety
    /// Buffers must remain valid until the request completes.
    #[allow(clippy::too_many_arguments)]
    unsafe fn ireduce(
        self: Arc<Self>,
        group: Arc<ProcessGroup>,
        sbuf: SendBuf,
        rbuf: u64,
        count: usize,
        dtype: DataType,
        op: ReduceOp,
        root: Rank,
        tag: CollectiveTag,
    ) -> Request {
        Request::spawn(async move {
            unsafe {
                self.reduce(&group, sbuf, rbuf, count, dtype, op, root, tag)
                    .await
            }
        })
    }

    /// # Safety
    /// `ptr` must remain valid until the request completes.
    unsafe fn ibcast(
        self: Arc<Self>,
        group: Arc<ProcessGroup>,
        ptr: u64,
        count: usize,
        dtype: DataType,
        root: Rank,
        tag: CollectiveTag,
    ) -> Request {
        Request::spawn(async move {
            unsafe {
                self.broadcast(&group, ptr, count, dtype, root, tag)
                    .await
            }
        })
    }
}

/// The set of modules available to build a group's collectives from, in
/// priority order.
#[derive(Clone, Default)]
pub struct ModuleCatalog {
    modules: Vec<Arc<dyn CollModule>>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tuned and Basic, in that order.
    pub fn standard() -> Self {
        let mut catalog = Self::new();
        catalog.register(Arc::new(TunedModule::new()));
        catalog.register(Arc::new(BasicModule::new()));
        catalog
    }

    /// Append `module`; a module of the same kind already present wins.
    pub fn register(&mut self, module: Arc<dyn CollModule>) {
        if self.find(module.kind()).is_none() {
            self.modules.push(module);
        }
    }

    /// The registered module of `kind`, if any.
    pub fn find(&self, kind: ModuleKind) -> Option<Arc<dyn CollModule>> {
        self.modules.iter().find(|m| m.kind() == kind).cloned()
    }

    /// The first module whose kind appears in `priority`, honouring the
    /// order of `priority`.
    pub fn first_of(&self, priority: &[ModuleKind]) -> Option<Arc<dyn CollModule>> {
        priority.iter().find_map(|&kind| self.find(kind))
    }

    pub fn kinds(&self) -> Vec<ModuleKind> {
        self.modules.iter().map(|m| m.kind()).collect()
    }
}

impl std::fmt::Debug for ModuleCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.kinds()).finish()
    }
}
