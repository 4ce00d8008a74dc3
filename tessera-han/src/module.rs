use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use futures::FutureExt;
use futures::future::BoxFuture;
use tessera::{
    CollModule, CollectiveTag, DataType, ModuleCatalog, ModuleKind, ProcessGroup, Rank, ReduceOp,
    Request, SendBuf, TesseraError,
};
use tracing::{debug, info};

use crate::collective::{
    RootedTags, hierarchical_broadcast, hierarchical_reduce, simple_allreduce,
};
use crate::config::{AllreduceAlgorithm, HanConfig};
use crate::error::{HanError, Result};
use crate::pipeline::{self, StageContext};
use crate::topology::{RootRanks, TopologyCache, TopologyResolver};

/// Deterministic modules, in order of preference.
const REPRODUCIBLE_CANDIDATES: [ModuleKind; 2] = [ModuleKind::Tuned, ModuleKind::Basic];

/// Counters for how calls were served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HanStats {
    /// Allreduce calls that entered the segmented pipeline.
    pub pipeline_runs: u64,
    /// Calls handed to another module.
    pub fallbacks: u64,
    /// Topology builds attempted.
    pub resolutions: u64,
}

#[derive(Default)]
struct Counters {
    pipeline_runs: AtomicU64,
    fallbacks: AtomicU64,
    resolutions: AtomicU64,
}

enum Route {
    Fallback(Arc<dyn CollModule>),
    Hierarchical(Arc<TopologyCache>),
}

/// Hierarchical collectives over node-local and internode subgroups.
///
/// Installed on a group with [`HanModule::enable`], it keeps the module it
/// replaced as its fallback. Every call decides between the hierarchical
/// path and the fallback:
///
/// * non-commutative reductions go to the fallback;
/// * groups whose topology cannot be split into two levels are marked, and
///   every later call on them goes to the fallback without another attempt;
/// * in reproducible mode, allreduce is served by a deterministic module.
///
/// Allgather always goes to the fallback. Non-blocking allreduce uses the
/// callback pipeline once the group's topology is resolved (by an earlier
/// blocking collective or [`HanModule::topology`]) and the fallback before.
pub struct HanModule {
    previous: Arc<dyn CollModule>,
    catalog: ModuleCatalog,
    config: HanConfig,
    resolver: TopologyResolver,
    /// Groups (communicator id, fabric rank) the hierarchical path gave up on.
    unsupported: Mutex<HashSet<(u32, Rank)>>,
    reproducible: OnceLock<Arc<dyn CollModule>>,
    counters: Counters,
}

impl HanModule {
    /// Build a module that falls back to `previous`.
    ///
    /// Subgroups get the catalog's modules of the configured kinds, or
    /// `previous` when the catalog has none of that kind.
    pub fn new(
        previous: Arc<dyn CollModule>,
        catalog: ModuleCatalog,
        config: HanConfig,
    ) -> Result<Self> {
        if previous.kind() == ModuleKind::Han {
            return Err(TesseraError::module(
                "han",
                "cannot fall back to another hierarchical module",
            )
            .into());
        }
        let pick = |kind: ModuleKind| {
            catalog
                .find(kind)
                .filter(|m| m.kind() != ModuleKind::Han)
                .unwrap_or_else(|| Arc::clone(&previous))
        };
        let resolver = TopologyResolver::new(
            Arc::clone(&previous),
            pick(config.intra_module),
            pick(config.inter_module),
        );
        Ok(Self {
            previous,
            catalog,
            config,
            resolver,
            unsupported: Mutex::new(HashSet::new()),
            reproducible: OnceLock::new(),
            counters: Counters::default(),
        })
    }

    /// Install a hierarchical module on `group`, falling back to the module
    /// currently installed there.
    pub fn enable(
        group: &ProcessGroup,
        catalog: ModuleCatalog,
        config: HanConfig,
    ) -> Result<Arc<Self>> {
        let module = Arc::new(Self::new(group.coll()?, catalog, config)?);
        group.set_coll(Arc::clone(&module) as Arc<dyn CollModule>)?;
        debug!(comm_id = group.id(), rank = group.rank(), "enabled hierarchical collectives");
        Ok(module)
    }

    pub fn config(&self) -> &HanConfig {
        &self.config
    }

    /// The module calls fall back to.
    pub fn fallback(&self) -> &Arc<dyn CollModule> {
        &self.previous
    }

    pub fn stats(&self) -> HanStats {
        HanStats {
            pipeline_runs: self.counters.pipeline_runs.load(Ordering::Relaxed),
            fallbacks: self.counters.fallbacks.load(Ordering::Relaxed),
            resolutions: self.counters.resolutions.load(Ordering::Relaxed),
        }
    }

    /// Resolve (or reuse) the decomposition of `group`.
    pub async fn topology(&self, group: &Arc<ProcessGroup>) -> Result<Arc<TopologyCache>> {
        if self.resolver.cached(group).is_none() {
            self.counters.resolutions.fetch_add(1, Ordering::Relaxed);
        }
        self.resolver.resolve(group).await
    }

    /// The decomposition of `group`, if one was built.
    pub fn cached_topology(&self, group: &ProcessGroup) -> Option<Arc<TopologyCache>> {
        self.resolver.cached(group)
    }

    /// Whether `group` is marked as unable to use the hierarchical path.
    pub fn is_unsupported(&self, group: &ProcessGroup) -> bool {
        self.unsupported
            .lock()
            .map(|set| set.contains(&group_key(group)))
            .unwrap_or(false)
    }

    fn mark_unsupported(&self, group: &ProcessGroup, reason: &str) -> Result<()> {
        debug!(
            comm_id = group.id(),
            rank = group.rank(),
            reason,
            "hierarchical path disabled for group"
        );
        self.unsupported
            .lock()
            .map_err(|_| TesseraError::LockPoisoned("han unsupported set"))?
            .insert(group_key(group));
        Ok(())
    }

    /// The deterministic module used in reproducible mode, chosen once.
    fn reproducible_module(&self) -> Arc<dyn CollModule> {
        let chosen = self.reproducible.get_or_init(|| {
            let found = self
                .catalog
                .first_of(&REPRODUCIBLE_CANDIDATES)
                .filter(|m| m.is_reproducible());
            match found {
                Some(m) => {
                    debug!(module = %m.kind(), "selected reproducible allreduce");
                    m
                }
                None => {
                    info!(
                        fallback = %self.previous.kind(),
                        "no reproducible collective module available, using the fallback"
                    );
                    Arc::clone(&self.previous)
                }
            }
        });
        Arc::clone(chosen)
    }

    /// The decomposition to use for `group`, or `None` when the group is
    /// (now) marked unsupported.
    async fn hierarchy(&self, group: &Arc<ProcessGroup>) -> Result<Option<Arc<TopologyCache>>> {
        if self.is_unsupported(group) {
            return Ok(None);
        }
        match self.topology(group).await {
            Ok(topo) if topo.is_degenerate() => {
                let reason = format!(
                    "{} location(s) of {} rank(s)",
                    topo.location_count(),
                    topo.local_size()
                );
                self.mark_unsupported(group, &reason)?;
                Ok(None)
            }
            Ok(topo) => Ok(Some(topo)),
            Err(e) if e.is_fallback() => {
                self.mark_unsupported(group, &e.to_string())?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn route(&self, group: &Arc<ProcessGroup>, op: Option<ReduceOp>) -> Result<Route> {
        if let Some(op) = op
            && !op.is_commutative()
        {
            debug!(%op, comm_id = group.id(), "non-commutative operator, using fallback");
            return Ok(self.fall_back(Arc::clone(&self.previous)));
        }
        Ok(match self.hierarchy(group).await? {
            Some(topo) => Route::Hierarchical(topo),
            None => self.fall_back(Arc::clone(&self.previous)),
        })
    }

    /// Reproducible mode takes every allreduce, whatever the operator.
    async fn route_allreduce(&self, group: &Arc<ProcessGroup>, op: ReduceOp) -> Result<Route> {
        if self.config.reproducible {
            return Ok(self.fall_back(self.reproducible_module()));
        }
        self.route(group, Some(op)).await
    }

    /// Route a non-blocking collective without waiting. A group whose
    /// topology has not been resolved yet is served by the fallback, since
    /// resolving would run collectives on the group out of call order.
    fn route_now(&self, group: &ProcessGroup, op: Option<ReduceOp>) -> Route {
        if op.is_some_and(|op| !op.is_commutative()) || self.is_unsupported(group) {
            return self.fall_back(Arc::clone(&self.previous));
        }
        match self.resolver.cached(group) {
            Some(topo) if !topo.is_degenerate() => Route::Hierarchical(topo),
            _ => self.fall_back(Arc::clone(&self.previous)),
        }
    }

    fn route_allreduce_now(&self, group: &ProcessGroup, op: ReduceOp) -> Route {
        if self.config.reproducible {
            return self.fall_back(self.reproducible_module());
        }
        self.route_now(group, Some(op))
    }

    fn fall_back(&self, module: Arc<dyn CollModule>) -> Route {
        self.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
        Route::Fallback(module)
    }

    fn stage_context(
        &self,
        topo: Arc<TopologyCache>,
        sbuf: SendBuf,
        rbuf: u64,
        count: usize,
        dtype: DataType,
        op: ReduceOp,
    ) -> Result<StageContext> {
        self.counters.pipeline_runs.fetch_add(1, Ordering::Relaxed);
        StageContext::new(
            topo,
            sbuf,
            rbuf,
            count,
            dtype,
            op,
            self.config.allreduce_segment_bytes,
        )
    }

    #[allow(clippy::too_many_arguments)]
    async unsafe fn hierarchical_allreduce(
        &self,
        group: &Arc<ProcessGroup>,
        sbuf: SendBuf,
        rbuf: u64,
        count: usize,
        dtype: DataType,
        op: ReduceOp,
        tag: CollectiveTag,
    ) -> Result<()> {
        let topo = match self.route_allreduce(group, op).await? {
            Route::Fallback(module) => {
                return unsafe {
                    module
                        .allreduce(group, sbuf, rbuf, count, dtype, op, tag)
                        .await
                        .map_err(HanError::from)
                };
            }
            Route::Hierarchical(topo) => topo,
        };
        if count == 0 {
            return Ok(());
        }
        match self.config.allreduce_algorithm {
            AllreduceAlgorithm::Pipelined => {
                let ctx = self.stage_context(topo, sbuf, rbuf, count, dtype, op)?;
                unsafe { pipeline::run_allreduce(&ctx).await }
            }
            AllreduceAlgorithm::Callback => {
                let ctx = self.stage_context(topo, sbuf, rbuf, count, dtype, op)?;
                unsafe { pipeline::start_allreduce_callback(ctx) }
                    .finish()
                    .await
            }
            AllreduceAlgorithm::Simple => unsafe {
                simple_allreduce(&topo, sbuf, rbuf, count, dtype, op).await
            },
        }
    }
}

impl std::fmt::Debug for HanModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HanModule")
            .field("fallback", &self.previous.kind())
            .field("catalog", &self.catalog)
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

fn group_key(group: &ProcessGroup) -> (u32, Rank) {
    (group.id(), group.global_rank())
}

/// Locate `root` in the decomposition and take this call's subgroup tags.
fn rooted(topo: &TopologyCache, root: Rank) -> Result<(RootRanks, RootedTags)> {
    let roots = topo.root_ranks(root)?;
    Ok((roots, RootedTags::take(topo, roots)))
}

impl CollModule for HanModule {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Han
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
    ) -> BoxFuture<'a, tessera::Result<()>> {
        async move {
            unsafe {
                self.hierarchical_allreduce(group, sbuf, rbuf, count, dtype, op, tag)
                    .await
                    .map_err(TesseraError::from)
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
    ) -> BoxFuture<'a, tessera::Result<()>> {
        async move {
            match self.route(group, Some(op)).await? {
                Route::Fallback(module) => unsafe {
                    module
                        .reduce(group, sbuf, rbuf, count, dtype, op, root, tag)
                        .await
                },
                Route::Hierarchical(_) if count == 0 => Ok(()),
                Route::Hierarchical(topo) => {
                    let (roots, tags) = rooted(&topo, root)?;
                    unsafe {
                        hierarchical_reduce(
                            &topo,
                            group.rank(),
                            sbuf,
                            rbuf,
                            count,
                            dtype,
                            op,
                            root,
                            roots,
                            tags,
                        )
                        .await
                        .map_err(TesseraError::from)
                    }
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
    ) -> BoxFuture<'a, tessera::Result<()>> {
        async move {
            match self.route(group, None).await? {
                Route::Fallback(module) => unsafe {
                    module.broadcast(group, ptr, count, dtype, root, tag).await
                },
                Route::Hierarchical(_) if count == 0 => Ok(()),
                Route::Hierarchical(topo) => {
                    let (roots, tags) = rooted(&topo, root)?;
                    unsafe {
                        hierarchical_broadcast(&topo, ptr, count, dtype, roots, tags)
                            .await
                            .map_err(TesseraError::from)
                    }
                }
            }
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
    ) -> BoxFuture<'a, tessera::Result<()>> {
        self.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
        unsafe {
            self.previous
                .allgather(group, send_ptr, recv_ptr, count, dtype, tag)
        }
    }

    /// Runs the callback pipeline when the group's topology is already
    /// resolved. Until then (no blocking collective and no
    /// [`HanModule::topology`] call on the group yet) the fallback serves
    /// the request, and the group is neither resolved nor marked by it.
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
        // Subgroup tags are reserved here, in call order, never from a
        // spawned task.
        let topo = match self.route_allreduce_now(&group, op) {
            Route::Fallback(module) => {
                return unsafe { module.iallreduce(group, sbuf, rbuf, count, dtype, op, tag) };
            }
            Route::Hierarchical(_) if count == 0 => return Request::ready(Ok(())),
            Route::Hierarchical(topo) => topo,
        };
        match self.stage_context(topo, sbuf, rbuf, count, dtype, op) {
            Ok(ctx) => unsafe { pipeline::run_allreduce_callback(ctx) },
            Err(e) => Request::ready(Err(e.into())),
        }
    }

    /// Routed like [`iallreduce`](CollModule::iallreduce): hierarchical
    /// only on a resolved group, with subgroup tags taken at call time.
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
        let topo = match self.route_now(&group, Some(op)) {
            Route::Fallback(module) => {
                return unsafe { module.ireduce(group, sbuf, rbuf, count, dtype, op, root, tag) };
            }
            Route::Hierarchical(_) if count == 0 => return Request::ready(Ok(())),
            Route::Hierarchical(topo) => topo,
        };
        let (roots, tags) = match rooted(&topo, root) {
            Ok(call) => call,
            Err(e) => return Request::ready(Err(e.into())),
        };
        let rank = group.rank();
        Request::spawn(async move {
            unsafe {
                hierarchical_reduce(&topo, rank, sbuf, rbuf, count, dtype, op, root, roots, tags)
                    .await
                    .map_err(TesseraError::from)
            }
        })
    }

    /// Same routing as [`ireduce`](CollModule::ireduce); the fallback serves
    /// groups not yet resolved.
    unsafe fn ibcast(
        self: Arc<Self>,
        group: Arc<ProcessGroup>,
        ptr: u64,
        count: usize,
        dtype: DataType,
        root: Rank,
        tag: CollectiveTag,
    ) -> Request {
        let topo = match self.route_now(&group, None) {
            Route::Fallback(module) => {
                return unsafe { module.ibcast(group, ptr, count, dtype, root, tag) };
            }
            Route::Hierarchical(_) if count == 0 => return Request::ready(Ok(())),
            Route::Hierarchical(topo) => topo,
        };
        let (roots, tags) = match rooted(&topo, root) {
            Ok(call) => call,
            Err(e) => return Request::ready(Err(e.into())),
        };
        Request::spawn(async move {
            unsafe {
                hierarchical_broadcast(&topo, ptr, count, dtype, roots, tags)
                    .await
                    .map_err(TesseraError::from)
            }
        })
    }
}
