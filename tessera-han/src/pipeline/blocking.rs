use tracing::{debug, trace};

use super::{PIPELINE_DEPTH, Stage, StageContext};
use crate::error::Result;

/// Run the pipelined allreduce, one window step at a time.
///
/// Step `s` runs local-broadcast of segment `s - 3`, cross-broadcast of
/// `s - 2`, cross-reduce of `s - 1` and local-reduce of `s` concurrently,
/// and waits for all four before moving on. The first and last
/// `PIPELINE_DEPTH - 1` steps run a partial window.
///
/// # Safety
/// The buffers captured by `ctx` must stay valid until this returns.
pub(crate) async unsafe fn run_allreduce(ctx: &StageContext) -> Result<()> {
    let segments = ctx.plan().segment_count();
    debug!(
        segments,
        per_segment = ctx.plan().elements_per_segment(),
        local_root = ctx.is_local_root(),
        "starting pipelined allreduce"
    );

    for step in 0..segments + PIPELINE_DEPTH - 1 {
        let window = [
            (Stage::LocalBroadcast, step.checked_sub(3)),
            (Stage::CrossBroadcast, step.checked_sub(2)),
            (Stage::CrossReduce, step.checked_sub(1)),
            (Stage::LocalReduce, Some(step)),
        ];
        trace!(step, "pipeline step");

        let mut running = Vec::with_capacity(PIPELINE_DEPTH);
        for (stage, segment) in window {
            let Some(segment) = segment.filter(|&s| s < segments) else {
                continue;
            };
            if stage.is_cross() && !ctx.is_local_root() {
                continue;
            }
            let task = ctx.task(stage, segment)?;
            running.push(unsafe { ctx.run(task) });
        }
        futures::future::try_join_all(running).await?;
    }
    Ok(())
}
