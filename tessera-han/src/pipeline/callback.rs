use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tessera::{Request, TesseraError};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, trace};

use super::{PIPELINE_DEPTH, PipelineTask, Stage, StageContext};
use crate::completion::Completion;
use crate::error::{HanError, Result};

/// Start the pipelined allreduce without blocking on any stage.
///
/// Each stage is started as a non-blocking sub-collective whose completion
/// starts the segment's next stage. A segment that finishes its last stage
/// starts the next unstarted segment, so at most `PIPELINE_DEPTH` segments
/// are in flight. The run finishes when every segment has reported to the
/// shared [`Completion`]; dropping it before then aborts every stage still
/// in flight and starts no new ones.
///
/// # Safety
/// The buffers captured by `ctx` must stay valid until the run finishes or
/// is dropped.
pub(crate) unsafe fn start_allreduce_callback(ctx: StageContext) -> CallbackRun {
    let segments = ctx.plan().segment_count();
    debug!(segments, local_root = ctx.is_local_root(), "starting callback allreduce");

    let (tx, rx) = oneshot::channel();
    let completion = Completion::attach(segments, move |result| {
        let _ = tx.send(result);
    });
    let pipeline = Arc::new(CallbackPipeline {
        ctx,
        completion,
        next_segment: AtomicUsize::new(0),
        in_flight: Mutex::new(InFlight::default()),
    });
    for _ in 0..PIPELINE_DEPTH {
        pipeline.start_next_segment();
    }

    CallbackRun {
        pipeline,
        done: rx,
        finished: false,
    }
}

/// [`start_allreduce_callback`] behind a [`Request`]. Dropping the request
/// cancels the pipeline before returning.
///
/// # Safety
/// Same contract as [`start_allreduce_callback`].
pub(crate) unsafe fn run_allreduce_callback(ctx: StageContext) -> Request {
    let run = unsafe { start_allreduce_callback(ctx) };
    let pipeline = Arc::clone(&run.pipeline);
    Request::spawn_with_abort(
        async move { run.finish().await.map_err(TesseraError::from) },
        move || pipeline.cancel(),
    )
}

/// A started callback pipeline.
pub(crate) struct CallbackRun {
    pipeline: Arc<CallbackPipeline>,
    done: oneshot::Receiver<Result<()>>,
    finished: bool,
}

impl CallbackRun {
    /// Wait for every segment to report.
    pub(crate) async fn finish(mut self) -> Result<()> {
        let result = (&mut self.done).await;
        self.finished = true;
        result.unwrap_or(Err(HanError::Tessera(TesseraError::Cancelled)))
    }
}

impl Drop for CallbackRun {
    fn drop(&mut self) {
        if !self.finished {
            self.pipeline.cancel();
        }
    }
}

/// Tasks currently running, by segment: the stage's sub-collective and the
/// task waiting on it.
#[derive(Default)]
struct InFlight {
    cancelled: bool,
    tasks: HashMap<usize, Vec<AbortHandle>>,
}

struct CallbackPipeline {
    ctx: StageContext,
    completion: Arc<Completion>,
    next_segment: AtomicUsize,
    in_flight: Mutex<InFlight>,
}

impl CallbackPipeline {
    fn claim_segment(&self) -> Option<usize> {
        let index = self.next_segment.fetch_add(1, Ordering::AcqRel);
        (index < self.ctx.plan().segment_count()).then_some(index)
    }

    fn start_next_segment(self: &Arc<Self>) {
        if let Some(index) = self.claim_segment() {
            self.issue(Stage::LocalReduce, index);
        }
    }

    fn issue(self: &Arc<Self>, stage: Stage, index: usize) {
        let task = match self.ctx.task(stage, index) {
            Ok(task) => task,
            Err(e) => return self.fail(index, e),
        };
        // Held across the spawn so a fast stage cannot register its
        // successor before this handle is recorded.
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if in_flight.cancelled {
            trace!(segment = index, stage = %stage, "pipeline cancelled, not issuing");
            return;
        }
        let request = unsafe { self.ctx.start(&task) };
        let mut handles: Vec<AbortHandle> = request.abort_handle().into_iter().collect();
        let this = Arc::clone(self);
        let waiter = tokio::spawn(async move {
            let result = request.wait().await;
            this.on_stage_complete(task, result);
        });
        handles.push(waiter.abort_handle());
        in_flight.tasks.insert(index, handles);
    }

    fn on_stage_complete(self: &Arc<Self>, task: PipelineTask, result: tessera::Result<()>) {
        let index = task.range.index;
        if let Err(e) = result {
            return self.fail(index, HanError::stage(task.stage.name())(e));
        }
        trace!(segment = index, stage = %task.stage, "stage complete");
        match task.stage.next(self.ctx.is_local_root()) {
            Some(next) => self.issue(next, index),
            None => {
                self.in_flight
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .tasks
                    .remove(&index);
                self.completion.on_operation_complete(index, Ok(()));
                self.start_next_segment();
            }
        }
    }

    fn fail(&self, index: usize, error: HanError) {
        debug!(segment = index, error = %error, "pipeline segment failed");
        self.completion.on_operation_complete(index, Err(error));
        // Retire segments that never started; the first error is already recorded.
        while let Some(skipped) = self.claim_segment() {
            self.completion.on_operation_complete(skipped, Ok(()));
        }
    }

    /// Stop issuing stages and abort the ones running. Idempotent.
    fn cancel(&self) {
        let tasks = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            in_flight.cancelled = true;
            std::mem::take(&mut in_flight.tasks)
        };
        if !tasks.is_empty() {
            debug!(running = tasks.len(), "cancelling callback allreduce");
        }
        for handle in tasks.into_values().flatten() {
            handle.abort();
        }
    }
}
