use crate::error::{Result, TesseraError};
use std::future::Future;
use tokio::task::{AbortHandle, JoinHandle};

type AbortHook = Box<dyn FnOnce() + Send + Sync>;

enum Inner {
    Task(JoinHandle<Result<()>>),
    Done(Result<()>),
}

/// A handle to a non-blocking collective operation.
///
/// The collective runs in a spawned task. Call [`Request::wait`] to await it,
/// [`Request::test`] to poll, or hand the request a completion callback with
/// [`Request::set_completion_callback`].
///
/// If dropped while still pending, the background task is aborted to
/// prevent writes to potentially-freed memory.
pub struct Request {
    inner: Option<Inner>,
    on_abort: Option<AbortHook>,
}

impl Request {
    /// Spawn a future as a non-blocking collective and return its request.
    pub fn spawn(fut: impl Future<Output = Result<()>> + Send + 'static) -> Self {
        Self {
            inner: Some(Inner::Task(tokio::spawn(fut))),
            on_abort: None,
        }
    }

    /// [`Request::spawn`] with a hook run synchronously when the request is
    /// dropped while still pending. The hook must stop everything the
    /// future has started that can still touch the caller's buffers, since
    /// aborting the task itself only takes effect at its next poll.
    pub fn spawn_with_abort(
        fut: impl Future<Output = Result<()>> + Send + 'static,
        on_abort: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Some(Inner::Task(tokio::spawn(fut))),
            on_abort: Some(Box::new(on_abort)),
        }
    }

    /// A request that has already completed with `result`.
    pub fn ready(result: Result<()>) -> Self {
        Self {
            inner: Some(Inner::Done(result)),
            on_abort: None,
        }
    }

    /// Handle that aborts the collective's task without consuming the
    /// request. `None` once the request has completed.
    pub fn abort_handle(&self) -> Option<AbortHandle> {
        match &self.inner {
            Some(Inner::Task(handle)) => Some(handle.abort_handle()),
            Some(Inner::Done(_)) | None => None,
        }
    }

    /// Wait for the collective to complete and propagate any error.
    ///
    /// Dropping the returned future before it resolves aborts the collective,
    /// like dropping the request itself.
    pub async fn wait(mut self) -> Result<()> {
        let joined = match &mut self.inner {
            // The handle stays in `self` while pending.
            Some(Inner::Task(handle)) => handle.await,
            Some(Inner::Done(_)) | None => {
                return match self.inner.take() {
                    Some(Inner::Done(result)) => result,
                    _ => Err(TesseraError::transport("request already consumed")),
                };
            }
        };
        self.inner = None;
        self.on_abort = None;
        joined.map_err(|e| {
            if e.is_cancelled() {
                TesseraError::Cancelled
            } else {
                TesseraError::transport(format!("collective task panicked: {e}"))
            }
        })?
    }

    /// Check if the collective has finished (non-blocking).
    pub fn test(&self) -> bool {
        match &self.inner {
            Some(Inner::Task(handle)) => handle.is_finished(),
            Some(Inner::Done(_)) | None => true,
        }
    }

    /// Run `callback` with the request's result once it completes.
    ///
    /// The callback runs exactly once, on whichever runtime thread observes
    /// completion; an already-completed request runs it before returning.
    /// The request is consumed, so it can no longer be aborted by dropping.
    pub fn set_completion_callback<F>(mut self, callback: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        match self.inner.take() {
            Some(Inner::Done(result)) => callback(result),
            other => {
                let pending = Request {
                    inner: other,
                    on_abort: self.on_abort.take(),
                };
                tokio::spawn(async move {
                    callback(pending.wait().await);
                });
            }
        }
    }
}

impl Drop for Request {
    fn drop(&mut self) {
        if let Some(Inner::Task(handle)) = &self.inner {
            handle.abort();
            if let Some(on_abort) = self.on_abort.take() {
                on_abort();
            }
        }
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("finished", &self.test())
            .finish()
    }
}

/// A group of non-blocking collectives that can be waited on together.
#[derive(Default)]
pub struct RequestGroup {
    requests: Vec<Request>,
}

impl RequestGroup {
    /// Create an empty group.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a request to the group.
    pub fn push(&mut self, r: Request) {
        self.requests.push(r);
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Wait for all requests in the group to complete.
    ///
    /// Returns the first error encountered, if any. All requests are awaited
    /// regardless of errors.
    pub async fn wait_all(self) -> Result<()> {
        let mut first_err = None;
        for r in self.requests {
            if let Err(e) = r.wait().await
                && first_err.is_none()
            {
                first_err = Some(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
