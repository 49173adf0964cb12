/// Labeled task registry: the live task set the canceller inspects.
///
/// tokio does not expose its task list, so hosts spawn the work they want
/// to be interruptible (and the work they want protected) through a
/// [`TaskSet`]. Each entry carries the label it was spawned with.
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::task::{AbortHandle, Id, JoinError, JoinHandle};

/// Observer-side reference to a spawned task.
///
/// Cloning is cheap. Dropping a handle never affects the task.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    label: Arc<str>,
    abort: AbortHandle,
    interrupted: Arc<AtomicBool>,
}

impl TaskHandle {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn id(&self) -> Id {
        self.abort.id()
    }

    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }

    /// Request cancellation. Takes effect at the task's next `.await`.
    ///
    /// The task is marked first so its [`TaskJoin`] reports
    /// [`TaskExit::Interrupted`] rather than a cancellation error.
    pub fn cancel(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        self.abort.abort();
    }

    /// Whether [`cancel`](Self::cancel) was called on this task.
    pub fn was_cancelled(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }
}

/// How a labeled task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskExit<T> {
    Completed(T),
    /// Cancelled by an interrupt before it produced a value.
    Interrupted,
}

/// Join future returned by [`TaskSet::spawn`].
///
/// A task cancelled through its [`TaskHandle`] resolves to
/// `Ok(TaskExit::Interrupted)`. Panics, and aborts that did not come from
/// the handle, still surface as `Err(JoinError)`.
#[derive(Debug)]
pub struct TaskJoin<T> {
    join: JoinHandle<T>,
    handle: TaskHandle,
}

impl<T> TaskJoin<T> {
    pub fn handle(&self) -> &TaskHandle {
        &self.handle
    }
}

impl<T> Future for TaskJoin<T> {
    type Output = Result<TaskExit<T>, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let result = match Pin::new(&mut self.join).poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(result) => result,
        };
        Poll::Ready(match result {
            Ok(value) => Ok(TaskExit::Completed(value)),
            Err(e) if e.is_cancelled() && self.handle.was_cancelled() => {
                tracing::debug!(label = %self.handle.label, "interrupted task unwound");
                Ok(TaskExit::Interrupted)
            }
            Err(e) => Err(e),
        })
    }
}

/// Shared registry of labeled tasks. Clones share one registry.
#[derive(Debug, Clone, Default)]
pub struct TaskSet {
    tasks: Arc<Mutex<Vec<TaskHandle>>>,
}

impl TaskSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `future` on the current runtime under `label`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<F>(&self, label: impl Into<String>, future: F) -> TaskJoin<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let label: Arc<str> = label.into().into();
        let join = tokio::spawn(future);
        let handle = TaskHandle {
            label,
            abort: join.abort_handle(),
            interrupted: Arc::new(AtomicBool::new(false)),
        };
        tracing::debug!(label = %handle.label, id = %handle.id(), "spawned labeled task");

        let mut tasks = self.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle.clone());
        drop(tasks);

        TaskJoin { join, handle }
    }

    /// Handles of every task that has not finished yet, in spawn order.
    pub fn live(&self) -> Vec<TaskHandle> {
        let mut tasks = self.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.clone()
    }

    // Nothing panics while holding this lock.
    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<TaskHandle>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }
}
