//! Task handles
//!
//! A [`TaskHandle`] stands for one asynchronous unit of work. It starts out
//! `Pending` and moves exactly once to a terminal state (`Completed`,
//! `Faulted` or `Canceled`). The producer side is a [`Completer`], a
//! single-assignment cell: the first `try_*` call wins and every later one
//! is ignored.
//!
//! The terminal outcome is handed to exactly one consumer, either by
//! awaiting the handle or by registering a completion observer with
//! [`TaskHandle::on_complete`]. The state and completion timestamp stay
//! observable through any live reference to the handle, and any number of
//! callers can wait for the handle to settle with [`TaskHandle::wait`]
//! without consuming it.
//!
//! # Example
//!
//! ```rust,ignore
//! use taskweave_core::task::{TaskHandle, TaskOutcome};
//!
//! let handle = TaskHandle::spawn(async { Ok::<_, String>(42) });
//! assert_eq!(handle.await, TaskOutcome::Completed(42));
//! ```

use crate::cancel::CancellationSignal;
use crate::error::TaskError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Lifecycle state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Completed,
    Faulted,
    Canceled,
}

impl TaskState {
    /// Whether this is one of the three terminal states
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Faulted => "faulted",
            Self::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

/// Terminal outcome of a task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome<T, E> {
    Completed(T),
    Faulted(E),
    Canceled,
}

impl<T, E> TaskOutcome<T, E> {
    /// The terminal state this outcome puts a task in
    pub fn state(&self) -> TaskState {
        match self {
            Self::Completed(_) => TaskState::Completed,
            Self::Faulted(_) => TaskState::Faulted,
            Self::Canceled => TaskState::Canceled,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn is_faulted(&self) -> bool {
        matches!(self, Self::Faulted(_))
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    /// Convert into a `Result`, keeping faults and cancellation apart
    pub fn into_result(self) -> Result<T, TaskError<E>> {
        match self {
            Self::Completed(value) => Ok(value),
            Self::Faulted(error) => Err(TaskError::Faulted(error)),
            Self::Canceled => Err(TaskError::Canceled),
        }
    }

    /// Map the success value
    pub fn map<U, F>(self, f: F) -> TaskOutcome<U, E>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            Self::Completed(value) => TaskOutcome::Completed(f(value)),
            Self::Faulted(error) => TaskOutcome::Faulted(error),
            Self::Canceled => TaskOutcome::Canceled,
        }
    }
}

impl<T, E> From<Result<T, E>> for TaskOutcome<T, E> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Self::Completed(value),
            Err(error) => Self::Faulted(error),
        }
    }
}

/// Unique identifier of a task handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

type Continuation<T, E> = Box<dyn FnOnce(TaskOutcome<T, E>) + Send>;

struct Cell<T, E> {
    id: TaskId,
    inner: Mutex<CellInner<T, E>>,
    settled: Notify,
}

struct CellInner<T, E> {
    state: TaskState,
    completed_at: Option<Instant>,
    outcome: Option<TaskOutcome<T, E>>,
    waker: Option<Waker>,
    continuation: Option<Continuation<T, E>>,
}

impl<T, E> Cell<T, E> {
    fn new() -> Self {
        Self {
            id: TaskId::new(),
            inner: Mutex::new(CellInner {
                state: TaskState::Pending,
                completed_at: None,
                outcome: None,
                waker: None,
                continuation: None,
            }),
            settled: Notify::new(),
        }
    }

    /// Single-assignment transition out of `Pending`.
    ///
    /// The continuation and waker run after the lock is released.
    fn settle(&self, outcome: TaskOutcome<T, E>) -> bool {
        let mut inner = self.inner.lock();
        if inner.state.is_terminal() {
            return false;
        }

        inner.state = outcome.state();
        inner.completed_at = Some(Instant::now());

        let delivery = match inner.continuation.take() {
            Some(continuation) => Some((continuation, outcome)),
            None => {
                inner.outcome = Some(outcome);
                None
            }
        };
        let waker = inner.waker.take();
        drop(inner);

        self.settled.notify_waiters();
        if let Some((continuation, outcome)) = delivery {
            continuation(outcome);
        }
        if let Some(waker) = waker {
            waker.wake();
        }

        true
    }

    fn state(&self) -> TaskState {
        self.inner.lock().state
    }
}

/// Producer side of a [`TaskHandle`]
///
/// Dropping a completer whose task is still pending resolves the task as
/// `Canceled`, so a consumer never waits on a promise nobody can keep.
pub struct Completer<T, E> {
    cell: Arc<Cell<T, E>>,
}

impl<T, E> Completer<T, E> {
    /// Set the terminal outcome; `true` if this call performed the transition
    pub fn try_set(&self, outcome: TaskOutcome<T, E>) -> bool {
        self.cell.settle(outcome)
    }

    pub fn try_complete(&self, value: T) -> bool {
        self.try_set(TaskOutcome::Completed(value))
    }

    pub fn try_fault(&self, error: E) -> bool {
        self.try_set(TaskOutcome::Faulted(error))
    }

    pub fn try_cancel(&self) -> bool {
        self.try_set(TaskOutcome::Canceled)
    }

    /// Whether the task already reached a terminal state
    pub fn is_set(&self) -> bool {
        self.cell.state().is_terminal()
    }

    /// Id of the task this completer resolves
    pub fn id(&self) -> TaskId {
        self.cell.id
    }
}

impl<T, E> Drop for Completer<T, E> {
    fn drop(&mut self) {
        if self.cell.settle(TaskOutcome::Canceled) {
            debug!(task_id = %self.cell.id, "completer dropped while pending, task canceled");
        }
    }
}

impl<T, E> fmt::Debug for Completer<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer")
            .field("id", &self.cell.id)
            .field("state", &self.cell.state())
            .finish()
    }
}

/// Handle to one asynchronous unit of work
///
/// Awaiting the handle yields its [`TaskOutcome`].
pub struct TaskHandle<T, E> {
    cell: Arc<Cell<T, E>>,
}

impl<T, E> TaskHandle<T, E> {
    /// Create a pending handle together with the completer that resolves it
    pub fn pending() -> (Completer<T, E>, Self) {
        let cell = Arc::new(Cell::new());
        (
            Completer {
                cell: Arc::clone(&cell),
            },
            Self { cell },
        )
    }

    /// A handle that is already terminal
    pub fn from_outcome(outcome: TaskOutcome<T, E>) -> Self {
        let (completer, handle) = Self::pending();
        completer.try_set(outcome);
        handle
    }

    pub fn completed(value: T) -> Self {
        Self::from_outcome(TaskOutcome::Completed(value))
    }

    pub fn faulted(error: E) -> Self {
        Self::from_outcome(TaskOutcome::Faulted(error))
    }

    pub fn canceled() -> Self {
        Self::from_outcome(TaskOutcome::Canceled)
    }

    pub fn id(&self) -> TaskId {
        self.cell.id
    }

    pub fn state(&self) -> TaskState {
        self.cell.state()
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn is_completed(&self) -> bool {
        self.state() == TaskState::Completed
    }

    pub fn is_faulted(&self) -> bool {
        self.state() == TaskState::Faulted
    }

    pub fn is_canceled(&self) -> bool {
        self.state() == TaskState::Canceled
    }

    /// When the task reached its terminal state
    pub fn completed_at(&self) -> Option<Instant> {
        self.cell.inner.lock().completed_at
    }

    /// Wait until the task is terminal without taking its outcome
    pub async fn wait(&self) -> TaskState {
        loop {
            let notified = self.cell.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let state = self.state();
            if state.is_terminal() {
                return state;
            }
            notified.await;
        }
    }

    /// Register the completion observer that receives the outcome
    ///
    /// The observer runs synchronously on whichever thread settles the task,
    /// or immediately on the calling thread if the task is already terminal.
    pub fn on_complete<F>(self, observer: F)
    where
        F: FnOnce(TaskOutcome<T, E>) + Send + 'static,
    {
        let mut inner = self.cell.inner.lock();
        match inner.outcome.take() {
            Some(outcome) => {
                drop(inner);
                observer(outcome);
            }
            None if inner.state.is_terminal() => {
                warn!(task_id = %self.cell.id, "outcome already consumed, observer dropped");
            }
            None => {
                inner.continuation = Some(Box::new(observer));
            }
        }
    }

    /// Await the task and convert its outcome into a `Result`
    pub async fn result(self) -> Result<T, TaskError<E>> {
        self.await.into_result()
    }
}

impl<T, E> TaskHandle<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Run a fallible future on the tokio runtime
    ///
    /// `Ok` completes the task, `Err` faults it. The operation keeps running
    /// even if the handle is dropped.
    pub fn spawn<Fut>(operation: Fut) -> Self
    where
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let (completer, handle) = Self::pending();
        tokio::spawn(async move {
            let result = operation.await;
            completer.try_set(result.into());
        });
        handle
    }

    /// Run a fallible future that is abandoned once `signal` fires
    ///
    /// The future is dropped at its next suspension point after the trigger
    /// and the task resolves as `Canceled`.
    pub fn spawn_cancellable<Fut>(signal: &CancellationSignal, operation: Fut) -> Self
    where
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let (completer, handle) = Self::pending();
        let signal = signal.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = signal.cancelled() => {
                    completer.try_cancel();
                }
                result = operation => {
                    completer.try_set(result.into());
                }
            }
        });
        handle
    }
}

impl<T, E> Future for TaskHandle<T, E> {
    type Output = TaskOutcome<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = self.cell.inner.lock();
        if let Some(outcome) = inner.outcome.take() {
            return Poll::Ready(outcome);
        }
        if inner.state.is_terminal() {
            panic!("TaskHandle polled after its outcome was taken");
        }

        let stale = inner
            .waker
            .as_ref()
            .map_or(true, |waker| !waker.will_wake(cx.waker()));
        if stale {
            inner.waker = Some(cx.waker().clone());
        }
        Poll::Pending
    }
}

impl<T, E> fmt::Debug for TaskHandle<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.cell.id)
            .field("state", &self.state())
            .finish()
    }
}
