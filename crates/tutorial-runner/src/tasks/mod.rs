//! Cancellable units of asynchronous work.
//!
//! A [`Task`] starts running as soon as it is created and can be awaited by any
//! number of parties. Cancellation is cooperative: [`Task::cancel`] only flips
//! the task's [`CancellationToken`]; the work itself must check it (see
//! [`throw_if_cancelled`] and [`cancellable`]) at each suspension point.
//!
//! Mutating operations are totally ordered by having each new task await the
//! previous task's [`Task::settled`] before touching shared resources.

use crate::runner::RunnerError;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::{Future, IntoFuture};
use std::sync::Arc;
pub use tokio_util::sync::CancellationToken;

/// Settled failure of a task.
#[derive(Clone, Debug, thiserror::Error)]
pub enum TaskError {
    /// Cancellation sentinel: expected, never logged as an error.
    #[error("task cancelled")]
    Cancelled,
    #[error(transparent)]
    Failed(Arc<RunnerError>),
}

impl TaskError {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The underlying error for hard failures.
    #[must_use]
    pub fn error(&self) -> Option<&RunnerError> {
        match self {
            Self::Cancelled => None,
            Self::Failed(err) => Some(err),
        }
    }
}

impl From<RunnerError> for TaskError {
    fn from(err: RunnerError) -> Self {
        Self::Failed(Arc::new(err))
    }
}

pub type TaskResult<T> = Result<T, TaskError>;

#[derive(Clone, Debug, Default)]
pub struct TaskOptions {
    /// Settle a cancelled task to [`TaskError::Cancelled`] instead of a
    /// [`TaskError::Failed`] carrying an `E_CANCELLED` error.
    pub ignore_cancel: bool,
    /// External signal; cancelling it cancels the task too.
    pub signal: Option<CancellationToken>,
}

impl TaskOptions {
    #[must_use]
    pub fn ignore_cancel() -> Self {
        Self {
            ignore_cancel: true,
            signal: None,
        }
    }

    #[must_use]
    pub fn with_signal(mut self, signal: Option<CancellationToken>) -> Self {
        self.signal = signal;
        self
    }
}

type SharedOutcome<T> = Shared<BoxFuture<'static, TaskResult<T>>>;

/// Handle to a running (or settled) unit of work.
#[derive(Clone)]
pub struct Task<T: Clone> {
    token: CancellationToken,
    outcome: SharedOutcome<T>,
}

impl<T> Task<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Spawn `work` on the current tokio runtime.
    pub fn new<F, Fut>(work: F, options: TaskOptions) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = TaskResult<T>> + Send + 'static,
    {
        let token = match options.signal {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };
        let handle = tokio::spawn(work(token.clone()));
        let ignore_cancel = options.ignore_cancel;

        let outcome = async move {
            let result = match handle.await {
                Ok(result) => result,
                Err(join_err) => Err(TaskError::from(RunnerError::internal(format!(
                    "task terminated abnormally: {join_err}"
                )))),
            };
            match result {
                Err(TaskError::Cancelled) if !ignore_cancel => {
                    Err(TaskError::from(RunnerError::cancelled()))
                }
                other => other,
            }
        }
        .boxed()
        .shared();

        Self { token, outcome }
    }

    /// Already-settled task.
    pub fn done(value: T) -> Self {
        Self {
            token: CancellationToken::new(),
            outcome: futures::future::ready(Ok(value)).boxed().shared(),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub async fn outcome(&self) -> TaskResult<T> {
        self.outcome.clone().await
    }

    /// Wait for the task to finish, whatever the outcome.
    pub async fn settled(&self) {
        let _ = self.outcome.clone().await;
    }

    /// Outcome if the task has already settled.
    #[must_use]
    pub fn peek(&self) -> Option<TaskResult<T>> {
        self.outcome.peek().cloned()
    }
}

impl<T> IntoFuture for Task<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Output = TaskResult<T>;
    type IntoFuture = SharedOutcome<T>;

    fn into_future(self) -> Self::IntoFuture {
        self.outcome
    }
}

/// Cooperative cancellation check.
pub fn throw_if_cancelled(token: &CancellationToken) -> TaskResult<()> {
    if token.is_cancelled() {
        Err(TaskError::Cancelled)
    } else {
        Ok(())
    }
}

/// Await `future` unless `token` is cancelled first.
///
/// The future is dropped on cancellation; whatever side effect it already
/// started in the sandbox is not undone.
pub async fn cancellable<F>(token: &CancellationToken, future: F) -> TaskResult<F::Output>
where
    F: Future,
{
    tokio::select! {
        biased;
        () = token.cancelled() => Err(TaskError::Cancelled),
        output = future => Ok(output),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn resolves_with_work_output() {
        let task = Task::new(|_| async { Ok(7) }, TaskOptions::default());
        assert_eq!(task.outcome().await.ok(), Some(7));
    }

    #[tokio::test]
    async fn cancelled_task_settles_to_sentinel_when_ignoring_cancel() {
        let task: Task<()> = Task::new(
            |token| async move {
                cancellable(&token, tokio::time::sleep(Duration::from_secs(60))).await?;
                Ok(())
            },
            TaskOptions::ignore_cancel(),
        );
        task.cancel();
        assert!(matches!(task.outcome().await, Err(TaskError::Cancelled)));
    }

    #[tokio::test]
    async fn cancelled_task_rejects_without_ignore_cancel() {
        let task: Task<()> = Task::new(
            |token| async move {
                token.cancelled().await;
                throw_if_cancelled(&token)
            },
            TaskOptions::default(),
        );
        task.cancel();
        let err = task.outcome().await.err();
        let code = err.as_ref().and_then(TaskError::error).map(|e| e.code);
        assert_eq!(code, Some(crate::runner::ErrorCode::Cancelled));
    }

    #[tokio::test]
    async fn external_signal_cancels_task() {
        let signal = CancellationToken::new();
        let task: Task<()> = Task::new(
            |token| async move {
                token.cancelled().await;
                throw_if_cancelled(&token)
            },
            TaskOptions::ignore_cancel().with_signal(Some(signal.clone())),
        );
        signal.cancel();
        assert!(task.outcome().await.is_err());
        assert!(task.is_cancelled());
    }

    #[tokio::test]
    async fn chained_task_observes_predecessor_side_effects() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let first_log = Arc::clone(&log);
        let first = Task::new(
            move |_| async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                first_log.lock().unwrap().push("first");
                Ok(())
            },
            TaskOptions::ignore_cancel(),
        );
        let previous = first.clone();
        let second_log = Arc::clone(&log);
        let second = Task::new(
            move |_| async move {
                previous.settled().await;
                second_log.lock().unwrap().push("second");
                Ok(())
            },
            TaskOptions::ignore_cancel(),
        );
        second.settled().await;
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn done_task_is_immediately_settled() {
        let task = Task::done("ready");
        assert_eq!(task.outcome().await.ok(), Some("ready"));
        assert!(matches!(task.peek(), Some(Ok("ready"))));
        assert_eq!(task.await.ok(), Some("ready"));
    }
}
