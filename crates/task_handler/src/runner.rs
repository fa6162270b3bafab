use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::task_result::{RunTaskError, SpawnTaskResult};

/// A unit of work run by a worker for every job carrying `IDENTIFIER`.
///
/// `Context` is whatever the worker hands to each attempt, typically a
/// handle able to report progress for the job being run.
pub trait TaskHandler<Context>: Send + Sync + 'static
where
    Context: Send + 'static,
{
    type Payload: DeserializeOwned + Serialize + Send + 'static;
    type Error: Display + Send + 'static;

    /// Name tag of the jobs this handler runs.
    const IDENTIFIER: &'static str;

    /// Runs one attempt. The returned value is stored as the job result.
    fn run(
        &self,
        payload: Self::Payload,
        ctx: Context,
    ) -> impl Future<Output = Result<Value, Self::Error>> + Send;

    /// Runs once the job used its last attempt and failed, however the
    /// attempt ended: an error, a panic, a timeout or an abort.
    fn on_exhausted(
        &self,
        _payload: Self::Payload,
        _ctx: Context,
        _reason: String,
    ) -> impl Future<Output = ()> + Send {
        async {}
    }
}

/// Decodes `payload` and runs `handler` on its own tokio task.
///
/// The attempt ends with whichever comes first: the handler returning,
/// the handler panicking, `cancel_token` firing or `timeout` elapsing. On
/// cancellation and timeout the spawned task is aborted.
pub async fn spawn_task<H, Context>(
    handler: Arc<H>,
    payload: Value,
    ctx: Context,
    cancel_token: CancellationToken,
    timeout: Option<Duration>,
) -> SpawnTaskResult<String>
where
    H: TaskHandler<Context>,
    Context: Send + 'static,
{
    let start = Instant::now();

    let payload: H::Payload = match serde_json::from_value(payload) {
        Ok(payload) => payload,
        Err(e) => {
            return SpawnTaskResult {
                duration: start.elapsed(),
                result: Err(RunTaskError::InvalidPayload(e.to_string())),
            }
        }
    };

    let job_task = tokio::spawn(async move {
        handler
            .run(payload, ctx)
            .await
            .map_err(|e| e.to_string())
    });
    let abort_handle = job_task.abort_handle();

    let task_fut = async {
        job_task
            .await
            .map_err(|_| RunTaskError::TaskPanic)
            .and_then(|r| r.map_err(RunTaskError::TaskError))
    };
    let timeout_fut = async {
        match timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => std::future::pending().await,
        }
    };

    let result = tokio::select! {
        r = task_fut => r,
        _ = cancel_token.cancelled() => {
            abort_handle.abort();
            Err(RunTaskError::TaskAborted)
        }
        _ = timeout_fut => {
            abort_handle.abort();
            Err(RunTaskError::TaskTimedOut(timeout.unwrap_or_default()))
        }
    };

    SpawnTaskResult {
        duration: start.elapsed(),
        result,
    }
}

/// Decodes `payload` and runs [`TaskHandler::on_exhausted`] on its own
/// tokio task.
///
/// Returns `false` when the payload could not be decoded or the hook
/// panicked.
pub async fn spawn_exhausted<H, Context>(
    handler: Arc<H>,
    payload: Value,
    ctx: Context,
    reason: String,
) -> bool
where
    H: TaskHandler<Context>,
    Context: Send + 'static,
{
    let Ok(payload) = serde_json::from_value::<H::Payload>(payload) else {
        return false;
    };

    tokio::spawn(async move { handler.on_exhausted(payload, ctx, reason).await })
        .await
        .is_ok()
}
