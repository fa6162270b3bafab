use std::num::NonZeroUsize;
use std::time::Duration;

use futures::stream::BoxStream;
use futures::{stream, Stream, StreamExt};
use tokio::time::MissedTickBehavior;
use tracing::error;
use vivid_worker_job::{Job, JobKind};

use crate::backend::QueueBackend;
use crate::shutdown::ShutdownSignal;

/// What woke a worker up.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StreamSource {
    Polling,
    Notification,
    RunOnce,
}

struct JobSignalStreamData {
    interval: tokio::time::Interval,
    listener: BoxStream<'static, ()>,
    shutdown_signal: ShutdownSignal,
    concurrency: NonZeroUsize,
    yield_n: Option<(NonZeroUsize, StreamSource)>,
}

/// Returns a stream that yields on every insert notification and on every
/// `poll_interval` tick, until `shutdown_signal` resolves.
///
/// Each wake-up is repeated `concurrency` times so that every free slot
/// tries to fetch a job.
pub fn job_signal_stream(
    listener: BoxStream<'static, ()>,
    poll_interval: Duration,
    shutdown_signal: ShutdownSignal,
    concurrency: NonZeroUsize,
) -> impl Stream<Item = StreamSource> {
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let stream_data = JobSignalStreamData {
        interval,
        listener,
        shutdown_signal,
        concurrency,
        yield_n: None,
    };

    stream::unfold(stream_data, |mut f| async {
        if let Some((n, source)) = f.yield_n.take() {
            f.yield_n = NonZeroUsize::new(n.get() - 1).map(|remaining| (remaining, source));
            return Some((source, f));
        }

        let remaining = NonZeroUsize::new(f.concurrency.get() - 1);
        tokio::select! {
            _ = (f.interval).tick() => {
                f.yield_n = remaining.map(|n| (n, StreamSource::Polling));
                Some((StreamSource::Polling, f))
            },
            Some(()) = (f.listener).next() => {
                f.yield_n = remaining.map(|n| (n, StreamSource::Notification));
                Some((StreamSource::Notification, f))
            },
            _ = &mut f.shutdown_signal => None,
        }
    })
}

/// Returns a stream of every job of `kind` available right now, locking
/// each one for `worker_id`. It ends when the queue has nothing runnable
/// left or `shutdown_signal` resolves.
pub fn job_stream<B: QueueBackend>(
    backend: B,
    kind: JobKind,
    task_identifiers: Vec<String>,
    worker_id: String,
    shutdown_signal: ShutdownSignal,
) -> impl Stream<Item = Job> {
    stream::unfold((), move |()| {
        let backend = backend.clone();
        let task_identifiers = task_identifiers.clone();
        let worker_id = worker_id.clone();
        let shutdown_fut = shutdown_signal.clone();

        let job_fut = async move {
            match backend.get_job(kind, &task_identifiers, &worker_id).await {
                Ok(Some(job)) => Some((job, ())),
                Ok(None) => None,
                Err(e) => {
                    error!(queue = %kind, error = %e, "Could not get job");
                    None
                }
            }
        };

        async move {
            tokio::select! {
                res = job_fut => res,
                _ = shutdown_fut => None
            }
        }
    })
}
