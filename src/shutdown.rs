use std::future::Future;
use std::pin::Pin;

use cfg_if::cfg_if;
use futures::future::{pending, Shared};
use futures::FutureExt;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

cfg_if! {
    if #[cfg(windows)] {
        use tokio::signal::windows::*;

        async fn raw_shutdown_signal() {
            let (Ok(mut ctrl_c), Ok(mut ctrl_close), Ok(mut ctrl_shutdown)) =
                (ctrl_c(), ctrl_close(), ctrl_shutdown())
            else {
                warn!("Failed to attach windows shutdown signals, relying on programmatic shutdown");
                return pending().await;
            };
            select! {
                _ = ctrl_c.recv() => (),
                _ = ctrl_close.recv() => (),
                _ = ctrl_shutdown.recv() => (),
            }
        }
    } else if #[cfg(unix)] {
        use tokio::signal::unix::*;

        async fn unix_shutdown_signal(signal_kind: SignalKind) {
            match signal(signal_kind) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to listen to unix shutdown signal");
                    pending::<()>().await;
                }
            }
        }

        async fn raw_shutdown_signal() {
            select! {
                _ = unix_shutdown_signal(SignalKind::interrupt()) => (),
                _ = unix_shutdown_signal(SignalKind::terminate()) => (),
                _ = unix_shutdown_signal(SignalKind::hangup()) => (),
            };
        }
    } else {
        compile_error!("Your OS does not support shutdown signal ! Are you targeting wasm ?");
    }
}

/// Resolves once the worker should stop picking up jobs. Cloning is cheap
/// and every clone resolves at the same time.
pub type ShutdownSignal = Shared<Pin<Box<dyn Future<Output = ()> + Send>>>;

/// Resolves on SIGINT, SIGTERM or SIGHUP (Ctrl-C and friends on windows).
pub fn os_shutdown_signal() -> ShutdownSignal {
    async {
        raw_shutdown_signal().await;
        info!("Shutdown signal detected. Attempting graceful shutdown...");
    }
    .boxed()
    .shared()
}

/// A signal that never resolves on its own, for workers only stopped
/// through [`Worker::request_shutdown`](crate::Worker::request_shutdown).
pub fn no_shutdown_signal() -> ShutdownSignal {
    pending::<()>().boxed().shared()
}

/// Resolves when either `signal` resolves or `token` is cancelled.
pub(crate) fn with_cancellation(signal: ShutdownSignal, token: CancellationToken) -> ShutdownSignal {
    async move {
        select! {
            _ = signal => (),
            _ = token.cancelled_owned() => (),
        }
    }
    .boxed()
    .shared()
}
