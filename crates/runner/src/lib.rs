//! Process runner for the relay's long-running tasks.
//!
//! The runner drives every app process (MQTT ingress, enrichment worker,
//! publisher event loop) under a shared cancellation token:
//! - SIGINT/SIGTERM cancels the token
//! - The first process to fail cancels the token for the others
//! - Closers run afterwards with a timeout, whatever the outcome
//!
//! # Example
//!
//! ```no_run
//! use enricher_runner::Runner;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     Runner::new()
//!         .with_app_process(|ctx| async move {
//!             ctx.cancelled().await;
//!             Ok(())
//!         })
//!         .with_closer(|| async move { Ok(()) })
//!         .with_closer_timeout(Duration::from_secs(5))
//!         .run()
//!         .await
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

type BoxedResultFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// A named app process; receives the shared cancellation token
struct AppProcess {
    name: String,
    start: Box<dyn FnOnce(CancellationToken) -> BoxedResultFuture + Send>,
}

/// A cleanup step run after all app processes stopped
pub type Closer = Box<dyn FnOnce() -> BoxedResultFuture + Send>;

pub struct Runner {
    app_processes: Vec<AppProcess>,
    closers: Vec<Closer>,
    closer_timeout: Duration,
    cancellation_token: CancellationToken,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    /// Creates a runner with a 10 second closer timeout
    pub fn new() -> Self {
        Self {
            app_processes: Vec::new(),
            closers: Vec::new(),
            closer_timeout: Duration::from_secs(10),
            cancellation_token: CancellationToken::new(),
        }
    }

    pub fn with_app_process<F, Fut>(self, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name = format!("process-{}", self.app_processes.len());
        self.with_named_app_process(name, process)
    }

    /// Adds an app process whose name is used in logs
    pub fn with_named_app_process<F, Fut>(mut self, name: impl Into<String>, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.app_processes.push(AppProcess {
            name: name.into(),
            start: Box::new(|token| Box::pin(process(token))),
        });
        self
    }

    /// Adds a closer; closers run concurrently and a failing one does not stop the rest
    pub fn with_closer<F, Fut>(mut self, closer: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.closers.push(Box::new(|| Box::pin(closer())));
        self
    }

    pub fn with_closer_timeout(mut self, timeout: Duration) -> Self {
        self.closer_timeout = timeout;
        self
    }

    /// Use an externally owned token, e.g. to share it with code outside the runner
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    /// Runs all app processes until shutdown, then the closers
    ///
    /// Returns the first process error, if any. The caller decides the exit code.
    pub async fn run(self) -> anyhow::Result<()> {
        let token = self.cancellation_token;

        spawn_signal_handlers(token.clone());

        let first_error = Self::run_app_processes(self.app_processes, token).await;

        if !self.closers.is_empty() {
            tracing::info!(timeout = ?self.closer_timeout, "running closers");

            match tokio::time::timeout(self.closer_timeout, Self::run_closers(self.closers)).await {
                Ok(()) => tracing::info!("all closers completed"),
                Err(_) => tracing::error!(timeout = ?self.closer_timeout, "closers timed out"),
            }
        }

        match first_error {
            Some(err) => {
                tracing::error!(error = format!("{:#}", err), "runner stopped after process failure");
                Err(err)
            }
            None => {
                tracing::info!("runner stopped");
                Ok(())
            }
        }
    }

    /// Runs processes until all finish or the token is cancelled
    async fn run_app_processes(
        processes: Vec<AppProcess>,
        token: CancellationToken,
    ) -> Option<anyhow::Error> {
        let mut join_set = JoinSet::new();

        for process in processes {
            let process_token = token.clone();
            join_set.spawn(async move {
                let result = (process.start)(process_token).await;
                (process.name, result)
            });
        }

        let mut first_error = None;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((name, Ok(()))) => {
                    tracing::debug!(process = %name, "app process completed");
                }
                Ok((name, Err(err))) => {
                    tracing::error!(process = %name, error = format!("{:#}", err), "app process failed");
                    if first_error.is_none() {
                        first_error = Some(err.context(format!("app process {} failed", name)));
                    }
                    token.cancel();
                }
                Err(err) => {
                    tracing::error!(error = %err, "app process panicked");
                    if first_error.is_none() {
                        first_error = Some(anyhow::anyhow!("app process panicked: {}", err));
                    }
                    token.cancel();
                }
            }

            if token.is_cancelled() {
                break;
            }
        }

        // Give cancelled processes the chance to exit on their own before aborting
        while let Some(joined) = join_set.join_next().await {
            if let Ok((name, Err(err))) = joined {
                tracing::warn!(process = %name, error = format!("{:#}", err), "app process failed during shutdown");
            }
        }

        first_error
    }

    async fn run_closers(closers: Vec<Closer>) {
        let mut closer_set = JoinSet::new();

        for closer in closers {
            closer_set.spawn(async move { closer().await });
        }

        while let Some(result) = closer_set.join_next().await {
            match result {
                Ok(Ok(())) => tracing::debug!("closer completed"),
                Ok(Err(err)) => tracing::error!(error = format!("{:#}", err), "closer failed"),
                Err(err) => tracing::error!(error = %err, "closer panicked"),
            }
        }
    }
}

fn spawn_signal_handlers(token: CancellationToken) {
    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("received SIGINT");
                ctrl_c_token.cancel();
            }
            Err(err) => tracing::error!(error = %err, "failed to listen for SIGINT"),
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                tracing::info!("received SIGTERM");
                token.cancel();
            }
            Err(err) => tracing::error!(error = %err, "failed to listen for SIGTERM"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_run_stops_all_processes_on_cancellation() {
        let token = CancellationToken::new();
        let stopped = Arc::new(AtomicUsize::new(0));

        let mut runner = Runner::new().with_cancellation_token(token.clone());
        for _ in 0..2 {
            let stopped = stopped.clone();
            runner = runner.with_app_process(move |ctx| async move {
                ctx.cancelled().await;
                stopped.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let result = runner.run().await;

        assert!(result.is_ok());
        assert_eq!(stopped.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failing_process_cancels_others_and_runs_closers() {
        let closer_called = Arc::new(AtomicBool::new(false));
        let closer_flag = closer_called.clone();
        let sibling_cancelled = Arc::new(AtomicBool::new(false));
        let sibling_flag = sibling_cancelled.clone();

        let result = Runner::new()
            .with_named_app_process("ingress", |_ctx| async move {
                Err(anyhow::anyhow!("broker unreachable"))
            })
            .with_named_app_process("worker", move |ctx| async move {
                ctx.cancelled().await;
                sibling_flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .with_closer(move || async move {
                closer_flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .with_closer_timeout(Duration::from_secs(1))
            .run()
            .await;

        let err = result.unwrap_err();
        assert!(format!("{:#}", err).contains("broker unreachable"));
        assert!(format!("{:#}", err).contains("ingress"));
        assert!(sibling_cancelled.load(Ordering::SeqCst));
        assert!(closer_called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_failing_closer_does_not_stop_others() {
        let counter = Arc::new(AtomicUsize::new(0));
        let first = counter.clone();
        let second = counter.clone();

        let runner = Runner::new()
            .with_closer(|| async move { Err(anyhow::anyhow!("flush failed")) })
            .with_closer(move || async move {
                first.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .with_closer(move || async move {
                second.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });

        Runner::run_closers(runner.closers).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
