//! Process lifecycle: one shared cancellation token, named background
//! tasks and a bounded drain on shutdown.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long running tasks get to finish after cancellation.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Outcome of [`Lifecycle::shutdown`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Tasks that returned on their own within the grace period.
    pub finished: Vec<String>,
    /// Tasks that were still running at the deadline and were aborted.
    pub aborted: Vec<String>,
    /// Tasks that panicked.
    pub panicked: Vec<String>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.aborted.is_empty() && self.panicked.is_empty()
    }
}

pub struct Lifecycle {
    token: CancellationToken,
    grace: Duration,
    tasks: Vec<(String, JoinHandle<()>)>,
    cancelled: Arc<AtomicBool>,
}

impl Lifecycle {
    pub fn new(grace: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            grace,
            tasks: Vec::new(),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The shared token. Clones observe the same cancellation.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn grace_period(&self) -> Duration {
        self.grace
    }

    /// Spawn a task that is drained on shutdown.
    pub fn spawn<F>(&mut self, name: impl Into<String>, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        tracing::debug!(task = %name, "task spawned");
        self.tasks.push((name, tokio::spawn(fut)));
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Request shutdown. Only the first call has an effect; returns
    /// whether this call was it.
    pub fn cancel(&self) -> bool {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return false;
        }
        tracing::info!("shutdown requested");
        self.token.cancel();
        true
    }

    /// Block until SIGINT, SIGTERM or until the token is cancelled from
    /// elsewhere, then cancel.
    pub async fn wait_for_signal(&self) {
        tokio::select! {
            _ = ctrl_c() => tracing::info!(signal = "SIGINT", "signal received"),
            _ = terminate() => tracing::info!(signal = "SIGTERM", "signal received"),
            _ = self.token.cancelled() => {}
        }
        self.cancel();
    }

    /// Cancel, wait up to the grace period for every task and abort
    /// what is left.
    pub async fn shutdown(self) -> ShutdownReport {
        self.cancel();
        let deadline = tokio::time::Instant::now() + self.grace;
        let mut report = ShutdownReport::default();

        for (name, mut handle) in self.tasks {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => report.finished.push(name),
                Ok(Err(e)) => {
                    tracing::error!(task = %name, error = %e, "task panicked");
                    report.panicked.push(name);
                }
                Err(_) => {
                    tracing::warn!(task = %name, grace_ms = self.grace.as_millis() as u64, "task did not stop in time, aborting");
                    handle.abort();
                    let _ = handle.await;
                    report.aborted.push(name);
                }
            }
        }

        tracing::info!(
            finished = report.finished.len(),
            aborted = report.aborted.len(),
            panicked = report.panicked.len(),
            "shutdown complete"
        );
        report
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE_PERIOD)
    }
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut s) => {
            s.recv().await;
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to listen for SIGTERM");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
