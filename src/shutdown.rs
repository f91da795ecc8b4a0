//! Graceful termination: one root cancellation token for the daemon and a
//! bounded wait for the tasks that observe it.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct ShutdownManager {
    cancel_token: CancellationToken,
    task_handles: Vec<JoinHandle<()>>,
    grace: Duration,
}

impl ShutdownManager {
    pub fn new(grace: Duration) -> Self {
        Self {
            cancel_token: CancellationToken::new(),
            task_handles: Vec::new(),
            grace,
        }
    }

    /// Root token; components derive child tokens from it.
    pub fn token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn register_task(&mut self, handle: JoinHandle<()>) {
        self.task_handles.push(handle);
    }

    /// Resolves on Ctrl+C or when the root token is cancelled elsewhere.
    pub async fn wait_for_signal(&self) {
        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => tracing::info!("🛑 Shutdown signal received"),
                Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
            },
            _ = self.cancel_token.cancelled() => {
                tracing::info!("🛑 Shutdown requested");
            }
        }
    }

    /// Cancels the root token and waits for registered tasks up to the grace
    /// period.
    pub async fn shutdown(mut self) {
        self.cancel_token.cancel();

        let handles = std::mem::take(&mut self.task_handles);
        let join_all = async {
            for handle in handles {
                if let Err(e) = handle.await {
                    tracing::warn!("Task ended abnormally during shutdown: {}", e);
                }
            }
        };

        match tokio::time::timeout(self.grace, join_all).await {
            Ok(()) => tracing::info!("✓ All tasks shut down gracefully"),
            Err(_) => tracing::warn!(
                "⏱️ Shutdown timeout: some tasks did not complete within {:?}",
                self.grace
            ),
        }
    }
}
