//! First-error-wins cancellation
//!
//! Stages publish fatal errors into a single-slot queue. A watcher task
//! takes the first one, fires the shared [`CancellationToken`] and closes
//! the slot; every later report is dropped. Stages observe the token at
//! iteration boundaries only, so in-flight work always completes.

use std::fmt::Display;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Handle held by every pipeline stage
pub struct Coordinator<E> {
    token: CancellationToken,
    slot: mpsc::Sender<E>,
}

impl<E> Clone for Coordinator<E> {
    fn clone(&self) -> Self {
        Self {
            token: self.token.clone(),
            slot: self.slot.clone(),
        }
    }
}

impl<E> Coordinator<E>
where
    E: Display + Send + 'static,
{
    /// Create the coordinator and spawn its watcher.
    ///
    /// The watcher resolves to the first reported error, or `None` once
    /// every coordinator handle has been dropped without a report.
    pub fn spawn() -> (Self, JoinHandle<Option<E>>) {
        let (slot, mut reports) = mpsc::channel::<E>(1);
        let token = CancellationToken::new();
        let watcher_token = token.clone();

        let watcher = tokio::spawn(async move {
            let first = reports.recv().await?;
            reports.close();
            error!(error = %first, "Pipeline error, cancelling");
            watcher_token.cancel();
            Some(first)
        });

        (Self { token, slot }, watcher)
    }

    /// Publish a fatal error. Never blocks; only the first report counts.
    pub fn report(&self, err: E) {
        if let Err(rejected) = self.slot.try_send(err) {
            debug!(error = %rejected.into_inner(), "Dropping error report, one is already pending");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_error_wins() {
        let (coordinator, watcher) = Coordinator::<String>::spawn();

        let reporters: Vec<_> = (0..8)
            .map(|i| {
                let c = coordinator.clone();
                tokio::spawn(async move { c.report(format!("failure {i}")) })
            })
            .collect();
        for r in reporters {
            r.await.unwrap();
        }

        coordinator.token().cancelled().await;
        assert!(coordinator.is_cancelled());
        drop(coordinator);

        let first = watcher.await.unwrap();
        assert!(first.unwrap().starts_with("failure "));
    }

    #[tokio::test]
    async fn test_clean_run_reports_nothing() {
        let (coordinator, watcher) = Coordinator::<String>::spawn();
        let token = coordinator.token().clone();
        drop(coordinator);

        assert!(watcher.await.unwrap().is_none());
        assert!(!token.is_cancelled());
    }
}
