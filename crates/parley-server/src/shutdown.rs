//! Relay shutdown: one `CancellationToken` fans out to the listener and the
//! bridge, and the listener's graceful-shutdown hook stops the hub. The
//! daemon then drains the listener, bridge, and hub tasks.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long the listener, bridge, and hub get to stop on Ctrl-C.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared shutdown signal for the listener and bridge tasks.
#[derive(Clone, Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

/// Outcome of [`ShutdownCoordinator::drain`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Tasks that returned normally.
    pub finished: usize,
    /// Tasks that panicked or were cancelled elsewhere.
    pub failed: usize,
    /// Tasks still running at the deadline; these are aborted.
    pub abandoned: usize,
}

impl ShutdownCoordinator {
    /// Create a coordinator that has not fired yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that is cancelled when shutdown begins.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Begin shutdown. Idempotent.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Signal shutdown, then wait for `handles` against a single deadline
    /// `timeout` from now. Anything still running at the deadline is aborted.
    pub async fn drain(&self, handles: Vec<JoinHandle<()>>, timeout: Duration) -> DrainReport {
        self.shutdown();
        info!(task_count = handles.len(), ?timeout, "draining relay tasks");

        let deadline = Instant::now() + timeout;
        let mut report = DrainReport::default();
        for mut handle in handles {
            match timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => report.finished += 1,
                Ok(Err(e)) => {
                    warn!(error = %e, "relay task failed during drain");
                    report.failed += 1;
                }
                Err(_) => {
                    handle.abort();
                    report.abandoned += 1;
                }
            }
        }

        if report.abandoned > 0 {
            warn!(abandoned = report.abandoned, ?timeout, "drain deadline passed; tasks aborted");
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use async_trait::async_trait;
    use parley_core::collab::MembershipResolver;
    use parley_core::{GroupId, StoreFailure, UserId};
    use parley_settings::MembershipFallback;

    use super::*;
    use crate::bridge::{Bridge, MemoryPubSub};
    use crate::hub::Hub;

    struct Nobody;

    #[async_trait]
    impl MembershipResolver for Nobody {
        async fn members(&self, _group: GroupId) -> Result<HashSet<UserId>, StoreFailure> {
            Ok(HashSet::new())
        }

        async fn is_member(&self, _group: GroupId, _user: &UserId) -> Result<bool, StoreFailure> {
            Ok(false)
        }
    }

    #[test]
    fn tokens_observe_shutdown() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        assert!(!coord.is_shutting_down());
        coord.shutdown();
        coord.shutdown();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn drain_stops_bridge_and_hub() {
        let coord = ShutdownCoordinator::new();
        let transport = Arc::new(MemoryPubSub::new(8));
        let (hub, hub_task) =
            Hub::spawn(8, Arc::new(Nobody), transport.clone(), MembershipFallback::Drop);
        let bridge = Bridge::new(transport, hub.clone())
            .start(coord.token())
            .await
            .unwrap();

        // The listener normally stops the hub from its shutdown hook.
        let stopper = {
            let token = coord.token();
            let hub = hub.clone();
            tokio::spawn(async move {
                token.cancelled().await;
                let _ = hub.shutdown().await;
            })
        };

        let report = coord
            .drain(vec![stopper, bridge, hub_task], DEFAULT_DRAIN_TIMEOUT)
            .await;
        assert_eq!(
            report,
            DrainReport {
                finished: 3,
                failed: 0,
                abandoned: 0
            }
        );
        assert!(hub.stats().await.is_err());
    }

    #[tokio::test]
    async fn drain_counts_panicked_tasks() {
        let coord = ShutdownCoordinator::new();
        let handle = tokio::spawn(async { panic!("boom") });
        let report = coord.drain(vec![handle], DEFAULT_DRAIN_TIMEOUT).await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.finished, 0);
    }

    #[tokio::test]
    async fn drain_aborts_tasks_past_the_deadline() {
        let coord = ShutdownCoordinator::new();
        let quick = tokio::spawn(async {});
        let stuck = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(300)).await;
        });
        let report = coord
            .drain(vec![quick, stuck], Duration::from_millis(50))
            .await;
        assert_eq!(report.finished, 1);
        assert_eq!(report.abandoned, 1);
        assert!(coord.is_shutting_down());
    }
}
