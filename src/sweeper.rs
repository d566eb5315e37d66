//! C8 — Inactivity Sweeper.
//!
//! A single periodic task, grounded on the cron scheduler's
//! `interval_at` + `MissedTickBehavior::Skip` + execution-lock pattern
//! (`cron/scheduler.rs`), that stops agents whose `last_active` has aged
//! past the configured timeout. Runs as an in-process tokio task inside the
//! supervisor, not a separate OS process — there is exactly one of these
//! per `fleetctl serve` instance.

use crate::lifecycle::agent::AgentManager;
use crate::status::{StatusKind, StatusStore};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// RAII guard that releases the sweep-in-progress flag on drop, so a
/// panicking sweep doesn't wedge every later tick into "skip forever".
struct ExecutionGuard(Arc<AtomicBool>);

impl Drop for ExecutionGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct InactivitySweeper {
    status: Arc<StatusStore>,
    agents: Arc<AgentManager>,
    inactivity_timeout: Duration,
    check_interval: Duration,
}

impl InactivitySweeper {
    pub fn new(
        status: Arc<StatusStore>,
        agents: Arc<AgentManager>,
        inactivity_timeout: Duration,
        check_interval: Duration,
    ) -> Self {
        Self {
            status,
            agents,
            inactivity_timeout,
            check_interval,
        }
    }

    /// Spawn the sweep loop as a background task. The returned handle is
    /// aborted by the supervisor on shutdown.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.check_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let execution_lock = Arc::new(AtomicBool::new(false));

        loop {
            ticker.tick().await;

            if execution_lock.load(Ordering::Acquire) {
                tracing::debug!("previous sweep still running, skipping tick");
                continue;
            }
            execution_lock.store(true, Ordering::Release);
            let _guard = ExecutionGuard(execution_lock.clone());

            if let Err(error) = self.sweep_once().await {
                tracing::warn!(%error, "inactivity sweep failed, pausing before next attempt");
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
        }
    }

    async fn sweep_once(&self) -> crate::error::Result<()> {
        let keys = self.status.scan_agent_statuses().await?;
        let now = chrono::Utc::now().timestamp();

        for key in keys {
            let record = match self.status.get(&key).await {
                Ok(record) => record,
                Err(error) => {
                    tracing::warn!(agent_id = %key.agent_id(), %error, "failed to read status during sweep");
                    continue;
                }
            };

            if record.status != StatusKind::Running {
                continue;
            }

            let Some(last_active) = record.last_active else {
                continue;
            };

            let idle_for = now.saturating_sub(last_active);
            if idle_for < self.inactivity_timeout.as_secs() as i64 {
                continue;
            }

            tracing::info!(
                agent_id = %key.agent_id(),
                idle_for,
                "stopping agent for inactivity"
            );
            let outcome = self.agents.stop(key.agent_id(), false).await;
            tracing::info!(agent_id = %key.agent_id(), ?outcome, "inactivity stop complete");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_guard_releases_the_flag_on_drop() {
        let flag = Arc::new(AtomicBool::new(true));
        {
            let _guard = ExecutionGuard(flag.clone());
            assert!(flag.load(Ordering::Acquire));
        }
        assert!(!flag.load(Ordering::Acquire));
    }
}
