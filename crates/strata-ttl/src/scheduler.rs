//! Periodic sweep driver

use crate::job::TtlEnforcementJob;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Runs a [`TtlEnforcementJob`] on a fixed interval until shut down
///
/// The first sweep runs immediately. A failed sweep is logged and the loop
/// carries on.
#[derive(Debug)]
pub struct SweepScheduler {
    job: Arc<TtlEnforcementJob>,
    interval: Duration,
}

/// Handle to a spawned scheduler
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<usize>,
}

impl SchedulerHandle {
    /// Signal shutdown and wait for the loop; returns sweeps run
    ///
    /// # Errors
    /// Returns the join error if the scheduler task panicked.
    pub async fn shutdown(self) -> Result<usize, tokio::task::JoinError> {
        let _ = self.shutdown.send(true);
        self.task.await
    }
}

impl SweepScheduler {
    /// Scheduler using the job's configured interval
    #[must_use]
    pub fn new(job: Arc<TtlEnforcementJob>) -> Self {
        let interval = job.config().interval();
        Self { job, interval }
    }

    #[inline]
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run sweeps until `shutdown` turns `true` or its sender drops
    ///
    /// Returns the number of sweeps started.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> usize {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut sweeps = 0;

        tracing::info!("TTL scheduler started, interval {:?}", self.interval);
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    sweeps += 1;
                    if let Err(err) = self.job.run_once().await {
                        tracing::error!("TTL sweep failed: {}", err);
                    }
                }
            }
        }
        tracing::info!("TTL scheduler stopped after {} sweeps", sweeps);
        sweeps
    }

    /// Run on the current tokio runtime
    #[must_use]
    pub fn spawn(self) -> SchedulerHandle {
        let (shutdown, receiver) = watch::channel(false);
        let task = tokio::spawn(self.run(receiver));
        SchedulerHandle { shutdown, task }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TtlConfig;
    use crate::test_support::MockContracts;
    use strata_core::ContractStatus;
    use strata_store::{MemoryContractStore, StoreError};
    use strata_test_utils::expired_contract;

    #[tokio::test(start_paused = true)]
    async fn sweeps_on_interval_until_shutdown() {
        let contracts = Arc::new(MemoryContractStore::new());
        let job = Arc::new(TtlEnforcementJob::new(
            contracts.clone(),
            TtlConfig::new().with_interval_secs(60),
        ));
        let handle = SweepScheduler::new(job).spawn();

        tokio::time::sleep(Duration::from_secs(1)).await;
        contracts.insert(expired_contract("c1", "acme", 1));
        tokio::time::sleep(Duration::from_secs(120)).await;

        let sweeps = handle.shutdown().await.unwrap();
        assert!(sweeps >= 2);
        assert_eq!(contracts.get("c1").unwrap().status, ContractStatus::Expired);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_sweep_does_not_stop_loop() {
        let mut store = MockContracts::new();
        store
            .expect_list_expired()
            .returning(|_| Err(StoreError::Unavailable("down".to_string())));
        let job = Arc::new(TtlEnforcementJob::new(Arc::new(store), TtlConfig::default()));

        let handle = SweepScheduler::new(job)
            .with_interval(Duration::from_secs(10))
            .spawn();
        tokio::time::sleep(Duration::from_secs(35)).await;

        assert!(handle.shutdown().await.unwrap() >= 3);
    }

    #[tokio::test]
    async fn dropped_sender_stops_loop() {
        let job = Arc::new(TtlEnforcementJob::new(
            Arc::new(MemoryContractStore::new()),
            TtlConfig::default(),
        ));
        let (sender, receiver) = watch::channel(false);
        drop(sender);
        assert_eq!(SweepScheduler::new(job).run(receiver).await, 0);
    }
}
