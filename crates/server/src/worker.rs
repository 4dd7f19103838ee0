//! Background drain of the provisioning task queue.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use haggle_channels::PhoneProvisioner;
use haggle_core::domain::provisioning::ProvisioningTask;
use haggle_core::provisioning::{
    ProvisioningEngine, ProvisioningEngineConfig, RetryPolicy, TransitionResult,
};
use haggle_db::{ProvisioningRepository, RepositoryError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

const CLAIM_BATCH: u32 = 10;

pub struct ProvisioningWorker {
    worker_id: String,
    repository: Arc<dyn ProvisioningRepository>,
    provisioner: PhoneProvisioner,
    engine: ProvisioningEngine,
    claim_timeout: chrono::Duration,
    poll_interval: Duration,
}

impl ProvisioningWorker {
    pub fn new(
        repository: Arc<dyn ProvisioningRepository>,
        provisioner: PhoneProvisioner,
        config: ProvisioningEngineConfig,
        poll_interval: Duration,
    ) -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::new_v4()),
            repository,
            provisioner,
            claim_timeout: chrono::Duration::seconds(config.claim_timeout_seconds),
            engine: ProvisioningEngine::with_config(config),
            poll_interval,
        }
    }

    /// Drains on every wakeup and every poll tick until the wakeup channel closes.
    pub async fn run(self, mut wakeups: mpsc::Receiver<()>) {
        info!(
            event_name = "worker.provisioning.started",
            worker_id = %self.worker_id,
            poll_interval_secs = self.poll_interval.as_secs(),
            "provisioning worker started"
        );

        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                wakeup = wakeups.recv() => {
                    if wakeup.is_none() {
                        break;
                    }
                }
                _ = ticker.tick() => {}
            }

            if let Err(error) = self.drain_once(Utc::now()).await {
                warn!(
                    event_name = "worker.provisioning.drain_failed",
                    worker_id = %self.worker_id,
                    error = %error,
                    "provisioning queue could not be read"
                );
            }
        }

        info!(
            event_name = "worker.provisioning.stopped",
            worker_id = %self.worker_id,
            "provisioning worker stopped"
        );
    }

    /// Runs every task claimable at `now`; returns how many this worker claimed.
    pub async fn drain_once(&self, now: DateTime<Utc>) -> Result<usize, RepositoryError> {
        let due = self.repository.list_claimable(now, now - self.claim_timeout, CLAIM_BATCH).await?;

        let mut claimed = 0;
        for task in due {
            if self.run_task(task, now).await? {
                claimed += 1;
            }
        }
        Ok(claimed)
    }

    async fn run_task(&self, task: ProvisioningTask, now: DateTime<Utc>) -> Result<bool, RepositoryError> {
        let correlation_id = task.id.0.clone();
        let claim = match self.engine.claim_task(task, &self.worker_id, now) {
            Ok(claim) => claim,
            Err(error) => {
                debug!(correlation_id, error = %error, "task not claimable");
                return Ok(false);
            }
        };
        if !self.commit(&claim).await? {
            debug!(correlation_id, "task claimed by another worker");
            return Ok(false);
        }

        let task = claim.task;
        let outcome = match self.provisioner.provision(&task, now, &correlation_id).await {
            Ok(phone_number) => self.engine.complete_task(task, phone_number, now),
            Err(error) => {
                let policy =
                    if error.is_retryable() { RetryPolicy::Retry } else { RetryPolicy::FailTerminal };
                warn!(
                    event_name = "worker.provisioning.task_failed",
                    correlation_id,
                    retryable = error.is_retryable(),
                    error = %error,
                    "provisioning task failed"
                );
                self.engine.fail_task(task, error.to_string(), policy, now)
            }
        };

        match outcome {
            Ok(transition) => {
                if self.commit(&transition).await? {
                    info!(
                        event_name = "worker.provisioning.transition",
                        correlation_id,
                        buyer_id = %transition.task.buyer_id.0,
                        to_state = transition.task.state.as_str(),
                        retry_count = transition.task.retry_count,
                        "provisioning task moved"
                    );
                }
            }
            Err(error) => {
                warn!(correlation_id, error = %error, "provisioning transition rejected");
            }
        }
        Ok(true)
    }

    async fn commit(&self, result: &TransitionResult) -> Result<bool, RepositoryError> {
        self.repository.apply_transition(&result.task, &result.transition).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use haggle_channels::{PhoneNumberProvider, PhoneProvisioner, ProvisionError, PurchasedNumber};
    use haggle_core::domain::buyer::{Buyer, BuyerId, VehiclePreferences};
    use haggle_core::domain::provisioning::{
        PhoneNumberRequest, ProvisioningKind, ProvisioningTaskState,
    };
    use haggle_core::provisioning::{ProvisioningEngine, ProvisioningEngineConfig};
    use haggle_db::{
        connect_with_settings, migrations, BuyerRepository, DbPool, ProvisioningRepository,
        SqlBuyerRepository, SqlProvisioningRepository,
    };

    use super::ProvisioningWorker;

    struct ScriptedProvider {
        failures_left: Mutex<u32>,
        purchases: Mutex<u32>,
    }

    impl ScriptedProvider {
        fn failing(times: u32) -> Self {
            Self { failures_left: Mutex::new(times), purchases: Mutex::new(0) }
        }
    }

    #[async_trait]
    impl PhoneNumberProvider for ScriptedProvider {
        async fn search_available(&self, _area_code: &str) -> Result<Option<String>, ProvisionError> {
            let mut failures = self.failures_left.lock().expect("lock");
            if *failures > 0 {
                *failures -= 1;
                return Err(ProvisionError::Provider { status: 503, body: "busy".to_string() });
            }
            Ok(Some("+14155550177".to_string()))
        }

        async fn purchase(&self, phone_number: &str) -> Result<PurchasedNumber, ProvisionError> {
            *self.purchases.lock().expect("lock") += 1;
            Ok(PurchasedNumber { sid: "PN1".to_string(), phone_number: phone_number.to_string() })
        }

        async fn attach_to_messaging_service(&self, _number_sid: &str) -> Result<(), ProvisionError> {
            Ok(())
        }
    }

    fn ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
    }

    async fn setup() -> (DbPool, Arc<SqlBuyerRepository>, Arc<SqlProvisioningRepository>) {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        let buyers = Arc::new(SqlBuyerRepository::new(pool.clone()));
        let created_at = ts("2026-03-01T09:00:00Z");
        buyers
            .save(Buyer {
                id: BuyerId("B-1".to_string()),
                email: "b-1@example.com".to_string(),
                inbox_email: "b-1@inbox.haggle.test".to_string(),
                phone_number: None,
                zip_code: None,
                preferences: VehiclePreferences::default(),
                created_at,
                updated_at: created_at,
            })
            .await
            .expect("save buyer");
        let tasks = Arc::new(SqlProvisioningRepository::new(pool.clone()));
        (pool, buyers, tasks)
    }

    fn config() -> ProvisioningEngineConfig {
        ProvisioningEngineConfig {
            default_max_retries: 3,
            retry_base_delay_seconds: 30,
            ..ProvisioningEngineConfig::default()
        }
    }

    async fn enqueue(tasks: &SqlProvisioningRepository, now: DateTime<Utc>) {
        let task = ProvisioningEngine::with_config(config()).create_task(
            BuyerId("B-1".to_string()),
            ProvisioningKind::PhoneNumber,
            PhoneNumberRequest::default().to_payload(),
            now,
        );
        tasks.enqueue(task).await.expect("enqueue");
    }

    #[tokio::test]
    async fn transient_failure_backs_off_then_completes() {
        let (_pool, buyers, tasks) = setup().await;
        let provider = Arc::new(ScriptedProvider::failing(1));
        let worker = ProvisioningWorker::new(
            tasks.clone(),
            PhoneProvisioner::new(buyers.clone(), provider.clone(), "415"),
            config(),
            Duration::from_secs(30),
        );
        let now = ts("2026-03-02T10:00:00Z");
        enqueue(&tasks, now).await;

        assert_eq!(worker.drain_once(now).await.expect("drain"), 1);
        let pending = tasks.list_for_buyer(&BuyerId("B-1".to_string())).await.expect("list");
        assert_eq!(pending[0].state, ProvisioningTaskState::RetryableFailed);
        assert_eq!(pending[0].retry_count, 1);

        // Not due until the backoff elapses.
        assert_eq!(worker.drain_once(now).await.expect("drain"), 0);

        let later = pending[0].available_at + chrono::Duration::seconds(1);
        assert_eq!(worker.drain_once(later).await.expect("drain"), 1);
        let done = tasks.list_for_buyer(&BuyerId("B-1".to_string())).await.expect("list");
        assert_eq!(done[0].state, ProvisioningTaskState::Completed);
        assert_eq!(done[0].result.as_deref(), Some("+14155550177"));
        assert_eq!(*provider.purchases.lock().expect("lock"), 1);

        let buyer = buyers.find_by_id(&BuyerId("B-1".to_string())).await.expect("find").expect("buyer");
        assert_eq!(buyer.phone_number.as_deref(), Some("+14155550177"));

        let audit = tasks.list_transitions(&done[0].id).await.expect("transitions");
        let states: Vec<&str> = audit.iter().map(|row| row.to_state.as_str()).collect();
        assert_eq!(states, vec!["running", "retryable_failed", "running", "completed"]);
    }

    #[tokio::test]
    async fn completed_tasks_are_not_claimed_again() {
        let (_pool, buyers, tasks) = setup().await;
        let worker = ProvisioningWorker::new(
            tasks.clone(),
            PhoneProvisioner::new(buyers, Arc::new(ScriptedProvider::failing(0)), "415"),
            config(),
            Duration::from_secs(30),
        );
        let now = ts("2026-03-02T10:00:00Z");
        enqueue(&tasks, now).await;

        assert_eq!(worker.drain_once(now).await.expect("drain"), 1);
        assert_eq!(worker.drain_once(now + chrono::Duration::hours(1)).await.expect("drain"), 0);
    }
}
