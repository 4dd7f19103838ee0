//! Provisioning task state machine
//!
//! Background work (phone number allocation today) is modelled as tasks with
//! idempotency keys so a crashed or restarted worker can pick them back up
//! without double-purchasing. This module is pure: it only computes the next
//! task state; persistence and execution live in `haggle-db` and the worker.

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::buyer::BuyerId;
use crate::domain::provisioning::{
    ProvisioningKind, ProvisioningTask, ProvisioningTaskId, ProvisioningTaskState,
    ProvisioningTransition,
};

#[derive(Clone, Debug)]
pub struct ProvisioningEngineConfig {
    /// How long before a claimed task is considered abandoned
    pub claim_timeout_seconds: i64,
    pub default_max_retries: u32,
    pub retry_backoff_multiplier: u32,
    pub retry_base_delay_seconds: i64,
}

impl Default for ProvisioningEngineConfig {
    fn default() -> Self {
        Self {
            claim_timeout_seconds: 300,
            default_max_retries: 5,
            retry_backoff_multiplier: 2,
            retry_base_delay_seconds: 30,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProvisioningError {
    #[error("invalid state transition from {from:?} to {to:?}: {reason}")]
    InvalidTransition { from: ProvisioningTaskState, to: ProvisioningTaskState, reason: String },
    #[error("claim conflict: task {0:?} already claimed by {1}")]
    ClaimConflict(ProvisioningTaskId, String),
    #[error("task not yet available: {0:?}")]
    TaskNotYetAvailable(ProvisioningTaskId),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionResult {
    pub task: ProvisioningTask,
    pub transition: ProvisioningTransition,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryPolicy {
    Retry,
    FailTerminal,
}

#[derive(Clone, Debug, Default)]
pub struct ProvisioningEngine {
    config: ProvisioningEngineConfig,
}

impl ProvisioningEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ProvisioningEngineConfig) -> Self {
        Self { config }
    }

    pub fn create_task(
        &self,
        buyer_id: BuyerId,
        kind: ProvisioningKind,
        payload_json: impl Into<String>,
        now: DateTime<Utc>,
    ) -> ProvisioningTask {
        ProvisioningTask {
            id: ProvisioningTaskId(Uuid::new_v4().to_string()),
            idempotency_key: kind.idempotency_key(&buyer_id),
            buyer_id,
            kind,
            payload_json: payload_json.into(),
            state: ProvisioningTaskState::Queued,
            retry_count: 0,
            max_retries: self.config.default_max_retries,
            available_at: now,
            claimed_by: None,
            claimed_at: None,
            last_error: None,
            result: None,
            state_version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Queued | RetryableFailed | stale Running -> Running.
    pub fn claim_task(
        &self,
        mut task: ProvisioningTask,
        worker_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<TransitionResult, ProvisioningError> {
        match task.state {
            ProvisioningTaskState::Queued | ProvisioningTaskState::RetryableFailed => {}
            ProvisioningTaskState::Running => {
                if !self.is_stale(&task, now) {
                    return Err(ProvisioningError::ClaimConflict(
                        task.id.clone(),
                        task.claimed_by.clone().unwrap_or_default(),
                    ));
                }
            }
            ProvisioningTaskState::Completed | ProvisioningTaskState::FailedTerminal => {
                return Err(ProvisioningError::InvalidTransition {
                    from: task.state,
                    to: ProvisioningTaskState::Running,
                    reason: "task already in terminal state".to_string(),
                });
            }
        }

        if now < task.available_at {
            return Err(ProvisioningError::TaskNotYetAvailable(task.id.clone()));
        }

        let from_state = task.state;
        task.state = ProvisioningTaskState::Running;
        task.claimed_by = Some(worker_id.into());
        task.claimed_at = Some(now);
        task.state_version += 1;
        task.updated_at = now;

        Ok(Self::transitioned(task, from_state, "task_claimed", now))
    }

    pub fn complete_task(
        &self,
        mut task: ProvisioningTask,
        result: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<TransitionResult, ProvisioningError> {
        Self::validate_transition(&task, ProvisioningTaskState::Completed)?;

        let from_state = task.state;
        task.state = ProvisioningTaskState::Completed;
        task.result = Some(result.into());
        task.last_error = None;
        task.claimed_by = None;
        task.claimed_at = None;
        task.state_version += 1;
        task.updated_at = now;

        Ok(Self::transitioned(task, from_state, "task_completed", now))
    }

    /// Retries with exponential backoff until `max_retries`, then fails terminally.
    pub fn fail_task(
        &self,
        mut task: ProvisioningTask,
        error: impl Into<String>,
        policy: RetryPolicy,
        now: DateTime<Utc>,
    ) -> Result<TransitionResult, ProvisioningError> {
        Self::validate_transition(&task, ProvisioningTaskState::RetryableFailed)?;

        let from_state = task.state;
        let should_retry =
            matches!(policy, RetryPolicy::Retry) && task.retry_count < task.max_retries;

        task.last_error = Some(error.into());
        task.claimed_by = None;
        task.claimed_at = None;
        task.state_version += 1;
        task.updated_at = now;

        if should_retry {
            let backoff_seconds = self.config.retry_base_delay_seconds
                * i64::from(self.config.retry_backoff_multiplier.saturating_pow(task.retry_count));
            task.state = ProvisioningTaskState::RetryableFailed;
            task.retry_count += 1;
            task.available_at = now + Duration::seconds(backoff_seconds);
            Ok(Self::transitioned(task, from_state, "task_failed_retryable", now))
        } else {
            task.state = ProvisioningTaskState::FailedTerminal;
            Ok(Self::transitioned(task, from_state, "task_failed_terminal", now))
        }
    }

    pub fn is_stale(&self, task: &ProvisioningTask, now: DateTime<Utc>) -> bool {
        task.state == ProvisioningTaskState::Running
            && task.claimed_at.is_some_and(|claimed_at| {
                claimed_at + Duration::seconds(self.config.claim_timeout_seconds) <= now
            })
    }

    fn validate_transition(
        task: &ProvisioningTask,
        to_state: ProvisioningTaskState,
    ) -> Result<(), ProvisioningError> {
        let valid = match (task.state, to_state) {
            (ProvisioningTaskState::Running, ProvisioningTaskState::Completed)
            | (ProvisioningTaskState::Running, ProvisioningTaskState::RetryableFailed)
            | (ProvisioningTaskState::Running, ProvisioningTaskState::FailedTerminal) => true,
            (from, to) => from == to,
        };

        if valid {
            Ok(())
        } else {
            Err(ProvisioningError::InvalidTransition {
                from: task.state,
                to: to_state,
                reason: format!("cannot transition from {:?} to {:?}", task.state, to_state),
            })
        }
    }

    fn transitioned(
        task: ProvisioningTask,
        from_state: ProvisioningTaskState,
        reason: &'static str,
        now: DateTime<Utc>,
    ) -> TransitionResult {
        let transition = ProvisioningTransition {
            task_id: task.id.clone(),
            from_state,
            to_state: task.state,
            reason,
            state_version: task.state_version,
            occurred_at: now,
        };
        TransitionResult { task, transition }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, Utc};

    use super::{ProvisioningEngine, ProvisioningError, RetryPolicy};
    use crate::domain::buyer::BuyerId;
    use crate::domain::provisioning::{ProvisioningKind, ProvisioningTaskState};

    fn ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
    }

    fn queued(engine: &ProvisioningEngine) -> super::ProvisioningTask {
        engine.create_task(
            BuyerId("B-1".to_string()),
            ProvisioningKind::PhoneNumber,
            "{\"area_code\":\"415\"}",
            ts("2026-03-01T12:00:00Z"),
        )
    }

    #[test]
    fn claim_then_complete_reaches_terminal_state() {
        let engine = ProvisioningEngine::new();
        let now = ts("2026-03-01T12:00:01Z");

        let claimed = engine.claim_task(queued(&engine), "worker-1", now).expect("claim");
        assert_eq!(claimed.task.state, ProvisioningTaskState::Running);
        assert_eq!(claimed.transition.from_state, ProvisioningTaskState::Queued);
        assert_eq!(claimed.task.state_version, 2);

        let completed = engine.complete_task(claimed.task, "+14155550100", now).expect("complete");
        assert_eq!(completed.task.state, ProvisioningTaskState::Completed);
        assert_eq!(completed.task.result.as_deref(), Some("+14155550100"));
        assert!(completed.task.claimed_by.is_none());

        let reclaim = engine.claim_task(completed.task, "worker-2", now);
        assert!(matches!(reclaim, Err(ProvisioningError::InvalidTransition { .. })));
    }

    #[test]
    fn failures_back_off_then_become_terminal() {
        let engine = ProvisioningEngine::new();
        let mut task = queued(&engine);
        task.max_retries = 1;
        let now = ts("2026-03-01T12:00:01Z");

        let claimed = engine.claim_task(task, "worker-1", now).expect("claim");
        let failed = engine
            .fail_task(claimed.task, "twilio 503", RetryPolicy::Retry, now)
            .expect("retryable failure");
        assert_eq!(failed.task.state, ProvisioningTaskState::RetryableFailed);
        assert_eq!(failed.task.retry_count, 1);
        assert_eq!(failed.task.available_at, now + Duration::seconds(30));

        let too_early = engine.claim_task(failed.task.clone(), "worker-1", now);
        assert!(matches!(too_early, Err(ProvisioningError::TaskNotYetAvailable(_))));

        let later = now + Duration::seconds(31);
        let reclaimed = engine.claim_task(failed.task, "worker-1", later).expect("reclaim");
        let terminal = engine
            .fail_task(reclaimed.task, "twilio 503", RetryPolicy::Retry, later)
            .expect("terminal failure");
        assert_eq!(terminal.task.state, ProvisioningTaskState::FailedTerminal);
        assert_eq!(terminal.transition.reason, "task_failed_terminal");
    }

    #[test]
    fn running_claim_is_exclusive_until_stale() {
        let engine = ProvisioningEngine::new();
        let now = ts("2026-03-01T12:00:01Z");
        let claimed = engine.claim_task(queued(&engine), "worker-1", now).expect("claim");

        let conflict = engine.claim_task(claimed.task.clone(), "worker-2", now);
        assert!(matches!(conflict, Err(ProvisioningError::ClaimConflict(_, ref by)) if by == "worker-1"));

        let stale_at = now + Duration::seconds(301);
        assert!(engine.is_stale(&claimed.task, stale_at));
        let stolen = engine.claim_task(claimed.task, "worker-2", stale_at).expect("steal");
        assert_eq!(stolen.task.claimed_by.as_deref(), Some("worker-2"));
    }

    #[test]
    fn complete_requires_running_task() {
        let engine = ProvisioningEngine::new();
        let result = engine.complete_task(queued(&engine), "done", ts("2026-03-01T12:00:01Z"));
        assert!(matches!(result, Err(ProvisioningError::InvalidTransition { .. })));
    }
}
