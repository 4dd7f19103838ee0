use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use haggle_core::domain::buyer::BuyerId;
use haggle_core::domain::provisioning::{
    IdempotencyKey, ProvisioningKind, ProvisioningTask, ProvisioningTaskId,
    ProvisioningTaskState, ProvisioningTransition,
};

use super::{
    format_optional_timestamp, format_timestamp, parse_enum, parse_optional_timestamp,
    parse_timestamp, parse_u32, ProvisioningRepository, RepositoryError, StoredTransition,
};
use crate::DbPool;

const TASK_COLUMNS: &str = "id, buyer_id, kind, payload_json, idempotency_key, state, retry_count,
    max_retries, available_at, claimed_by, claimed_at, last_error, result, state_version,
    created_at, updated_at";

pub struct SqlProvisioningRepository {
    pool: DbPool,
}

impl SqlProvisioningRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ProvisioningRepository for SqlProvisioningRepository {
    async fn enqueue(&self, task: ProvisioningTask) -> Result<ProvisioningTask, RepositoryError> {
        sqlx::query(
            "INSERT INTO provisioning_task (
                id, buyer_id, kind, payload_json, idempotency_key, state, retry_count,
                max_retries, available_at, claimed_by, claimed_at, last_error, result,
                state_version, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(idempotency_key) DO UPDATE SET
                state = 'queued',
                payload_json = excluded.payload_json,
                retry_count = 0,
                max_retries = excluded.max_retries,
                available_at = excluded.available_at,
                claimed_by = NULL,
                claimed_at = NULL,
                last_error = NULL,
                result = NULL,
                state_version = provisioning_task.state_version + 1,
                updated_at = excluded.updated_at
             WHERE provisioning_task.state = 'failed_terminal'",
        )
        .bind(&task.id.0)
        .bind(&task.buyer_id.0)
        .bind(task.kind.as_str())
        .bind(&task.payload_json)
        .bind(&task.idempotency_key.0)
        .bind(task.state.as_str())
        .bind(i64::from(task.retry_count))
        .bind(i64::from(task.max_retries))
        .bind(format_timestamp(task.available_at))
        .bind(task.claimed_by.as_deref())
        .bind(format_optional_timestamp(task.claimed_at))
        .bind(task.last_error.as_deref())
        .bind(task.result.as_deref())
        .bind(i64::from(task.state_version))
        .bind(format_timestamp(task.created_at))
        .bind(format_timestamp(task.updated_at))
        .execute(&self.pool)
        .await?;

        self.find_by_key(&task.idempotency_key).await?.ok_or_else(|| {
            RepositoryError::Decode(format!(
                "task `{}` missing after enqueue",
                task.idempotency_key.0
            ))
        })
    }

    async fn find_by_id(
        &self,
        id: &ProvisioningTaskId,
    ) -> Result<Option<ProvisioningTask>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM provisioning_task WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(task_from_row).transpose()
    }

    async fn find_by_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<ProvisioningTask>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM provisioning_task WHERE idempotency_key = ?"
        ))
        .bind(&key.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(task_from_row).transpose()
    }

    async fn list_claimable(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<ProvisioningTask>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM provisioning_task
             WHERE (state IN ('queued', 'retryable_failed') AND available_at <= ?)
                OR (state = 'running' AND claimed_at <= ?)
             ORDER BY available_at ASC, created_at ASC
             LIMIT ?"
        ))
        .bind(format_timestamp(now))
        .bind(format_timestamp(stale_before))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(task_from_row).collect()
    }

    async fn list_for_buyer(
        &self,
        buyer_id: &BuyerId,
    ) -> Result<Vec<ProvisioningTask>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM provisioning_task
             WHERE buyer_id = ?
             ORDER BY created_at ASC"
        ))
        .bind(&buyer_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(task_from_row).collect()
    }

    async fn apply_transition(
        &self,
        task: &ProvisioningTask,
        transition: &ProvisioningTransition,
    ) -> Result<bool, RepositoryError> {
        let expected_version = i64::from(transition.state_version) - 1;
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        let updated = sqlx::query(
            "UPDATE provisioning_task SET
                state = ?,
                retry_count = ?,
                available_at = ?,
                claimed_by = ?,
                claimed_at = ?,
                last_error = ?,
                result = ?,
                state_version = ?,
                updated_at = ?
             WHERE id = ? AND state_version = ?",
        )
        .bind(task.state.as_str())
        .bind(i64::from(task.retry_count))
        .bind(format_timestamp(task.available_at))
        .bind(task.claimed_by.as_deref())
        .bind(format_optional_timestamp(task.claimed_at))
        .bind(task.last_error.as_deref())
        .bind(task.result.as_deref())
        .bind(i64::from(task.state_version))
        .bind(format_timestamp(task.updated_at))
        .bind(&task.id.0)
        .bind(expected_version)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO provisioning_transition (
                task_id, from_state, to_state, reason, state_version, occurred_at
             ) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&transition.task_id.0)
        .bind(transition.from_state.as_str())
        .bind(transition.to_state.as_str())
        .bind(transition.reason)
        .bind(i64::from(transition.state_version))
        .bind(format_timestamp(transition.occurred_at))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn list_transitions(
        &self,
        task_id: &ProvisioningTaskId,
    ) -> Result<Vec<StoredTransition>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT task_id, from_state, to_state, reason, state_version, occurred_at
             FROM provisioning_transition
             WHERE task_id = ?
             ORDER BY state_version ASC, id ASC",
        )
        .bind(&task_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(StoredTransition {
                    task_id: ProvisioningTaskId(row.try_get("task_id")?),
                    from_state: row.try_get("from_state")?,
                    to_state: row.try_get("to_state")?,
                    reason: row.try_get("reason")?,
                    state_version: parse_u32("state_version", row.try_get("state_version")?)?,
                    occurred_at: parse_timestamp("occurred_at", row.try_get("occurred_at")?)?,
                })
            })
            .collect()
    }
}

fn task_from_row(row: SqliteRow) -> Result<ProvisioningTask, RepositoryError> {
    let kind: String = row.try_get("kind")?;
    let state: String = row.try_get("state")?;

    Ok(ProvisioningTask {
        id: ProvisioningTaskId(row.try_get("id")?),
        buyer_id: BuyerId(row.try_get("buyer_id")?),
        kind: parse_enum("kind", &kind, ProvisioningKind::parse)?,
        payload_json: row.try_get("payload_json")?,
        idempotency_key: IdempotencyKey(row.try_get("idempotency_key")?),
        state: parse_enum("state", &state, ProvisioningTaskState::parse)?,
        retry_count: parse_u32("retry_count", row.try_get("retry_count")?)?,
        max_retries: parse_u32("max_retries", row.try_get("max_retries")?)?,
        available_at: parse_timestamp("available_at", row.try_get("available_at")?)?,
        claimed_by: row.try_get("claimed_by")?,
        claimed_at: parse_optional_timestamp("claimed_at", row.try_get("claimed_at")?)?,
        last_error: row.try_get("last_error")?,
        result: row.try_get("result")?,
        state_version: parse_u32("state_version", row.try_get("state_version")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
