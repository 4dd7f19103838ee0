use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use haggle_db::DbPool;
use serde::Serialize;

use crate::bootstrap::AppState;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

/// Which outbound integrations have credentials; informational only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IntegrationStatus {
    pub llm_provider: &'static str,
    pub sms_configured: bool,
    pub email_configured: bool,
    pub provisioning_enabled: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub database: HealthCheck,
    pub integrations: IntegrationStatus,
    pub checked_at: String,
}

pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let ready = database.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "haggle-server runtime initialized".to_string(),
        },
        database,
        integrations: IntegrationStatus {
            llm_provider: state.agent.provider(),
            sms_configured: state.config.sms.has_credentials(),
            email_configured: state.config.email.access_token.is_some(),
            provisioning_enabled: state.config.provisioning.enabled,
        },
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM buyer").fetch_one(pool).await {
        Ok(buyers) => HealthCheck {
            status: "ready",
            detail: format!("database reachable ({buyers} buyers)"),
        },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use crate::test_support::{harness, insert_buyer, send, Generation};

    #[tokio::test]
    async fn health_returns_ready_when_database_is_reachable() {
        let harness = harness(Generation::Reply("ok")).await;
        insert_buyer(&harness.pool, "B-1", None).await;

        for path in ["/health", "/api/v1/health"] {
            let (status, payload) = send(&harness.router, "GET", path, None, None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(payload["status"], "ready");
            assert_eq!(payload["database"]["detail"], "database reachable (1 buyers)");
            assert_eq!(payload["integrations"]["llm_provider"], "scripted");
            assert_eq!(payload["integrations"]["sms_configured"], false);
        }
    }

    #[tokio::test]
    async fn health_returns_service_unavailable_when_database_is_unavailable() {
        let harness = harness(Generation::Reply("ok")).await;
        harness.pool.close().await;

        let (status, payload) = send(&harness.router, "GET", "/health", None, None).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload["status"], "degraded");
        assert_eq!(payload["database"]["status"], "degraded");
        assert_eq!(payload["service"]["status"], "ready");
    }
}
