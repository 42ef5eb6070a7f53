use serde::Serialize;
use utoipa::ToSchema;

/// Storage status reported by `/healthcheck`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Ok,
    /// No reachable store; webhooks answer 503 until it returns.
    Degraded,
}

/// Body of the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: HealthStatus,
    /// Games currently in play, when the store could be asked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_games: Option<usize>,
}

impl HealthResponse {
    pub fn ok(active_games: usize) -> Self {
        Self {
            status: HealthStatus::Ok,
            active_games: Some(active_games),
        }
    }

    pub fn degraded() -> Self {
        Self {
            status: HealthStatus::Degraded,
            active_games: None,
        }
    }
}
