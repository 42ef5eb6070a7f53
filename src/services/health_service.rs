use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Ping the store and count the games in play.
///
/// A failed ping or listing reports degraded without touching the shared
/// flag; the storage supervisor owns that.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let store = match state.require_game_store().await {
        Ok(store) => store,
        Err(_) => {
            warn!("healthcheck while storage is unavailable");
            return HealthResponse::degraded();
        }
    };
    if let Err(err) = store.health_check().await {
        warn!(error = %err, "storage health check failed");
        return HealthResponse::degraded();
    }
    match store.list_active_games().await {
        Ok(games) => HealthResponse::ok(games.len()),
        Err(err) => {
            warn!(error = %err, "failed to count active games");
            HealthResponse::degraded()
        }
    }
}
