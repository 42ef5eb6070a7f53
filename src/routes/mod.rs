use axum::Router;

use crate::state::SharedState;

pub mod docs;
pub mod games;
pub mod health;

/// Every route of the service bound to the shared state.
pub fn router(state: SharedState) -> Router<()> {
    Router::new()
        .merge(health::router())
        .merge(games::router())
        .merge(docs::router())
        .with_state(state)
}
