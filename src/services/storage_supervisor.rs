//! Keeps a game store installed and tracks degraded mode with its health.
//!
//! Timers that fire while storage is down fail their work. Whenever the store
//! comes back after an outage the recovery pass runs again so those missed
//! deadlines are applied.

use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{game_store::GameStore, storage::StorageError},
    services::recovery,
    state::SharedState,
};

const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Doubling delay capped at `max`.
struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    fn new() -> Self {
        let initial = Duration::from_secs(1);
        Self {
            initial,
            max: Duration::from_secs(10),
            current: initial,
        }
    }

    async fn wait(&mut self) {
        sleep(self.current).await;
        self.current = (self.current * 2).min(self.max);
    }

    fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Connect, install and watch the store forever.
///
/// The first successful connection only installs the store; startup recovery
/// belongs to the game loop. Every later one also replays recovery.
pub async fn run<F, Fut>(state: SharedState, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn GameStore>, StorageError>> + Send,
{
    let mut backoff = Backoff::new();
    let mut after_outage = false;

    loop {
        let store = connect_with_backoff(&mut connect, &mut backoff).await;
        state.set_game_store(store.clone()).await;
        info!("storage connection established");
        if after_outage {
            resume_games(&state).await;
        }

        watch_health(&state, store.as_ref()).await;
        warn!("exhausted storage reconnect attempts; staying in degraded mode");
        after_outage = true;
        backoff.wait().await;
    }
}

async fn connect_with_backoff<F, Fut>(connect: &mut F, backoff: &mut Backoff) -> Arc<dyn GameStore>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Arc<dyn GameStore>, StorageError>>,
{
    loop {
        match connect().await {
            Ok(store) => {
                backoff.reset();
                return store;
            }
            Err(err) => {
                warn!(error = %err, "storage connection attempt failed");
                backoff.wait().await;
            }
        }
    }
}

/// Poll the store until it stays unreachable through every reconnect attempt.
async fn watch_health(state: &SharedState, store: &dyn GameStore) {
    loop {
        sleep(HEALTH_POLL_INTERVAL).await;
        match store.health_check().await {
            Ok(()) => {
                if state.is_degraded().await {
                    info!("storage healthy again; leaving degraded mode");
                    state.update_degraded(false).await;
                    resume_games(state).await;
                }
            }
            Err(err) => {
                warn!(error = %err, "storage health check failed");
                if !reconnect(state, store).await {
                    return;
                }
                info!("storage reconnected after health check failure");
                state.update_degraded(false).await;
                resume_games(state).await;
            }
        }
    }
}

/// Returns whether the store came back within the allowed attempts.
async fn reconnect(state: &SharedState, store: &dyn GameStore) -> bool {
    let mut backoff = Backoff::new();
    for attempt in 0..MAX_RECONNECT_ATTEMPTS {
        match store.try_reconnect().await {
            Ok(()) => return true,
            Err(err) => {
                warn!(attempt, error = %err, "storage reconnect attempt failed");
                if attempt == 0 {
                    warn!("entering degraded mode");
                    state.update_degraded(true).await;
                }
                backoff.wait().await;
            }
        }
    }
    false
}

/// Apply whatever deadlines and triggers were missed while storage was away.
async fn resume_games(state: &SharedState) {
    let report = recovery::recover_on_startup(state).await;
    info!(
        games = report.games.len(),
        failed = report.games.iter().filter(|game| game.failed).count(),
        "resumed games after storage outage"
    );
}
