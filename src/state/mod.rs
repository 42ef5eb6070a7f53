pub mod session;
pub mod state_machine;

use std::{sync::Arc, time::Duration};

use time::OffsetDateTime;
use tokio::{
    sync::{RwLock, watch},
    time::Instant,
};

use crate::{
    config::AppConfig, dao::game_store::GameStore, delivery::DeliveryQueue,
    error::ServiceError, narrative::NarrativeService,
};

use self::session::SessionRegistry;

pub type SharedState = Arc<AppState>;

/// Source of the current time for every game decision.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

/// Wall clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Clock pinned to `origin` that advances with tokio's timer, so tests
/// running on paused time see deadlines pass.
pub struct TokioClock {
    origin: OffsetDateTime,
    started: Instant,
}

impl TokioClock {
    pub fn starting_at(origin: OffsetDateTime) -> Self {
        Self {
            origin,
            started: Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> OffsetDateTime {
        let elapsed: Duration = Instant::now() - self.started;
        self.origin + elapsed
    }
}

/// Central application state: configuration, storage handle, outbound
/// delivery and the per-game runtime sessions.
pub struct AppState {
    config: AppConfig,
    game_store: RwLock<Option<Arc<dyn GameStore>>>,
    degraded: watch::Sender<bool>,
    delivery: DeliveryQueue,
    narrative: NarrativeService,
    sessions: Arc<SessionRegistry>,
    clock: Arc<dyn Clock>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig, delivery: DeliveryQueue, narrative: NarrativeService) -> SharedState {
        Self::with_clock(config, delivery, narrative, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: AppConfig,
        delivery: DeliveryQueue,
        narrative: NarrativeService,
        clock: Arc<dyn Clock>,
    ) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            config,
            game_store: RwLock::new(None),
            degraded: degraded_tx,
            delivery,
            narrative,
            sessions: Arc::new(SessionRegistry::new()),
            clock,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn delivery(&self) -> &DeliveryQueue {
        &self.delivery
    }

    pub fn narrative(&self) -> &NarrativeService {
        &self.narrative
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn now(&self) -> OffsetDateTime {
        self.clock.now()
    }

    /// Obtain a handle to the current game store, if one is installed.
    pub async fn game_store(&self) -> Option<Arc<dyn GameStore>> {
        let guard = self.game_store.read().await;
        guard.as_ref().cloned()
    }

    /// Store handle for a request, failing in degraded mode.
    pub async fn require_game_store(&self) -> Result<Arc<dyn GameStore>, ServiceError> {
        if *self.degraded.borrow() {
            return Err(ServiceError::Degraded);
        }
        self.game_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new game store implementation and leave degraded mode.
    pub async fn set_game_store(&self, store: Arc<dyn GameStore>) {
        {
            let mut guard = self.game_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false).await;
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub async fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }
}
