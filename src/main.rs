//! golare-back binary entrypoint wiring storage, delivery, the scheduler and the REST layer.

use std::{env, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::Router;
use tokio::{net::TcpListener, time::sleep};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use golare_back::{
    config::AppConfig,
    dao::game_store::memory::MemoryGameStore,
    delivery::{DeliveryQueue, telegram::TelegramTransport},
    narrative::{NarrativeService, http::HttpNarrator},
    routes,
    services::{recovery, scheduler},
    state::{AppState, SharedState},
};

const VERIFY_INITIAL_DELAY: Duration = Duration::from_secs(1);
const VERIFY_MAX_DELAY: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let transport = TelegramTransport::from_env().context("configuring the Telegram transport")?;
    let delivery = DeliveryQueue::new(Arc::new(transport), config.delivery.min_interval);
    let narrative = match HttpNarrator::from_config(&config.narrative) {
        Some(narrator) => NarrativeService::new(
            Arc::new(narrator),
            config.narrative.timeout,
            config.narrative.max_chars,
        ),
        None => {
            info!("no narrative endpoint configured; using templates");
            NarrativeService::disabled()
        }
    };

    let app_state = AppState::new(config, delivery, narrative);
    install_storage(&app_state).await;
    tokio::spawn(run_game_loop(app_state.clone()));

    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Supervise MongoDB when `MONGO_URI` is set, otherwise keep games in memory.
async fn install_storage(state: &SharedState) {
    #[cfg(feature = "mongo-store")]
    if env::var_os("MONGO_URI").is_some() {
        use golare_back::dao::{
            game_store::{
                GameStore,
                mongodb::{MongoConfig, MongoGameStore},
            },
            storage::StorageError,
        };
        use golare_back::services::storage_supervisor;

        tokio::spawn(storage_supervisor::run(state.clone(), || async {
            let config = MongoConfig::from_env().await?;
            let store = MongoGameStore::connect(config).await?;
            Ok::<Arc<dyn GameStore>, StorageError>(Arc::new(store))
        }));
        return;
    }

    warn!("MONGO_URI not set; games are kept in memory and lost on restart");
    state
        .set_game_store(Arc::new(MemoryGameStore::new()))
        .await;
}

/// Wait for the transport and the store, recover missed work, then follow the timetable.
async fn run_game_loop(state: SharedState) {
    let mut delay = VERIFY_INITIAL_DELAY;
    while let Err(err) = state.delivery().verify().await {
        warn!(error = %err, "chat transport unreachable; retrying");
        sleep(delay).await;
        delay = (delay * 2).min(VERIFY_MAX_DELAY);
    }
    info!("chat transport verified");

    let mut degraded = state.degraded_watcher();
    let storage_ready = degraded.wait_for(|value| !*value).await.is_ok();
    if !storage_ready {
        warn!("storage watcher closed before storage became available");
        return;
    }

    recovery::recover_on_startup(&state).await;
    scheduler::run(state).await;
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
