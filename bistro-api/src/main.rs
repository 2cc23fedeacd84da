use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bistro_api::{app, state::{AppState, AuthConfig}};
use bistro_booking::NoShowSweeper;
use bistro_core::{ReservationStore, TableRegistry};
use bistro_notify::{BrokerConfig, NotificationBroker};
use bistro_shared::Table;
use bistro_store::{app_config::Config, DbClient, MemoryStore, PgStore};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "bistro_api=debug,bistro_booking=debug,bistro_notify=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Bistro API on port {}", config.server.port);

    let (reservations, tables): (Arc<dyn ReservationStore>, Arc<dyn TableRegistry>) =
        match config.database.postgres_url() {
            Some(url) => {
                let db = DbClient::new(url, config.database.max_connections)
                    .await
                    .context("Failed to connect to Postgres")?;
                db.migrate().await.context("Failed to run migrations")?;
                let store = Arc::new(PgStore::from_client(&db));
                (store.clone(), store)
            }
            None => {
                tracing::warn!("No database configured, reservations live in memory only");
                let store = Arc::new(MemoryStore::new());
                (store.clone(), store)
            }
        };

    for seed in &config.tables {
        let table = tables
            .provision(Table::new(seed.number, seed.capacity, seed.location.clone()))
            .await
            .with_context(|| format!("Failed to provision table {}", seed.number))?;
        tracing::debug!("Table {} ready ({} seats, {})", table.number, table.capacity, table.location);
    }

    // Live notification broker
    let broker = Arc::new(NotificationBroker::new(BrokerConfig::new(
        Duration::from_secs(config.broker.probe_interval_seconds),
        config.broker.subscriber_buffer,
    )));
    let heartbeat = broker.spawn_heartbeat();

    let auth = AuthConfig {
        secret: config.auth.jwt_secret.clone(),
    };
    if !auth.is_enabled() {
        tracing::warn!("auth.jwt_secret is empty, staff routes are open");
    }

    let app_state = AppState::new(reservations, tables, broker.clone(), &config.booking, auth);

    let shutdown = CancellationToken::new();
    let sweeper = match config.booking.sweep_interval_seconds {
        0 => None,
        secs => Some(
            NoShowSweeper::new(
                app_state.bookings.clone(),
                broker.clone(),
                config.booking.no_show_grace_minutes,
            )
            .spawn(Duration::from_secs(secs), shutdown.clone()),
        ),
    };

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    let signal_broker = broker.clone();
    let signal_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutting down");
            signal_token.cancel();
            // closes live sockets so the server can drain
            signal_broker.shutdown().await;
        })
        .await
        .context("Server error")?;

    let _ = heartbeat.await;
    if let Some(sweeper) = sweeper {
        let _ = sweeper.await;
    }

    Ok(())
}
