use somi_engine::clock::SystemClock;
use somi_engine::config::AppConfig;
use somi_engine::db::memory::{MemoryKeyValueStore, MemoryStore};
use somi_engine::db::{seed, CatalogSource, ChainStore, KeyValueStore, PgStore};
use somi_engine::events::EventBus;
use somi_engine::state::{AppState, SharedState};
use somi_engine::web;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    let events = EventBus::default();

    let (source, chains, kv): (
        Arc<dyn CatalogSource>,
        Arc<dyn ChainStore>,
        Arc<dyn KeyValueStore>,
    ) = match &config.database_url {
        Some(database_url) => {
            tracing::info!("Connecting to database...");
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .acquire_timeout(config.network_timeout)
                .connect(database_url)
                .await
                .map_err(|e| {
                    tracing::error!("Failed to connect to database: {}", e);
                    e
                })?;
            tracing::info!("Database connection established");

            tracing::info!("Running database migrations...");
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .map_err(|e| {
                    tracing::error!("Failed to run database migrations: {}", e);
                    e
                })?;
            tracing::info!("Database migrations completed");

            if config.seed_catalog {
                seed::seed_catalog(&pool).await?;
            }

            let store = Arc::new(PgStore::new(pool));
            let source: Arc<dyn CatalogSource> = store.clone();
            let chains: Arc<dyn ChainStore> = store.clone();
            let kv: Arc<dyn KeyValueStore> = store;
            (source, chains, kv)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory stores with the demo catalog");
            let store = Arc::new(MemoryStore::with_blocks(seed::demo_blocks()));
            let source: Arc<dyn CatalogSource> = store.clone();
            let chains: Arc<dyn ChainStore> = store;
            let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValueStore::new());
            (source, chains, kv)
        }
    };

    let shared: SharedState = Arc::new(AppState::new(
        &config,
        source,
        chains,
        kv,
        Arc::new(SystemClock),
        events,
    ));

    // Prime the catalog so the first request does not pay for the fetch
    let warmed = shared.catalog.get_catalog().await;
    tracing::info!("Catalog primed with {} blocks", warmed.len());

    let scheduler = JobScheduler::new().await?;

    // Catalog warm-up every 5 minutes, in step with the cache TTL
    let shared_for_catalog = shared.clone();
    scheduler
        .add(Job::new_async("0 */5 * * * *", move |_uuid, _l| {
            let state = shared_for_catalog.clone();
            Box::pin(async move {
                let blocks = state.catalog.get_catalog().await;
                tracing::debug!("Catalog warm-up: {} blocks", blocks.len());
            })
        })?)
        .await?;

    // Tracker cleanup - drop devices without an active chain every hour
    let shared_for_cleanup = shared.clone();
    scheduler
        .add(Job::new_async("0 0 * * * *", move |_uuid, _l| {
            let state = shared_for_cleanup.clone();
            Box::pin(async move {
                let dropped = state.drop_idle_trackers().await;
                if dropped > 0 {
                    tracing::info!("Dropped {} idle device trackers", dropped);
                }
            })
        })?)
        .await?;

    scheduler.start().await?;
    tracing::info!("Scheduler started:");
    tracing::info!("  - Catalog warm-up: every 5 min");
    tracing::info!("  - Idle tracker cleanup: hourly");

    let app = web::routes(shared.clone())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    tracing::info!("Listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
