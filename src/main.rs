use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use trading_analyst::broker::build_broker;
use trading_analyst::config::{ProviderKind, Settings};
use trading_analyst::data::cache::{MarketDataCache, TtlConfig};
use trading_analyst::data::mock::MockProvider;
use trading_analyst::data::store::PriceStore;
use trading_analyst::data::yahoo::YahooProvider;
use trading_analyst::data::MarketDataProvider;
use trading_analyst::engine::SimulationEngine;
use trading_analyst::jobs::arena::ArenaProcessor;
use trading_analyst::jobs::live20::Live20Processor;
use trading_analyst::jobs::{JobQueue, JobTable, Worker, WorkerConfig};
use trading_analyst::server::{build_router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let _ = dotenvy::dotenv();
    let settings = Settings::from_env().context("invalid configuration")?;
    let settings = Arc::new(settings);

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&settings.database_url)
        .await
        .context("database connection failed")?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("database migration failed")?;

    let provider: Arc<dyn MarketDataProvider> = match settings.market_data_provider {
        ProviderKind::Yahoo => Arc::new(YahooProvider::from_settings(&settings)?),
        ProviderKind::Mock => Arc::new(MockProvider),
        // Rejected by Settings::validate; unreachable in a running process.
        ProviderKind::Ib => anyhow::bail!("IB market data provider is not supported"),
    };

    let broker = build_broker(&settings)?;
    if let Err(e) = broker.connect().await {
        // Startup proceeds; the account endpoints report the disconnect and
        // connects are retried lazily by the operator.
        tracing::error!(error = %e, "broker connect failed on startup");
    }

    let store = PriceStore::new(pool.clone());
    let cache = Arc::new(MarketDataCache::new(
        store,
        provider,
        TtlConfig::from(settings.as_ref()),
    ));

    let arena_queue = JobQueue::new(
        pool.clone(),
        JobTable::ArenaSimulations,
        "arena",
        settings.stale_threshold,
    );
    let live20_queue = JobQueue::new(
        pool.clone(),
        JobTable::Live20Runs,
        "live20",
        settings.stale_threshold,
    );

    // Single-instance deployment: any running row at startup is orphaned.
    let stranded = arena_queue.reset_stranded_jobs().await?
        + live20_queue.reset_stranded_jobs().await?;
    if stranded > 0 {
        tracing::info!(stranded, "reset stranded jobs from previous process");
    }

    let engine = Arc::new(SimulationEngine::new(
        pool.clone(),
        cache.clone(),
        settings.max_concurrent_fetches,
    ));

    let worker_config = WorkerConfig::from(settings.as_ref());
    let shutdown = CancellationToken::new();

    let arena_worker = Worker::new(
        Arc::new(arena_queue.clone()),
        Arc::new(ArenaProcessor::new(
            pool.clone(),
            arena_queue,
            engine.clone(),
        )),
        worker_config,
    );
    let live20_worker = Worker::new(
        Arc::new(live20_queue.clone()),
        Arc::new(Live20Processor::new(
            pool.clone(),
            live20_queue,
            cache.clone(),
        )),
        worker_config,
    );

    let arena_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { arena_worker.run(shutdown).await }
    });
    let live20_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { live20_worker.run(shutdown).await }
    });

    let state = AppState {
        pool,
        cache,
        broker,
        settings: settings.clone(),
    };
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.bind_addr))?;
    tracing::info!(addr = %settings.bind_addr, "serving API");

    axum::serve(listener, app)
        .with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("shutdown signal received");
                shutdown.cancel();
            }
        })
        .await?;

    shutdown.cancel();
    let _ = arena_handle.await;
    let _ = live20_handle.await;
    tracing::info!("workers drained, exiting");

    Ok(())
}
