//! REST façade over the core: enqueue jobs, read results, serve market
//! data. Handlers are thin; all domain behaviour lives in the components
//! they call.

mod account;
mod arena;
mod health;
mod live20;
mod stocks;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use sqlx::PgPool;
use tower_http::cors::CorsLayer;

use crate::broker::Broker;
use crate::config::Settings;
use crate::data::cache::MarketDataCache;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub cache: Arc<MarketDataCache>,
    pub broker: Arc<dyn Broker>,
    pub settings: Arc<Settings>,
}

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/health", get(health::health))
        .route("/health/ready", get(health::ready))
        .route("/health/live", get(health::live))
        .route("/account/status", get(account::status))
        .route("/stocks/{symbol}/prices", get(stocks::prices))
        .route("/stocks/{symbol}/indicators", get(stocks::indicators))
        .route("/stocks/{symbol}/analysis", get(stocks::analysis))
        .route("/stocks/{symbol}/info", get(stocks::info))
        .route("/stocks/{symbol}/sector-trend", get(stocks::sector_trend))
        .route("/live-20/analyze", post(live20::analyze))
        .route("/live-20/results", get(live20::results))
        .route(
            "/live-20/runs/{id}",
            get(live20::run_detail).delete(live20::delete_run),
        )
        .route("/live-20/runs/{id}/cancel", post(live20::cancel_run))
        .route("/live-20/runs/{id}/recommend", post(live20::recommend))
        .route(
            "/arena/simulations",
            post(arena::create_simulation).get(arena::list_simulations),
        )
        .route(
            "/arena/simulations/{id}",
            get(arena::get_simulation).delete(arena::delete_simulation),
        )
        .route("/arena/simulations/{id}/cancel", post(arena::cancel_simulation))
        .route("/arena/agents", get(arena::list_agents))
        .route("/arena/portfolio-strategies", get(arena::list_strategies));

    Router::new()
        .nest("/api/v1", api)
        .layer(CorsLayer::permissive())
        .with_state(state)
}
