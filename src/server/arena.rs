//! Arena simulation endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::NaiveDate;
use garde::Validate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::AppState;
use crate::agents::selector::{get_selector, SELECTOR_CATALOG};
use crate::agents::{build_agent, AGENT_CATALOG};
use crate::engine::repo::{self, NewSimulation};
use crate::engine::types::{AgentConfig, ArenaSimulation};
use crate::error::{Error, Result};

/// Longest permitted backtest window, in civil days.
const MAX_RANGE_DAYS: i64 = 3 * 365;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateSimulationRequest {
    #[garde(inner(length(min = 1, max = 255)))]
    pub name: Option<String>,
    #[garde(length(min = 1))]
    pub symbols: Vec<String>,
    #[garde(skip)]
    pub start_date: NaiveDate,
    #[garde(skip)]
    pub end_date: NaiveDate,
    #[garde(skip)]
    #[serde(default = "default_initial_capital")]
    pub initial_capital: Decimal,
    #[garde(skip)]
    #[serde(default = "default_position_size")]
    pub position_size: Decimal,
    #[garde(length(min = 1, max = 50))]
    pub agent_type: String,
    #[garde(skip)]
    #[serde(default)]
    pub agent_config: Value,
}

fn default_initial_capital() -> Decimal {
    Decimal::new(10_000, 0)
}

fn default_position_size() -> Decimal {
    Decimal::new(1_000, 0)
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    20
}

#[derive(Debug, Serialize)]
pub struct SimulationList {
    pub items: Vec<ArenaSimulation>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

pub async fn create_simulation(
    State(state): State<AppState>,
    Json(request): Json<CreateSimulationRequest>,
) -> Result<(StatusCode, Json<ArenaSimulation>)> {
    request.validate()?;

    if request.symbols.len() > state.settings.arena_max_symbols {
        return Err(Error::validation(format!(
            "too many symbols ({} > {})",
            request.symbols.len(),
            state.settings.arena_max_symbols
        )));
    }
    if request.end_date < request.start_date {
        return Err(Error::validation("end_date must not precede start_date"));
    }
    if (request.end_date - request.start_date).num_days() > MAX_RANGE_DAYS {
        return Err(Error::validation("date range exceeds 3 years"));
    }
    if request.initial_capital <= Decimal::ZERO || request.position_size <= Decimal::ZERO {
        return Err(Error::validation(
            "initial_capital and position_size must be positive",
        ));
    }

    let symbols = request
        .symbols
        .iter()
        .map(|s| crate::data::canonicalize_symbol(s))
        .collect::<Result<Vec<_>>>()?;

    // Reject unknown agents and strategies before the job is enqueued.
    let agent_config = if request.agent_config.is_null() {
        json!({})
    } else {
        request.agent_config
    };
    let parsed = AgentConfig::from_value(&agent_config)?;
    build_agent(&request.agent_type, &parsed)?;
    if let Some(strategy) = parsed.portfolio_strategy.as_deref() {
        get_selector(strategy)
            .ok_or_else(|| Error::validation(format!("unknown portfolio strategy '{strategy}'")))?;
    }

    let simulation = repo::create_simulation(
        &state.pool,
        &NewSimulation {
            name: request.name,
            symbols,
            start_date: request.start_date,
            end_date: request.end_date,
            initial_capital: request.initial_capital,
            position_size: request.position_size,
            agent_type: request.agent_type,
            agent_config,
            max_retries: 3,
        },
    )
    .await?;

    tracing::info!(simulation_id = simulation.id, "arena simulation enqueued");
    Ok((StatusCode::ACCEPTED, Json(simulation)))
}

pub async fn list_simulations(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<SimulationList>> {
    let limit = params.limit.clamp(1, 100);
    let offset = params.offset.max(0);
    let (items, total) = repo::list_simulations(&state.pool, limit, offset).await?;
    Ok(Json(SimulationList {
        items,
        total,
        limit,
        offset,
    }))
}

pub async fn get_simulation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>> {
    let simulation = repo::get_simulation(&state.pool, id)
        .await?
        .ok_or_else(|| Error::not_found("Simulation not found"))?;
    let positions = repo::positions_for(&state.pool, id).await?;
    let snapshots = repo::snapshots_for(&state.pool, id).await?;

    Ok(Json(json!({
        "simulation": simulation,
        "win_rate": simulation.win_rate(),
        "positions": positions,
        "snapshots": snapshots,
    })))
}

pub async fn cancel_simulation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode> {
    let simulation = repo::get_simulation(&state.pool, id)
        .await?
        .ok_or_else(|| Error::not_found("Simulation not found"))?;

    if simulation.status.is_terminal() {
        return Err(Error::validation(format!(
            "cannot cancel {} simulation",
            simulation.status.as_str()
        )));
    }

    repo::cancel_simulation(&state.pool, id).await?;
    tracing::info!(simulation_id = id, "simulation cancelled");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_simulation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode> {
    let simulation = repo::get_simulation(&state.pool, id)
        .await?
        .ok_or_else(|| Error::not_found("Simulation not found"))?;

    if !simulation.status.is_terminal() {
        return Err(Error::validation(format!(
            "cannot delete {} simulation; cancel it first",
            simulation.status.as_str()
        )));
    }

    repo::delete_simulation(&state.pool, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_agents() -> Json<Value> {
    let agents: Vec<Value> = AGENT_CATALOG
        .iter()
        .map(|info| json!({ "name": info.name, "description": info.description }))
        .collect();
    Json(json!({ "agents": agents }))
}

pub async fn list_strategies() -> Json<Value> {
    let strategies: Vec<Value> = SELECTOR_CATALOG
        .iter()
        .map(|info| json!({ "name": info.name, "description": info.description }))
        .collect();
    Json(json!({ "strategies": strategies }))
}
