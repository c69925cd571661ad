//! Live 20 endpoints: enqueue analysis runs, read results, portfolio
//! recommendations.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;
use rust_decimal::prelude::ToPrimitive;
use serde::Deserialize;
use serde_json::{json, Value};

use super::AppState;
use crate::agents::selector::{get_selector, QualifyingSignal};
use crate::agents::live20::MomentumAlgo;
use crate::data::canonicalize_symbol;
use crate::error::{Error, Result};
use crate::jobs::live20 as runs;

const MAX_SYMBOLS: usize = 500;
const MAX_SOURCE_LISTS: usize = 10;

#[derive(Debug, Deserialize, Validate)]
pub struct AnalyzeRequest {
    #[garde(length(min = 1, max = 500))]
    pub symbols: Vec<String>,
    #[garde(skip)]
    #[serde(default)]
    pub source_lists: Option<Vec<Value>>,
    #[garde(skip)]
    #[serde(default = "default_scoring_algorithm")]
    pub scoring_algorithm: String,
}

fn default_scoring_algorithm() -> String {
    "cci".into()
}

pub async fn analyze(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<Json<Value>> {
    request.validate()?;

    if request.symbols.len() > MAX_SYMBOLS {
        return Err(Error::validation(format!(
            "too many symbols ({} > {MAX_SYMBOLS})",
            request.symbols.len()
        )));
    }
    if request
        .source_lists
        .as_ref()
        .is_some_and(|lists| lists.len() > MAX_SOURCE_LISTS)
    {
        return Err(Error::validation(format!(
            "too many source lists (max {MAX_SOURCE_LISTS})"
        )));
    }
    MomentumAlgo::parse(&request.scoring_algorithm)?;

    let mut symbols = Vec::with_capacity(request.symbols.len());
    for raw in &request.symbols {
        if raw.trim().is_empty() {
            continue;
        }
        symbols.push(canonicalize_symbol(raw)?);
    }
    if symbols.is_empty() {
        return Err(Error::validation("no valid symbols supplied"));
    }

    let source_lists = request.source_lists.map(Value::from);
    let run = runs::create_run(
        &state.pool,
        &symbols,
        source_lists.as_ref(),
        &request.scoring_algorithm,
        3,
    )
    .await?;

    tracing::info!(run_id = run.id, symbols = symbols.len(), "live20 run enqueued");
    Ok(Json(json!({
        "run_id": run.id,
        "status": run.status,
        "total": symbols.len(),
        "message": "Run queued for processing",
    })))
}

#[derive(Debug, Deserialize)]
pub struct ResultsParams {
    pub direction: Option<String>,
    #[serde(default)]
    pub min_score: i32,
    #[serde(default = "default_results_limit")]
    pub limit: i64,
}

fn default_results_limit() -> i64 {
    100
}

pub async fn results(
    State(state): State<AppState>,
    Query(params): Query<ResultsParams>,
) -> Result<Json<Value>> {
    if let Some(direction) = params.direction.as_deref() {
        direction.parse::<crate::agents::Direction>()?;
    }
    if !(0..=100).contains(&params.min_score) {
        return Err(Error::validation("min_score must be between 0 and 100"));
    }
    let limit = params.limit.clamp(1, 500);

    let recommendations = runs::latest_recommendations(
        &state.pool,
        params.direction.as_deref(),
        params.min_score,
        limit,
    )
    .await?;
    let (long, short, no_setup) = runs::direction_counts(&state.pool).await?;

    Ok(Json(json!({
        "results": recommendations.iter().map(recommendation_json).collect::<Vec<_>>(),
        "total": recommendations.len(),
        "counts": { "long": long, "short": short, "no_setup": no_setup },
    })))
}

pub async fn run_detail(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>> {
    let run = runs::get_run(&state.pool, id)
        .await?
        .ok_or_else(|| Error::not_found("Run not found"))?;
    let recommendations = runs::run_recommendations(&state.pool, id).await?;

    Ok(Json(json!({
        "id": run.id,
        "created_at": run.created_at,
        "status": run.status,
        "symbol_count": run.symbol_count,
        "processed_count": run.processed_count,
        "long_count": run.long_count,
        "short_count": run.short_count,
        "no_setup_count": run.no_setup_count,
        "input_symbols": run.input_symbols,
        "source_lists": run.source_lists,
        "scoring_algorithm": run.scoring_algorithm,
        "failed_symbols": run.failed_symbols,
        "results": recommendations.iter().map(recommendation_json).collect::<Vec<_>>(),
    })))
}

pub async fn cancel_run(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode> {
    let run = runs::get_run(&state.pool, id)
        .await?
        .ok_or_else(|| Error::not_found("Run not found"))?;

    if !matches!(run.status.as_str(), "pending" | "running") {
        return Err(Error::validation(format!(
            "cannot cancel {} run; only pending/running runs can be cancelled",
            run.status
        )));
    }

    runs::cancel_run(&state.pool, id).await?;
    tracing::info!(run_id = id, "live20 run cancelled");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_run(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode> {
    let run = runs::get_run(&state.pool, id)
        .await?
        .ok_or_else(|| Error::not_found("Run not found"))?;

    if matches!(run.status.as_str(), "pending" | "running") {
        return Err(Error::validation(format!(
            "cannot delete {} run; cancel it first",
            run.status
        )));
    }

    runs::soft_delete_run(&state.pool, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct RecommendRequest {
    #[serde(default = "default_recommend_strategy")]
    pub strategy: String,
    #[serde(default = "default_recommend_min_score")]
    pub min_score: i32,
    #[serde(default)]
    pub max_per_sector: Option<usize>,
    #[serde(default)]
    pub max_positions: Option<usize>,
    #[serde(default)]
    pub directions: Option<Vec<String>>,
}

fn default_recommend_strategy() -> String {
    "none".into()
}

fn default_recommend_min_score() -> i32 {
    60
}

/// Apply a portfolio selection strategy to a run's qualifying results.
pub async fn recommend(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<RecommendRequest>,
) -> Result<Json<Value>> {
    runs::get_run(&state.pool, id)
        .await?
        .ok_or_else(|| Error::not_found("Run not found"))?;

    let selector = get_selector(&request.strategy).ok_or_else(|| {
        Error::validation(format!("unknown portfolio strategy: {}", request.strategy))
    })?;

    let recommendations = runs::run_recommendations(&state.pool, id).await?;
    let mut direction_by_symbol: HashMap<String, Option<String>> = HashMap::new();
    let mut qualifying = Vec::new();

    for rec in &recommendations {
        let Some(direction) = rec.live20_direction.as_deref() else {
            continue;
        };
        if direction == "NO_SETUP" || rec.confidence_score < request.min_score {
            continue;
        }
        if let Some(allowed) = &request.directions {
            if !allowed.iter().any(|d| d == direction) {
                continue;
            }
        }
        qualifying.push(QualifyingSignal {
            symbol: rec.stock.clone(),
            score: rec.confidence_score,
            sector: rec.live20_sector_etf.clone(),
            atr_pct: rec.live20_atr.and_then(|d| d.to_f64()),
        });
        direction_by_symbol.insert(rec.stock.clone(), rec.live20_direction.clone());
    }

    let selected = selector.select(
        &qualifying,
        &HashMap::new(),
        0,
        request.max_per_sector,
        request.max_positions,
    );

    let items: Vec<Value> = selected
        .iter()
        .map(|signal| {
            json!({
                "symbol": signal.symbol,
                "score": signal.score,
                "direction": direction_by_symbol.get(&signal.symbol),
                "sector": signal.sector,
                "atr_pct": signal.atr_pct,
            })
        })
        .collect();

    Ok(Json(json!({
        "strategy": selector.name(),
        "strategy_description": selector.description(),
        "items": items,
        "total_qualifying": qualifying.len(),
        "total_selected": selected.len(),
    })))
}

fn recommendation_json(rec: &runs::Recommendation) -> Value {
    json!({
        "id": rec.id,
        "run_id": rec.live20_run_id,
        "stock": rec.stock,
        "source": rec.source,
        "recommendation": rec.recommendation,
        "confidence_score": rec.confidence_score,
        "reasoning": rec.reasoning,
        "direction": rec.live20_direction,
        "trend_aligned": rec.live20_trend_aligned,
        "ma20_distance": rec.live20_ma20_distance,
        "candle_pattern": rec.live20_candle_pattern,
        "volume_signal": rec.live20_volume_signal,
        "momentum": rec.live20_momentum,
        "atr_pct": rec.live20_atr,
        "sector_etf": rec.live20_sector_etf,
        "created_at": rec.created_at,
    })
}
