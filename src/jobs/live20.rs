//! Live 20 screening runs: job rows, recommendations, and the worker
//! processor that analyses one symbol at a time.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use super::queue::JobQueue;
use super::worker::JobProcessor;
use crate::agents::live20::{Live20Agent, MomentumAlgo};
use crate::agents::Direction;
use crate::data::cache::MarketDataCache;
use crate::data::{sector_etf, Interval, PriceDataRequest};
use crate::error::{Error, Result};

/// Civil days of history per symbol: enough warmup for MA20, CCI-20,
/// ATR-14 and RSI-2 across weekends and holidays.
const HISTORY_CIVIL_DAYS: i64 = 120;

#[derive(Debug, Clone)]
pub struct Live20Run {
    pub id: i64,
    pub input_symbols: Vec<String>,
    pub symbol_count: i32,
    pub processed_count: i32,
    pub long_count: i32,
    pub short_count: i32,
    pub no_setup_count: i32,
    pub failed_symbols: Value,
    pub source_lists: Option<Value>,
    pub scoring_algorithm: String,
    pub status: String,
    pub worker_id: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub last_error: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Recommendation {
    pub id: i64,
    pub live20_run_id: Option<i64>,
    pub stock: String,
    pub source: String,
    pub recommendation: String,
    pub confidence_score: i32,
    pub reasoning: Option<String>,
    pub live20_direction: Option<String>,
    pub live20_trend_aligned: Option<bool>,
    pub live20_ma20_distance: Option<Decimal>,
    pub live20_candle_pattern: Option<String>,
    pub live20_volume_signal: Option<bool>,
    pub live20_momentum: Option<Decimal>,
    pub live20_atr: Option<Decimal>,
    pub live20_sector_etf: Option<String>,
    pub created_at: DateTime<Utc>,
}

const RUN_COLUMNS: &str =
    "id, input_symbols, symbol_count, processed_count, long_count, short_count, \
     no_setup_count, failed_symbols, source_lists, scoring_algorithm, status, \
     worker_id, retry_count, max_retries, last_error, deleted_at, created_at, updated_at";

const RECOMMENDATION_COLUMNS: &str =
    "id, live20_run_id, stock, source, recommendation, confidence_score, reasoning, \
     live20_direction, live20_trend_aligned, live20_ma20_distance, live20_candle_pattern, \
     live20_volume_signal, live20_momentum, live20_atr, live20_sector_etf, created_at";

// -- run repository ---------------------------------------------------------

pub async fn create_run(
    pool: &PgPool,
    symbols: &[String],
    source_lists: Option<&Value>,
    scoring_algorithm: &str,
    max_retries: i32,
) -> Result<Live20Run> {
    let row = sqlx::query(&format!(
        "INSERT INTO live20_runs \
         (input_symbols, symbol_count, source_lists, scoring_algorithm, max_retries) \
         VALUES ($1, $2, $3, $4, $5) RETURNING {RUN_COLUMNS}"
    ))
    .bind(Value::from(symbols.to_vec()))
    .bind(symbols.len() as i32)
    .bind(source_lists)
    .bind(scoring_algorithm)
    .bind(max_retries)
    .fetch_one(pool)
    .await?;
    row_to_run(&row)
}

/// Soft-deleted runs are invisible to reads.
pub async fn get_run(pool: &PgPool, id: i64) -> Result<Option<Live20Run>> {
    let row = sqlx::query(&format!(
        "SELECT {RUN_COLUMNS} FROM live20_runs WHERE id = $1 AND deleted_at IS NULL"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(row_to_run).transpose()
}

pub async fn cancel_run(pool: &PgPool, id: i64) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE live20_runs SET status = 'cancelled' \
         WHERE id = $1 AND deleted_at IS NULL AND status IN ('pending', 'running')",
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn soft_delete_run(pool: &PgPool, id: i64) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE live20_runs SET deleted_at = now() WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn run_recommendations(pool: &PgPool, run_id: i64) -> Result<Vec<Recommendation>> {
    let rows = sqlx::query(&format!(
        "SELECT {RECOMMENDATION_COLUMNS} FROM recommendations \
         WHERE live20_run_id = $1 AND deleted_at IS NULL \
         ORDER BY confidence_score DESC"
    ))
    .bind(run_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(row_to_recommendation).collect()
}

/// Latest recommendations across runs, with direction / score filters.
pub async fn latest_recommendations(
    pool: &PgPool,
    direction: Option<&str>,
    min_score: i32,
    limit: i64,
) -> Result<Vec<Recommendation>> {
    let mut sql = format!(
        "SELECT {RECOMMENDATION_COLUMNS} FROM recommendations \
         WHERE source = 'live_20' AND deleted_at IS NULL AND confidence_score >= $1"
    );
    if direction.is_some() {
        sql.push_str(" AND live20_direction = $3");
    }
    sql.push_str(" ORDER BY created_at DESC LIMIT $2");

    let mut query = sqlx::query(&sql).bind(min_score).bind(limit);
    if let Some(direction) = direction {
        query = query.bind(direction);
    }
    let rows = query.fetch_all(pool).await?;
    rows.iter().map(row_to_recommendation).collect()
}

pub async fn direction_counts(pool: &PgPool) -> Result<(i64, i64, i64)> {
    let rows = sqlx::query(
        "SELECT live20_direction, COUNT(*) AS count FROM recommendations \
         WHERE source = 'live_20' AND deleted_at IS NULL \
         GROUP BY live20_direction",
    )
    .fetch_all(pool)
    .await?;

    let (mut long, mut short, mut no_setup) = (0, 0, 0);
    for row in rows {
        let direction: Option<String> = row.get("live20_direction");
        let count: i64 = row.get("count");
        match direction.as_deref() {
            Some("LONG") => long = count,
            Some("SHORT") => short = count,
            Some("NO_SETUP") => no_setup = count,
            _ => {}
        }
    }
    Ok((long, short, no_setup))
}

fn row_to_run(row: &PgRow) -> Result<Live20Run> {
    let input_symbols: Value = row.get("input_symbols");
    let input_symbols = serde_json::from_value(input_symbols)
        .map_err(|e| Error::validation(format!("corrupt input_symbols: {e}")))?;
    Ok(Live20Run {
        id: row.get("id"),
        input_symbols,
        symbol_count: row.get("symbol_count"),
        processed_count: row.get("processed_count"),
        long_count: row.get("long_count"),
        short_count: row.get("short_count"),
        no_setup_count: row.get("no_setup_count"),
        failed_symbols: row.get("failed_symbols"),
        source_lists: row.get("source_lists"),
        scoring_algorithm: row.get("scoring_algorithm"),
        status: row.get("status"),
        worker_id: row.get("worker_id"),
        retry_count: row.get("retry_count"),
        max_retries: row.get("max_retries"),
        last_error: row.get("last_error"),
        deleted_at: row.get("deleted_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_recommendation(row: &PgRow) -> Result<Recommendation> {
    Ok(Recommendation {
        id: row.get("id"),
        live20_run_id: row.get("live20_run_id"),
        stock: row.get("stock"),
        source: row.get("source"),
        recommendation: row.get("recommendation"),
        confidence_score: row.get("confidence_score"),
        reasoning: row.get("reasoning"),
        live20_direction: row.get("live20_direction"),
        live20_trend_aligned: row.get("live20_trend_aligned"),
        live20_ma20_distance: row.get("live20_ma20_distance"),
        live20_candle_pattern: row.get("live20_candle_pattern"),
        live20_volume_signal: row.get("live20_volume_signal"),
        live20_momentum: row.get("live20_momentum"),
        live20_atr: row.get("live20_atr"),
        live20_sector_etf: row.get("live20_sector_etf"),
        created_at: row.get("created_at"),
    })
}

// -- processor --------------------------------------------------------------

pub struct Live20Processor {
    pool: PgPool,
    queue: JobQueue,
    cache: Arc<MarketDataCache>,
}

impl Live20Processor {
    pub fn new(pool: PgPool, queue: JobQueue, cache: Arc<MarketDataCache>) -> Self {
        Self { pool, queue, cache }
    }

    async fn analyze_symbol(
        &self,
        run: &Live20Run,
        agent: &Live20Agent,
        symbol: &str,
    ) -> Result<()> {
        let request = PriceDataRequest {
            symbol: symbol.to_string(),
            start: Utc::now() - Duration::days(HISTORY_CIVIL_DAYS),
            end: Utc::now(),
            interval: Interval::Day1,
            include_pre_post: false,
        };
        let bars = self.cache.get_price_data(&request, false).await?;
        let analysis = agent.analyze(&bars);

        let etf = self.sector_etf_for(symbol).await;

        sqlx::query(
            "INSERT INTO recommendations \
             (live20_run_id, stock, source, recommendation, confidence_score, reasoning, \
              live20_direction, live20_trend_aligned, live20_ma20_distance, \
              live20_candle_pattern, live20_volume_signal, live20_momentum, \
              live20_atr, live20_sector_etf) \
             VALUES ($1, $2, 'live_20', $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(run.id)
        .bind(symbol)
        .bind(analysis.direction.as_str())
        .bind(analysis.score)
        .bind(&analysis.reasoning)
        .bind(analysis.direction.as_str())
        .bind(analysis.trend_aligned)
        .bind(analysis.ma20_distance_pct.and_then(to_decimal4))
        .bind(analysis.candle_pattern.map(|p| p.as_str()))
        .bind(analysis.volume_signal)
        .bind(to_decimal4(analysis.momentum))
        .bind(analysis.atr_pct.and_then(to_decimal4))
        .bind(etf)
        .execute(&self.pool)
        .await?;

        let column = match analysis.direction {
            Direction::Long => "long_count",
            Direction::Short => "short_count",
            Direction::NoSetup => "no_setup_count",
        };
        sqlx::query(&format!(
            "UPDATE live20_runs SET processed_count = processed_count + 1, \
             {column} = {column} + 1 WHERE id = $1"
        ))
        .bind(run.id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn sector_etf_for(&self, symbol: &str) -> Option<String> {
        match self.cache.store().get_sector(symbol).await {
            Ok(Some(record)) => record
                .sector_etf
                .or_else(|| record.sector.as_deref().and_then(sector_etf).map(String::from)),
            _ => match self.cache.provider().get_symbol_info(symbol).await {
                Ok(info) => {
                    let record = self.cache.store().upsert_sector(&info).await.ok()?;
                    record.sector_etf
                }
                Err(_) => None,
            },
        }
    }

    async fn record_failure(&self, run_id: i64, symbol: &str, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE live20_runs SET processed_count = processed_count + 1, \
             failed_symbols = failed_symbols || $2 WHERE id = $1",
        )
        .bind(run_id)
        .bind(json!({ symbol: error }))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl JobProcessor for Live20Processor {
    fn kind(&self) -> &'static str {
        "live20"
    }

    /// Iterate the run's symbols; cancellation is probed between symbols.
    /// Per-symbol failures are recorded on the run and never abort it.
    async fn process(&self, job_id: i64) -> Result<()> {
        let run = get_run(&self.pool, job_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("live20 run {job_id} disappeared")))?;

        let agent = Live20Agent::new(0, MomentumAlgo::parse(&run.scoring_algorithm)?);

        // Resume support: skip symbols a previous attempt already processed.
        let start_at = run.processed_count as usize;
        for symbol in run.input_symbols.iter().skip(start_at) {
            if self.queue.is_cancelled(job_id).await? {
                return Err(Error::Cancelled);
            }

            match self.analyze_symbol(&run, &agent, symbol).await {
                Ok(()) => tracing::debug!(job_id, %symbol, "symbol analyzed"),
                Err(e) => {
                    tracing::warn!(job_id, %symbol, error = %e, "symbol analysis failed");
                    self.record_failure(job_id, symbol, &e.to_string()).await?;
                }
            }
        }
        Ok(())
    }
}

fn to_decimal4(v: f64) -> Option<Decimal> {
    Decimal::from_f64_retain(v).map(|d| d.round_dp(4))
}
