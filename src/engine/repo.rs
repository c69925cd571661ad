//! Postgres persistence for arena simulations, positions and snapshots.
//!
//! Every day step commits through `persist_day`, which writes positions,
//! the snapshot and the simulation's progress in one transaction so a
//! crash mid-day leaves the simulation at the previous `current_day`.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use super::analytics::CompletionStats;
use super::sim::SnapshotDraft;
use super::types::{ArenaPosition, ArenaSimulation, ArenaSnapshot, PositionStatus};
use crate::error::{Error, Result};

const SIMULATION_COLUMNS: &str =
    "id, name, symbols, start_date, end_date, initial_capital, position_size, \
     agent_type, agent_config, status, current_day, total_days, worker_id, \
     claimed_at, heartbeat_at, retry_count, max_retries, last_error, \
     final_equity, total_return_pct, total_trades, winning_trades, \
     max_drawdown_pct, avg_hold_days, avg_win_pnl, avg_loss_pnl, \
     profit_factor, sharpe_ratio, total_realized_pnl, created_at, updated_at";

const POSITION_COLUMNS: &str =
    "id, simulation_id, symbol, status, signal_date, entry_date, entry_price, \
     shares, trailing_stop_pct, highest_price, current_stop, exit_date, \
     exit_price, exit_reason, realized_pnl, return_pct, agent_reasoning, agent_score";

const SNAPSHOT_COLUMNS: &str =
    "id, simulation_id, snapshot_date, day_number, cash, positions_value, \
     total_equity, daily_pnl, daily_return_pct, cumulative_return_pct, \
     open_position_count, decisions";

#[derive(Debug, Clone)]
pub struct NewSimulation {
    pub name: Option<String>,
    pub symbols: Vec<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_capital: Decimal,
    pub position_size: Decimal,
    pub agent_type: String,
    pub agent_config: Value,
    pub max_retries: i32,
}

pub async fn create_simulation(pool: &PgPool, new: &NewSimulation) -> Result<ArenaSimulation> {
    let row = sqlx::query(&format!(
        "INSERT INTO arena_simulations \
         (name, symbols, start_date, end_date, initial_capital, position_size, \
          agent_type, agent_config, max_retries) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
         RETURNING {SIMULATION_COLUMNS}"
    ))
    .bind(&new.name)
    .bind(Value::from(new.symbols.clone()))
    .bind(new.start_date)
    .bind(new.end_date)
    .bind(new.initial_capital)
    .bind(new.position_size)
    .bind(&new.agent_type)
    .bind(&new.agent_config)
    .bind(new.max_retries)
    .fetch_one(pool)
    .await?;
    row_to_simulation(&row)
}

pub async fn get_simulation(pool: &PgPool, id: i64) -> Result<Option<ArenaSimulation>> {
    let row = sqlx::query(&format!(
        "SELECT {SIMULATION_COLUMNS} FROM arena_simulations WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(row_to_simulation).transpose()
}

pub async fn list_simulations(
    pool: &PgPool,
    limit: i64,
    offset: i64,
) -> Result<(Vec<ArenaSimulation>, i64)> {
    let rows = sqlx::query(&format!(
        "SELECT {SIMULATION_COLUMNS} FROM arena_simulations \
         ORDER BY created_at DESC LIMIT $1 OFFSET $2"
    ))
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    let simulations = rows
        .iter()
        .map(row_to_simulation)
        .collect::<Result<Vec<_>>>()?;

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM arena_simulations")
        .fetch_one(pool)
        .await?;
    Ok((simulations, total))
}

/// Cooperative cancel: flips pending/running/paused rows only. Returns
/// whether a row changed.
pub async fn cancel_simulation(pool: &PgPool, id: i64) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE arena_simulations SET status = 'cancelled' \
         WHERE id = $1 AND status IN ('pending', 'running', 'paused')",
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Hard delete; positions and snapshots cascade.
pub async fn delete_simulation(pool: &PgPool, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM arena_simulations WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn set_total_days(pool: &PgPool, id: i64, total_days: i32) -> Result<()> {
    sqlx::query("UPDATE arena_simulations SET total_days = $2 WHERE id = $1")
        .bind(id)
        .bind(total_days)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn positions_for(pool: &PgPool, simulation_id: i64) -> Result<Vec<ArenaPosition>> {
    let rows = sqlx::query(&format!(
        "SELECT {POSITION_COLUMNS} FROM arena_positions \
         WHERE simulation_id = $1 ORDER BY signal_date, symbol"
    ))
    .bind(simulation_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(row_to_position).collect()
}

pub async fn snapshots_for(pool: &PgPool, simulation_id: i64) -> Result<Vec<ArenaSnapshot>> {
    let rows = sqlx::query(&format!(
        "SELECT {SNAPSHOT_COLUMNS} FROM arena_snapshots \
         WHERE simulation_id = $1 ORDER BY day_number"
    ))
    .bind(simulation_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(row_to_snapshot).collect()
}

pub async fn last_snapshot(pool: &PgPool, simulation_id: i64) -> Result<Option<ArenaSnapshot>> {
    let row = sqlx::query(&format!(
        "SELECT {SNAPSHOT_COLUMNS} FROM arena_snapshots \
         WHERE simulation_id = $1 ORDER BY day_number DESC LIMIT 1"
    ))
    .bind(simulation_id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(row_to_snapshot).transpose()
}

pub struct DayPersist<'a> {
    pub simulation_id: i64,
    pub new_current_day: i32,
    pub positions: &'a [ArenaPosition],
    pub snapshot: &'a SnapshotDraft,
    pub completion: Option<&'a CompletionStats>,
}

/// Commit one day atomically: position upserts, the snapshot, progress,
/// and (on the final day) the completion analytics and terminal status.
pub async fn persist_day(pool: &PgPool, day: DayPersist<'_>) -> Result<()> {
    let mut tx = pool.begin().await?;

    for position in day.positions {
        if position.id == 0 {
            sqlx::query(
                "INSERT INTO arena_positions \
                 (simulation_id, symbol, status, signal_date, entry_date, entry_price, \
                  shares, trailing_stop_pct, highest_price, current_stop, exit_date, \
                  exit_price, exit_reason, realized_pnl, return_pct, agent_reasoning, agent_score) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
            )
            .bind(day.simulation_id)
            .bind(&position.symbol)
            .bind(position.status.as_str())
            .bind(position.signal_date)
            .bind(position.entry_date)
            .bind(position.entry_price)
            .bind(position.shares)
            .bind(position.trailing_stop_pct)
            .bind(position.highest_price)
            .bind(position.current_stop)
            .bind(position.exit_date)
            .bind(position.exit_price)
            .bind(position.exit_reason.map(|r| r.as_str()))
            .bind(position.realized_pnl)
            .bind(position.return_pct)
            .bind(&position.agent_reasoning)
            .bind(position.agent_score)
            .execute(&mut *tx)
            .await?;
        } else {
            sqlx::query(
                "UPDATE arena_positions SET status = $2, entry_date = $3, entry_price = $4, \
                 shares = $5, highest_price = $6, current_stop = $7, exit_date = $8, \
                 exit_price = $9, exit_reason = $10, realized_pnl = $11, return_pct = $12 \
                 WHERE id = $1",
            )
            .bind(position.id)
            .bind(position.status.as_str())
            .bind(position.entry_date)
            .bind(position.entry_price)
            .bind(position.shares)
            .bind(position.highest_price)
            .bind(position.current_stop)
            .bind(position.exit_date)
            .bind(position.exit_price)
            .bind(position.exit_reason.map(|r| r.as_str()))
            .bind(position.realized_pnl)
            .bind(position.return_pct)
            .execute(&mut *tx)
            .await?;
        }
    }

    let snapshot = day.snapshot;
    sqlx::query(
        "INSERT INTO arena_snapshots \
         (simulation_id, snapshot_date, day_number, cash, positions_value, total_equity, \
          daily_pnl, daily_return_pct, cumulative_return_pct, open_position_count, decisions) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
    )
    .bind(day.simulation_id)
    .bind(snapshot.snapshot_date)
    .bind(snapshot.day_number)
    .bind(snapshot.cash)
    .bind(snapshot.positions_value)
    .bind(snapshot.total_equity)
    .bind(snapshot.daily_pnl)
    .bind(snapshot.daily_return_pct)
    .bind(snapshot.cumulative_return_pct)
    .bind(snapshot.open_position_count)
    .bind(&snapshot.decisions)
    .execute(&mut *tx)
    .await?;

    if let Some(stats) = day.completion {
        // Guarded on 'running' so a cancellation that landed mid-step is
        // never overwritten by the completion transition.
        sqlx::query(
            "UPDATE arena_simulations SET current_day = $2, status = 'completed', \
             worker_id = NULL, claimed_at = NULL, final_equity = $3, total_return_pct = $4, \
             total_trades = $5, winning_trades = $6, max_drawdown_pct = $7, avg_hold_days = $8, \
             avg_win_pnl = $9, avg_loss_pnl = $10, profit_factor = $11, sharpe_ratio = $12, \
             total_realized_pnl = $13 \
             WHERE id = $1 AND status = 'running'",
        )
        .bind(day.simulation_id)
        .bind(day.new_current_day)
        .bind(stats.final_equity)
        .bind(stats.total_return_pct)
        .bind(stats.total_trades)
        .bind(stats.winning_trades)
        .bind(stats.max_drawdown_pct)
        .bind(stats.avg_hold_days)
        .bind(stats.avg_win_pnl)
        .bind(stats.avg_loss_pnl)
        .bind(stats.profit_factor)
        .bind(stats.sharpe_ratio)
        .bind(stats.total_realized_pnl)
        .execute(&mut *tx)
        .await?;
    } else {
        sqlx::query("UPDATE arena_simulations SET current_day = $2 WHERE id = $1")
            .bind(day.simulation_id)
            .bind(day.new_current_day)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(())
}

// -- row mapping ------------------------------------------------------------

fn row_to_simulation(row: &PgRow) -> Result<ArenaSimulation> {
    let status: String = row.get("status");
    let symbols: Value = row.get("symbols");
    let symbols = serde_json::from_value(symbols)
        .map_err(|e| Error::validation(format!("corrupt symbols column: {e}")))?;

    Ok(ArenaSimulation {
        id: row.get("id"),
        name: row.get("name"),
        symbols,
        start_date: row.get("start_date"),
        end_date: row.get("end_date"),
        initial_capital: row.get("initial_capital"),
        position_size: row.get("position_size"),
        agent_type: row.get("agent_type"),
        agent_config: row.get("agent_config"),
        status: status.parse()?,
        current_day: row.get("current_day"),
        total_days: row.get("total_days"),
        worker_id: row.get("worker_id"),
        claimed_at: row.get("claimed_at"),
        heartbeat_at: row.get("heartbeat_at"),
        retry_count: row.get("retry_count"),
        max_retries: row.get("max_retries"),
        last_error: row.get("last_error"),
        final_equity: row.get("final_equity"),
        total_return_pct: row.get("total_return_pct"),
        total_trades: row.get("total_trades"),
        winning_trades: row.get("winning_trades"),
        max_drawdown_pct: row.get("max_drawdown_pct"),
        avg_hold_days: row.get("avg_hold_days"),
        avg_win_pnl: row.get("avg_win_pnl"),
        avg_loss_pnl: row.get("avg_loss_pnl"),
        profit_factor: row.get("profit_factor"),
        sharpe_ratio: row.get("sharpe_ratio"),
        total_realized_pnl: row.get("total_realized_pnl"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_position(row: &PgRow) -> Result<ArenaPosition> {
    let status: String = row.get("status");
    let exit_reason: Option<String> = row.get("exit_reason");
    Ok(ArenaPosition {
        id: row.get("id"),
        simulation_id: row.get("simulation_id"),
        symbol: row.get("symbol"),
        status: status.parse::<PositionStatus>()?,
        signal_date: row.get("signal_date"),
        entry_date: row.get("entry_date"),
        entry_price: row.get("entry_price"),
        shares: row.get("shares"),
        trailing_stop_pct: row.get("trailing_stop_pct"),
        highest_price: row.get("highest_price"),
        current_stop: row.get("current_stop"),
        exit_date: row.get("exit_date"),
        exit_price: row.get("exit_price"),
        exit_reason: exit_reason.as_deref().map(str::parse).transpose()?,
        realized_pnl: row.get("realized_pnl"),
        return_pct: row.get("return_pct"),
        agent_reasoning: row.get("agent_reasoning"),
        agent_score: row.get("agent_score"),
    })
}

fn row_to_snapshot(row: &PgRow) -> Result<ArenaSnapshot> {
    Ok(ArenaSnapshot {
        id: row.get("id"),
        simulation_id: row.get("simulation_id"),
        snapshot_date: row.get("snapshot_date"),
        day_number: row.get("day_number"),
        cash: row.get("cash"),
        positions_value: row.get("positions_value"),
        total_equity: row.get("total_equity"),
        daily_pnl: row.get("daily_pnl"),
        daily_return_pct: row.get("daily_return_pct"),
        cumulative_return_pct: row.get("cumulative_return_pct"),
        open_position_count: row.get("open_position_count"),
        decisions: row.get("decisions"),
    })
}
