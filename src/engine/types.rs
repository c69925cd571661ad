//! Arena domain types: simulations, positions, snapshots.
//!
//! Statuses are closed enums in the domain layer; persistence stores them
//! as strings.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

impl SimulationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    /// Terminal states can be deleted but not cancelled.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

impl std::str::FromStr for SimulationStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            "failed" => Ok(Self::Failed),
            other => Err(Error::validation(format!(
                "unknown simulation status '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Pending,
    Open,
    Closed,
}

impl PositionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

impl std::str::FromStr for PositionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "open" => Ok(Self::Open),
            "closed" => Ok(Self::Closed),
            other => Err(Error::validation(format!(
                "unknown position status '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopHit,
    SimulationEnd,
    InsufficientCapital,
}

impl ExitReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StopHit => "stop_hit",
            Self::SimulationEnd => "simulation_end",
            Self::InsufficientCapital => "insufficient_capital",
        }
    }
}

impl std::str::FromStr for ExitReason {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "stop_hit" => Ok(Self::StopHit),
            "simulation_end" => Ok(Self::SimulationEnd),
            "insufficient_capital" => Ok(Self::InsufficientCapital),
            other => Err(Error::validation(format!("unknown exit reason '{other}'"))),
        }
    }
}

/// Agent-level configuration carried in the simulation's `agent_config`
/// JSON column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_trailing_stop_pct")]
    pub trailing_stop_pct: Decimal,
    #[serde(default = "default_min_buy_score")]
    pub min_buy_score: i32,
    #[serde(default = "default_scoring_algorithm")]
    pub scoring_algorithm: String,
    #[serde(default)]
    pub portfolio_strategy: Option<String>,
    #[serde(default)]
    pub max_per_sector: Option<usize>,
    #[serde(default)]
    pub max_open_positions: Option<usize>,
}

fn default_trailing_stop_pct() -> Decimal {
    Decimal::new(5, 0)
}

fn default_min_buy_score() -> i32 {
    60
}

fn default_scoring_algorithm() -> String {
    "cci".into()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            trailing_stop_pct: default_trailing_stop_pct(),
            min_buy_score: default_min_buy_score(),
            scoring_algorithm: default_scoring_algorithm(),
            portfolio_strategy: None,
            max_per_sector: None,
            max_open_positions: None,
        }
    }
}

impl AgentConfig {
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| Error::validation(format!("invalid agent_config: {e}")))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ArenaSimulation {
    pub id: i64,
    pub name: Option<String>,
    pub symbols: Vec<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_capital: Decimal,
    pub position_size: Decimal,
    pub agent_type: String,
    pub agent_config: serde_json::Value,

    pub status: SimulationStatus,
    pub current_day: i32,
    pub total_days: i32,

    pub worker_id: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub last_error: Option<String>,

    pub final_equity: Option<Decimal>,
    pub total_return_pct: Option<Decimal>,
    pub total_trades: i32,
    pub winning_trades: i32,
    pub max_drawdown_pct: Option<Decimal>,
    pub avg_hold_days: Option<Decimal>,
    pub avg_win_pnl: Option<Decimal>,
    pub avg_loss_pnl: Option<Decimal>,
    pub profit_factor: Option<Decimal>,
    pub sharpe_ratio: Option<Decimal>,
    pub total_realized_pnl: Option<Decimal>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ArenaSimulation {
    /// Initialisation computes trading days and preloads price data; a
    /// simulation is initialised once `total_days` is known.
    pub fn is_initialized(&self) -> bool {
        self.total_days > 0
    }

    pub fn win_rate(&self) -> Option<Decimal> {
        if self.total_trades == 0 {
            return None;
        }
        Some(
            Decimal::from(self.winning_trades) / Decimal::from(self.total_trades)
                * Decimal::ONE_HUNDRED,
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ArenaPosition {
    pub id: i64,
    pub simulation_id: i64,
    pub symbol: String,
    pub status: PositionStatus,

    pub signal_date: NaiveDate,
    pub entry_date: Option<NaiveDate>,
    pub entry_price: Option<Decimal>,
    pub shares: Option<i32>,

    pub trailing_stop_pct: Decimal,
    pub highest_price: Option<Decimal>,
    pub current_stop: Option<Decimal>,

    pub exit_date: Option<NaiveDate>,
    pub exit_price: Option<Decimal>,
    pub exit_reason: Option<ExitReason>,
    pub realized_pnl: Option<Decimal>,
    pub return_pct: Option<Decimal>,

    pub agent_reasoning: Option<String>,
    pub agent_score: Option<i32>,
}

impl ArenaPosition {
    /// A fresh pending position from a BUY signal.
    pub fn pending(
        simulation_id: i64,
        symbol: String,
        signal_date: NaiveDate,
        trailing_stop_pct: Decimal,
        agent_score: Option<i32>,
        agent_reasoning: Option<String>,
    ) -> Self {
        Self {
            id: 0,
            simulation_id,
            symbol,
            status: PositionStatus::Pending,
            signal_date,
            entry_date: None,
            entry_price: None,
            shares: None,
            trailing_stop_pct,
            highest_price: None,
            current_stop: None,
            exit_date: None,
            exit_price: None,
            exit_reason: None,
            realized_pnl: None,
            return_pct: None,
            agent_reasoning,
            agent_score,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    pub fn is_closed(&self) -> bool {
        self.status == PositionStatus::Closed
    }

    pub fn calculate_pnl(&self, exit_price: Decimal) -> Decimal {
        match (self.entry_price, self.shares) {
            (Some(entry), Some(shares)) => {
                ((exit_price - entry) * Decimal::from(shares)).round_dp(2)
            }
            _ => Decimal::ZERO,
        }
    }

    pub fn calculate_return_pct(&self, exit_price: Decimal) -> Decimal {
        match self.entry_price {
            Some(entry) if entry > Decimal::ZERO => {
                ((exit_price - entry) / entry * Decimal::ONE_HUNDRED).round_dp(4)
            }
            _ => Decimal::ZERO,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ArenaSnapshot {
    pub id: i64,
    pub simulation_id: i64,
    pub snapshot_date: NaiveDate,
    pub day_number: i32,

    pub cash: Decimal,
    pub positions_value: Decimal,
    pub total_equity: Decimal,
    pub daily_pnl: Decimal,
    pub daily_return_pct: Decimal,
    pub cumulative_return_pct: Decimal,
    pub open_position_count: i32,
    pub decisions: serde_json::Value,
}
