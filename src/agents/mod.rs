//! Trading agent capability and registry.
//!
//! Agents are resolved by name from a closed registry; the engine only sees
//! `dyn Agent` and never a concrete variant.

pub mod live20;
pub mod selector;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::data::PriceBar;
use crate::engine::types::AgentConfig;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentAction {
    Buy,
    Hold,
    NoSignal,
}

impl AgentAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Hold => "HOLD",
            Self::NoSignal => "NO_SIGNAL",
        }
    }
}

/// Analysis direction for screening runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "LONG")]
    Long,
    #[serde(rename = "SHORT")]
    Short,
    #[serde(rename = "NO_SETUP")]
    NoSetup,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Long => "LONG",
            Self::Short => "SHORT",
            Self::NoSetup => "NO_SETUP",
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "LONG" => Ok(Self::Long),
            "SHORT" => Ok(Self::Short),
            "NO_SETUP" => Ok(Self::NoSetup),
            other => Err(Error::validation(format!("unknown direction '{other}'"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentDecision {
    pub action: AgentAction,
    pub score: Option<i32>,
    pub reasoning: Option<String>,
}

impl AgentDecision {
    pub fn no_signal() -> Self {
        Self {
            action: AgentAction::NoSignal,
            score: None,
            reasoning: None,
        }
    }
}

/// Trading agent capability. `history` is ordered ascending and ends at or
/// before `current_date`; `has_open_position` lets an agent emit HOLD for
/// positions the engine already tracks.
pub trait Agent: Send + Sync {
    fn name(&self) -> &'static str;

    fn required_lookback_days(&self) -> usize;

    fn evaluate(
        &self,
        symbol: &str,
        history: &[PriceBar],
        current_date: NaiveDate,
        has_open_position: bool,
    ) -> AgentDecision;
}

/// Metadata for the agent catalog endpoint.
pub struct AgentInfo {
    pub name: &'static str,
    pub description: &'static str,
}

pub const AGENT_CATALOG: &[AgentInfo] = &[AgentInfo {
    name: "live20",
    description: "Mean-reversion screen: trend, MA20 stretch, candle pattern, \
                  volume and momentum (CCI zones or graduated RSI-2) over a \
                  ~20-day window.",
}];

/// Resolve an agent by name. Unknown names are a validation error so the
/// REST layer can reject them before a job is enqueued.
pub fn build_agent(agent_type: &str, config: &AgentConfig) -> Result<Box<dyn Agent>> {
    match agent_type {
        "live20" => Ok(Box::new(live20::Live20Agent::from_config(config)?)),
        other => Err(Error::validation(format!("unknown agent type '{other}'"))),
    }
}
