//! Pure per-day simulation step.
//!
//! `run_day` implements one trading day against in-memory state: fill
//! pending entries at the open, manage trailing stops, evaluate signals,
//! and produce the end-of-day snapshot. All persistence happens in the
//! engine service, which wraps each day in a single transaction; keeping
//! this core pure makes the day algorithm testable bar-by-bar.

use std::collections::HashMap;

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::json;

use super::trailing::FixedPercentTrailingStop;
use super::types::{ArenaPosition, ExitReason, PositionStatus};
use crate::agents::selector::{PortfolioSelector, QualifyingSignal};
use crate::agents::{Agent, AgentAction};
use crate::data::PriceBar;
use crate::error::Result;
use crate::indicators::average_true_range;

/// Ascending per-symbol bar storage with date addressing.
#[derive(Debug, Default)]
pub struct BarSeries {
    by_symbol: HashMap<String, Vec<PriceBar>>,
}

impl BarSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert bars for a symbol, keeping the series date-sorted.
    pub fn insert(&mut self, symbol: &str, mut bars: Vec<PriceBar>) {
        bars.sort_by_key(PriceBar::date);
        self.by_symbol.insert(symbol.to_string(), bars);
    }

    pub fn bar_on(&self, symbol: &str, day: NaiveDate) -> Option<&PriceBar> {
        let series = self.by_symbol.get(symbol)?;
        let idx = series.binary_search_by_key(&day, PriceBar::date).ok()?;
        series.get(idx)
    }

    /// All bars with date <= `day`, ascending.
    pub fn history_through(&self, symbol: &str, day: NaiveDate) -> &[PriceBar] {
        let Some(series) = self.by_symbol.get(symbol) else {
            return &[];
        };
        let end = series.partition_point(|bar| bar.date() <= day);
        &series[..end]
    }

    pub fn last_close_on_or_before(&self, symbol: &str, day: NaiveDate) -> Option<Decimal> {
        self.history_through(symbol, day)
            .last()
            .map(|bar| bar.close)
    }
}

/// Everything one day step needs, besides the positions themselves.
pub struct DayContext<'a> {
    pub simulation_id: i64,
    pub day: NaiveDate,
    pub day_number: i32,
    pub prev_trading_day: Option<NaiveDate>,
    pub cash: Decimal,
    pub prev_equity: Decimal,
    pub initial_capital: Decimal,
    pub position_size: Decimal,
    pub trailing_stop_pct: Decimal,
    pub symbols: &'a [String],
    pub bars: &'a BarSeries,
    pub agent: &'a dyn Agent,
    pub selector: Option<&'a dyn PortfolioSelector>,
    pub max_per_sector: Option<usize>,
    pub max_open_positions: Option<usize>,
    pub sector_by_symbol: &'a HashMap<String, String>,
}

/// End-of-day snapshot fields, before persistence assigns an id.
#[derive(Debug, Clone)]
pub struct SnapshotDraft {
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

#[derive(Debug)]
pub struct DayOutcome {
    /// All active-at-entry positions after mutation, plus new pendings.
    pub positions: Vec<ArenaPosition>,
    pub cash: Decimal,
    pub snapshot: SnapshotDraft,
}

pub fn run_day(ctx: &DayContext<'_>, mut positions: Vec<ArenaPosition>) -> Result<DayOutcome> {
    let mut cash = ctx.cash;
    let mut opened: Vec<String> = Vec::new();
    let mut closed: Vec<serde_json::Value> = Vec::new();

    fill_pending_entries(ctx, &mut positions, &mut cash, &mut opened, &mut closed)?;
    manage_open_positions(ctx, &mut positions, &mut cash, &mut closed)?;
    let signals = evaluate_signals(ctx, &mut positions, cash)?;

    let snapshot = build_snapshot(ctx, &positions, cash, &signals, &opened, &closed);

    Ok(DayOutcome {
        positions,
        cash,
        snapshot,
    })
}

/// Step A: fill pending entries at today's open, in deterministic
/// (signal_date, symbol) order with an explicit cash check.
fn fill_pending_entries(
    ctx: &DayContext<'_>,
    positions: &mut [ArenaPosition],
    cash: &mut Decimal,
    opened: &mut Vec<String>,
    closed: &mut Vec<serde_json::Value>,
) -> Result<()> {
    let mut order: Vec<usize> = positions
        .iter()
        .enumerate()
        .filter(|(_, p)| p.status == PositionStatus::Pending && p.signal_date < ctx.day)
        .map(|(i, _)| i)
        .collect();
    order.sort_by(|&a, &b| {
        (positions[a].signal_date, positions[a].symbol.as_str())
            .cmp(&(positions[b].signal_date, positions[b].symbol.as_str()))
    });

    for idx in order {
        let position = &mut positions[idx];
        let Some(bar) = ctx.bars.bar_on(&position.symbol, ctx.day) else {
            // Missing fill bar (halt, delisting, data gap): wait one more
            // day, then give up on the signal.
            let waited = ctx
                .prev_trading_day
                .is_some_and(|prev| position.signal_date < prev);
            if waited {
                close_unfilled(position, ctx.day);
                closed.push(json!({
                    "symbol": position.symbol,
                    "reason": ExitReason::InsufficientCapital.as_str(),
                }));
            }
            continue;
        };

        let entry_price = bar.open;
        let shares = (ctx.position_size / entry_price).floor().to_i32().unwrap_or(0);
        let cost = (entry_price * Decimal::from(shares)).round_dp(2);

        if shares == 0 || cost > *cash {
            close_unfilled(position, ctx.day);
            closed.push(json!({
                "symbol": position.symbol,
                "reason": ExitReason::InsufficientCapital.as_str(),
            }));
            continue;
        }

        let trailing = FixedPercentTrailingStop::new(position.trailing_stop_pct)?;
        let (highest, stop) = trailing.initial(entry_price);

        position.status = PositionStatus::Open;
        position.entry_date = Some(ctx.day);
        position.entry_price = Some(entry_price);
        position.shares = Some(shares);
        position.highest_price = Some(highest);
        position.current_stop = Some(stop);
        *cash -= cost;
        opened.push(position.symbol.clone());
    }
    Ok(())
}

/// A pending position that never got a fill: closed with zero P&L and no
/// cash movement.
fn close_unfilled(position: &mut ArenaPosition, day: NaiveDate) {
    position.status = PositionStatus::Closed;
    position.exit_date = Some(day);
    position.exit_reason = Some(ExitReason::InsufficientCapital);
    position.realized_pnl = Some(Decimal::ZERO);
    position.return_pct = Some(Decimal::ZERO);
}

/// Step B: advance trailing stops; exits fill at the stop price.
fn manage_open_positions(
    ctx: &DayContext<'_>,
    positions: &mut [ArenaPosition],
    cash: &mut Decimal,
    closed: &mut Vec<serde_json::Value>,
) -> Result<()> {
    let mut order: Vec<usize> = positions
        .iter()
        .enumerate()
        .filter(|(_, p)| p.status == PositionStatus::Open)
        .map(|(i, _)| i)
        .collect();
    order.sort_by(|&a, &b| positions[a].symbol.cmp(&positions[b].symbol));

    for idx in order {
        let position = &mut positions[idx];
        // Missing bar: carry forward, the stop does not advance.
        let Some(bar) = ctx.bars.bar_on(&position.symbol, ctx.day) else {
            continue;
        };

        let (Some(highest), Some(stop)) = (position.highest_price, position.current_stop) else {
            continue;
        };

        // Entry-day bar: the initial stop can trigger, but the bar's high
        // (which includes the fill itself) never ratchets the stop.
        if position.entry_date == Some(ctx.day) {
            if bar.low <= stop {
                let shares = position.shares.unwrap_or(0);
                position.status = PositionStatus::Closed;
                position.exit_date = Some(ctx.day);
                position.exit_price = Some(stop);
                position.exit_reason = Some(ExitReason::StopHit);
                position.realized_pnl = Some(position.calculate_pnl(stop));
                position.return_pct = Some(position.calculate_return_pct(stop));
                *cash += (stop * Decimal::from(shares)).round_dp(2);
                closed.push(json!({
                    "symbol": position.symbol,
                    "reason": ExitReason::StopHit.as_str(),
                }));
            }
            continue;
        }

        let trailing = FixedPercentTrailingStop::new(position.trailing_stop_pct)?;
        let update = trailing.update(bar.high, bar.low, highest, stop);

        if update.triggered {
            let exit_price = update.trigger_price.unwrap_or(update.stop_price);
            let shares = position.shares.unwrap_or(0);
            position.status = PositionStatus::Closed;
            position.exit_date = Some(ctx.day);
            position.exit_price = Some(exit_price);
            position.exit_reason = Some(ExitReason::StopHit);
            position.realized_pnl = Some(position.calculate_pnl(exit_price));
            position.return_pct = Some(position.calculate_return_pct(exit_price));
            position.highest_price = Some(update.highest_price);
            position.current_stop = Some(update.stop_price);
            *cash += (exit_price * Decimal::from(shares)).round_dp(2);
            closed.push(json!({
                "symbol": position.symbol,
                "reason": ExitReason::StopHit.as_str(),
            }));
        } else {
            position.highest_price = Some(update.highest_price);
            position.current_stop = Some(update.stop_price);
        }
    }
    Ok(())
}

/// Step C: evaluate the agent for every symbol without an active position,
/// then admit BUY candidates through the selector and the cash budget.
fn evaluate_signals(
    ctx: &DayContext<'_>,
    positions: &mut Vec<ArenaPosition>,
    cash: Decimal,
) -> Result<serde_json::Map<String, serde_json::Value>> {
    let mut decisions = serde_json::Map::new();
    let mut candidates: Vec<QualifyingSignal> = Vec::new();
    let mut candidate_meta: HashMap<String, (Option<i32>, Option<String>)> = HashMap::new();

    let active: std::collections::HashSet<&str> = positions
        .iter()
        .filter(|p| p.status != PositionStatus::Closed)
        .map(|p| p.symbol.as_str())
        .collect();

    let lookback = ctx.agent.required_lookback_days();
    for symbol in ctx.symbols {
        if active.contains(symbol.as_str()) {
            continue;
        }

        let history = ctx.bars.history_through(symbol, ctx.day);
        let tail = &history[history.len().saturating_sub(lookback + 1)..];
        let decision = ctx.agent.evaluate(symbol, tail, ctx.day, false);

        decisions.insert(
            symbol.clone(),
            json!({
                "action": decision.action.as_str(),
                "score": decision.score,
                "reasoning": decision.reasoning,
            }),
        );

        if decision.action == AgentAction::Buy {
            candidates.push(QualifyingSignal {
                symbol: symbol.clone(),
                score: decision.score.unwrap_or(0),
                sector: ctx.sector_by_symbol.get(symbol).cloned(),
                atr_pct: atr_pct(tail),
            });
            candidate_meta.insert(symbol.clone(), (decision.score, decision.reasoning));
        }
    }

    if candidates.is_empty() {
        return Ok(decisions);
    }

    let admitted = match ctx.selector {
        Some(selector) => {
            let mut sector_counts: HashMap<String, usize> = HashMap::new();
            for position in positions.iter().filter(|p| p.is_open()) {
                if let Some(sector) = ctx.sector_by_symbol.get(&position.symbol) {
                    *sector_counts.entry(sector.clone()).or_insert(0) += 1;
                }
            }
            let open_count = positions.iter().filter(|p| p.is_open()).count();
            selector.select(
                &candidates,
                &sector_counts,
                open_count,
                ctx.max_per_sector,
                ctx.max_open_positions,
            )
        }
        None => candidates,
    };

    // Cash budget: commitments already pending reserve one position size
    // each; skip candidates the remaining budget cannot fund.
    let pending_count = positions
        .iter()
        .filter(|p| p.status == PositionStatus::Pending)
        .count();
    let mut available = cash - ctx.position_size * Decimal::from(pending_count as i64);

    for signal in admitted {
        if available < ctx.position_size {
            continue;
        }
        available -= ctx.position_size;
        let (score, reasoning) = candidate_meta
            .remove(&signal.symbol)
            .unwrap_or((Some(signal.score), None));
        positions.push(ArenaPosition::pending(
            ctx.simulation_id,
            signal.symbol,
            ctx.day,
            ctx.trailing_stop_pct,
            score,
            reasoning,
        ));
    }

    Ok(decisions)
}

/// Step D: end-of-day snapshot. Open positions with a missing bar are
/// skipped in the valuation.
fn build_snapshot(
    ctx: &DayContext<'_>,
    positions: &[ArenaPosition],
    cash: Decimal,
    signals: &serde_json::Map<String, serde_json::Value>,
    opened: &[String],
    closed: &[serde_json::Value],
) -> SnapshotDraft {
    let mut positions_value = Decimal::ZERO;
    let mut open_count = 0;
    for position in positions.iter().filter(|p| p.is_open()) {
        open_count += 1;
        if let (Some(bar), Some(shares)) =
            (ctx.bars.bar_on(&position.symbol, ctx.day), position.shares)
        {
            positions_value += bar.close * Decimal::from(shares);
        }
    }
    let positions_value = positions_value.round_dp(2);

    let total_equity = (cash + positions_value).round_dp(2);
    let daily_pnl = (total_equity - ctx.prev_equity).round_dp(2);
    let daily_return_pct = if ctx.prev_equity > Decimal::ZERO {
        (daily_pnl / ctx.prev_equity * Decimal::ONE_HUNDRED).round_dp(4)
    } else {
        Decimal::ZERO
    };
    let cumulative_return_pct = if ctx.initial_capital > Decimal::ZERO {
        ((total_equity / ctx.initial_capital - Decimal::ONE) * Decimal::ONE_HUNDRED).round_dp(4)
    } else {
        Decimal::ZERO
    };

    SnapshotDraft {
        snapshot_date: ctx.day,
        day_number: ctx.day_number,
        cash,
        positions_value,
        total_equity,
        daily_pnl,
        daily_return_pct,
        cumulative_return_pct,
        open_position_count: open_count,
        decisions: json!({
            "signals": signals,
            "opened": opened,
            "closed": closed,
        }),
    }
}

/// Step E helper: force-close every open position at the day's close (or
/// the last known close when the final bar is missing).
pub fn close_remaining_open(
    positions: &mut [ArenaPosition],
    day: NaiveDate,
    bars: &BarSeries,
    cash: &mut Decimal,
) {
    for position in positions.iter_mut().filter(|p| p.is_open()) {
        let exit_price = bars
            .bar_on(&position.symbol, day)
            .map(|bar| bar.close)
            .or_else(|| bars.last_close_on_or_before(&position.symbol, day))
            .or(position.entry_price)
            .unwrap_or(Decimal::ZERO);

        let shares = position.shares.unwrap_or(0);
        position.status = PositionStatus::Closed;
        position.exit_date = Some(day);
        position.exit_price = Some(exit_price);
        position.exit_reason = Some(ExitReason::SimulationEnd);
        position.realized_pnl = Some(position.calculate_pnl(exit_price));
        position.return_pct = Some(position.calculate_return_pct(exit_price));
        *cash += (exit_price * Decimal::from(shares)).round_dp(2);
    }
}

fn atr_pct(bars: &[PriceBar]) -> Option<f64> {
    if bars.is_empty() {
        return None;
    }
    let highs: Vec<f64> = bars.iter().map(|b| b.high.to_f64().unwrap_or(0.0)).collect();
    let lows: Vec<f64> = bars.iter().map(|b| b.low.to_f64().unwrap_or(0.0)).collect();
    let closes: Vec<f64> = bars.iter().map(|b| b.close.to_f64().unwrap_or(0.0)).collect();
    let atr = average_true_range(&highs, &lows, &closes, 14);
    let last_close = *closes.last()?;
    atr.last()
        .filter(|v| !v.is_nan() && last_close > 0.0)
        .map(|v| v / last_close * 100.0)
}
