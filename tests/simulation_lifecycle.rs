//! Whole-simulation lifecycle tests over the pure day-step core.
//!
//! These drive `run_day` the same way the engine service does — load state,
//! step, persist — with an in-memory store standing in for the database, so
//! resume-from-checkpoint behaviour can be exercised by literally dropping
//! the in-flight state and rebuilding it from the "persisted" rows.

use std::collections::HashMap;

use chrono::{NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use trading_analyst::agents::{Agent, AgentAction, AgentDecision};
use trading_analyst::calendar::trading_days_in_range;
use trading_analyst::data::{Interval, PriceBar};
use trading_analyst::engine::analytics::compute_completion;
use trading_analyst::engine::sim::{
    close_remaining_open, run_day, BarSeries, DayContext, SnapshotDraft,
};
use trading_analyst::engine::types::{ArenaPosition, ExitReason, PositionStatus};

fn bar(symbol: &str, date: NaiveDate, o: f64, h: f64, l: f64, c: f64) -> PriceBar {
    PriceBar {
        symbol: symbol.into(),
        timestamp: Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap()),
        interval: Interval::Day1,
        open: dec4(o),
        high: dec4(h),
        low: dec4(l),
        close: dec4(c),
        volume: 1_000_000,
        adjusted_close: None,
        data_source: "mock".into(),
        last_fetched_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        is_validated: true,
    }
}

fn dec4(v: f64) -> Decimal {
    Decimal::from_f64_retain(v).unwrap().round_dp(4)
}

struct BuyOnceAgent {
    buy_day: NaiveDate,
}

impl Agent for BuyOnceAgent {
    fn name(&self) -> &'static str {
        "buy-once"
    }

    fn required_lookback_days(&self) -> usize {
        1
    }

    fn evaluate(
        &self,
        _symbol: &str,
        _history: &[PriceBar],
        current_date: NaiveDate,
        _has_open_position: bool,
    ) -> AgentDecision {
        if current_date == self.buy_day {
            AgentDecision {
                action: AgentAction::Buy,
                score: Some(80),
                reasoning: Some("test signal".into()),
            }
        } else {
            AgentDecision::no_signal()
        }
    }
}

struct NeverAgent;

impl Agent for NeverAgent {
    fn name(&self) -> &'static str {
        "never"
    }

    fn required_lookback_days(&self) -> usize {
        1
    }

    fn evaluate(&self, _: &str, _: &[PriceBar], _: NaiveDate, _: bool) -> AgentDecision {
        AgentDecision::no_signal()
    }
}

/// The "database": everything a crash survives.
#[derive(Clone, Default)]
struct PersistedState {
    positions: Vec<ArenaPosition>,
    snapshots: Vec<SnapshotDraft>,
    current_day: i32,
}

struct SimRunner<'a> {
    symbols: Vec<String>,
    trading_days: Vec<NaiveDate>,
    bars: &'a BarSeries,
    agent: &'a dyn Agent,
    initial_capital: Decimal,
    position_size: Decimal,
    state: PersistedState,
    final_equity: Option<Decimal>,
}

impl<'a> SimRunner<'a> {
    fn new(
        symbols: &[&str],
        start: NaiveDate,
        end: NaiveDate,
        bars: &'a BarSeries,
        agent: &'a dyn Agent,
    ) -> Self {
        Self {
            symbols: symbols.iter().map(|s| (*s).to_string()).collect(),
            trading_days: trading_days_in_range(start, end),
            bars,
            agent,
            initial_capital: dec!(10000),
            position_size: dec!(1000),
            state: PersistedState::default(),
            final_equity: None,
        }
    }

    fn total_days(&self) -> i32 {
        self.trading_days.len() as i32
    }

    /// One `step_day`, loading everything from persisted state exactly like
    /// the engine service does.
    fn step(&mut self) -> bool {
        let day_number = self.state.current_day;
        if day_number >= self.total_days() {
            return false;
        }
        let day = self.trading_days[day_number as usize];
        let prev_trading_day =
            (day_number > 0).then(|| self.trading_days[(day_number - 1) as usize]);

        let (cash, prev_equity) = self
            .state
            .snapshots
            .last()
            .map_or((self.initial_capital, self.initial_capital), |snap| {
                (snap.cash, snap.total_equity)
            });

        let (active, closed): (Vec<_>, Vec<_>) = self
            .state
            .positions
            .clone()
            .into_iter()
            .partition(|p| p.status != PositionStatus::Closed);

        let sectors = HashMap::new();
        let ctx = DayContext {
            simulation_id: 1,
            day,
            day_number,
            prev_trading_day,
            cash,
            prev_equity,
            initial_capital: self.initial_capital,
            position_size: self.position_size,
            trailing_stop_pct: dec!(5),
            symbols: &self.symbols,
            bars: self.bars,
            agent: self.agent,
            selector: None,
            max_per_sector: None,
            max_open_positions: None,
            sector_by_symbol: &sectors,
        };

        let mut outcome = run_day(&ctx, active).unwrap();

        let completing = day_number + 1 == self.total_days();
        if completing {
            let mut cash_final = outcome.cash;
            close_remaining_open(&mut outcome.positions, day, self.bars, &mut cash_final);
            self.final_equity = Some(cash_final);
        }

        // "Commit": replace active rows, append the snapshot, advance.
        self.state.positions = closed;
        self.state.positions.extend(outcome.positions);
        self.state.snapshots.push(outcome.snapshot);
        self.state.current_day += 1;
        !completing
    }

    fn run_to_completion(&mut self) {
        while self.step() {}
    }
}

fn winning_trade_bars() -> (BarSeries, NaiveDate, NaiveDate) {
    // Jan 2..5 2024 is Tue..Fri.
    let d = |day| NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
    let mut bars = BarSeries::new();
    bars.insert(
        "AAPL",
        vec![
            bar("AAPL", d(2), 99.0, 101.0, 98.0, 100.0),
            bar("AAPL", d(3), 100.0, 110.0, 99.0, 108.0),
            bar("AAPL", d(4), 108.0, 112.0, 103.0, 110.0),
            bar("AAPL", d(5), 110.0, 110.0, 100.0, 101.0),
        ],
    );
    (bars, d(2), d(5))
}

#[test]
fn quiet_close_scenario() {
    let (bars, start, end) = winning_trade_bars();
    let agent = NeverAgent;
    let mut runner = SimRunner::new(&["AAPL"], start, end, &bars, &agent);
    runner.run_to_completion();

    assert_eq!(runner.total_days(), 4);
    assert_eq!(runner.state.snapshots.len(), 4);
    assert!(runner.state.positions.is_empty());
    assert_eq!(runner.final_equity, Some(dec!(10000.00)));
    let last = runner.state.snapshots.last().unwrap();
    assert_eq!(last.cumulative_return_pct, dec!(0.0000));
}

#[test]
fn single_winning_trade_scenario() {
    let (bars, start, end) = winning_trade_bars();
    let agent = BuyOnceAgent { buy_day: start };
    let mut runner = SimRunner::new(&["AAPL"], start, end, &bars, &agent);
    runner.run_to_completion();

    let trades: Vec<_> = runner
        .state
        .positions
        .iter()
        .filter(|p| p.is_closed() && p.shares.unwrap_or(0) > 0)
        .collect();
    assert_eq!(trades.len(), 1);
    let trade = trades[0];
    assert_eq!(trade.entry_price, Some(dec!(100.0000)));
    assert_eq!(trade.shares, Some(10));
    assert_eq!(trade.exit_price, Some(dec!(106.4000)));
    assert_eq!(trade.exit_reason, Some(ExitReason::StopHit));
    assert_eq!(trade.realized_pnl, Some(dec!(64.00)));

    let stats = compute_completion(
        dec!(10000),
        runner.final_equity.unwrap(),
        &runner.state.positions,
        &runner
            .state
            .snapshots
            .iter()
            .map(|s| s.total_equity)
            .collect::<Vec<_>>(),
        &runner
            .state
            .snapshots
            .iter()
            .map(|s| s.daily_return_pct)
            .collect::<Vec<_>>(),
    );
    assert_eq!(stats.total_trades, 1);
    assert_eq!(stats.winning_trades, 1);
    assert_eq!(stats.final_equity, dec!(10064.00));
    assert_eq!(stats.total_return_pct, dec!(0.6400));
    assert_eq!(stats.total_realized_pnl, dec!(64.00));
}

#[test]
fn stop_loss_scenario() {
    let d = |day| NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
    let mut bars = BarSeries::new();
    bars.insert(
        "AAPL",
        vec![
            bar("AAPL", d(2), 99.0, 101.0, 98.0, 100.0),
            bar("AAPL", d(3), 100.0, 100.0, 94.0, 95.0),
            bar("AAPL", d(4), 95.0, 96.0, 94.0, 95.0),
            bar("AAPL", d(5), 95.0, 96.0, 94.0, 95.0),
        ],
    );
    let agent = BuyOnceAgent { buy_day: d(2) };
    let mut runner = SimRunner::new(&["AAPL"], d(2), d(5), &bars, &agent);
    runner.run_to_completion();

    let trade = runner
        .state
        .positions
        .iter()
        .find(|p| p.shares.is_some())
        .unwrap();
    assert_eq!(trade.exit_reason, Some(ExitReason::StopHit));
    assert_eq!(trade.exit_date, Some(d(3)));
    assert_eq!(trade.realized_pnl, Some(dec!(-50.00)));
    assert_eq!(runner.final_equity, Some(dec!(9950.00)));
}

#[test]
fn resume_after_crash_matches_uninterrupted_run() {
    let (bars, start, end) = winning_trade_bars();
    let agent = BuyOnceAgent { buy_day: start };

    // Uninterrupted run.
    let mut straight = SimRunner::new(&["AAPL"], start, end, &bars, &agent);
    straight.run_to_completion();

    // Crashed run: worker dies after day 1 commits; a fresh worker picks
    // the simulation up from its persisted state.
    let mut crashed = SimRunner::new(&["AAPL"], start, end, &bars, &agent);
    crashed.step();
    crashed.step();
    let persisted = crashed.state.clone();
    drop(crashed);

    let mut resumed = SimRunner::new(&["AAPL"], start, end, &bars, &agent);
    resumed.state = persisted;
    resumed.run_to_completion();

    assert_eq!(resumed.final_equity, straight.final_equity);
    assert_eq!(
        resumed.state.snapshots.len(),
        straight.state.snapshots.len()
    );
    for (a, b) in resumed
        .state
        .snapshots
        .iter()
        .zip(&straight.state.snapshots)
    {
        assert_eq!(a.day_number, b.day_number);
        assert_eq!(a.snapshot_date, b.snapshot_date);
        assert_eq!(a.cash, b.cash);
        assert_eq!(a.total_equity, b.total_equity);
        assert_eq!(a.daily_pnl, b.daily_pnl);
        assert_eq!(a.open_position_count, b.open_position_count);
    }

    let trade = resumed
        .state
        .positions
        .iter()
        .find(|p| p.shares.is_some())
        .unwrap();
    assert_eq!(trade.exit_price, Some(dec!(106.4000)));
}

#[test]
fn snapshots_strictly_ordered_without_gaps() {
    let (bars, start, end) = winning_trade_bars();
    let agent = BuyOnceAgent { buy_day: start };
    let mut runner = SimRunner::new(&["AAPL"], start, end, &bars, &agent);
    runner.run_to_completion();

    let snapshots = &runner.state.snapshots;
    for (i, snap) in snapshots.iter().enumerate() {
        assert_eq!(snap.day_number, i as i32);
    }
    // Ordering by day_number and by snapshot_date agree.
    let mut by_date: Vec<_> = snapshots.iter().map(|s| s.snapshot_date).collect();
    by_date.sort();
    assert_eq!(
        by_date,
        snapshots.iter().map(|s| s.snapshot_date).collect::<Vec<_>>()
    );
}

#[test]
fn accounting_closure_at_completion() {
    let (bars, start, end) = winning_trade_bars();
    let agent = BuyOnceAgent { buy_day: start };
    let mut runner = SimRunner::new(&["AAPL"], start, end, &bars, &agent);
    runner.run_to_completion();

    // No opens remain, and final equity equals initial plus realized P&L.
    assert!(runner.state.positions.iter().all(|p| !p.is_open()));
    let realized: Decimal = runner
        .state
        .positions
        .iter()
        .filter_map(|p| p.realized_pnl)
        .sum();
    assert_eq!(runner.final_equity.unwrap(), dec!(10000) + realized);
}

#[test]
fn multi_symbol_portfolio_runs_independent_lifecycles() {
    let d = |day| NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
    let mut bars = BarSeries::new();
    // WIN trends up and survives; LOSE stops out immediately.
    bars.insert(
        "WIN",
        vec![
            bar("WIN", d(2), 50.0, 51.0, 49.0, 50.0),
            bar("WIN", d(3), 50.0, 52.0, 49.5, 51.5),
            bar("WIN", d(4), 51.5, 53.0, 51.0, 52.5),
            bar("WIN", d(5), 52.5, 54.0, 52.0, 53.5),
        ],
    );
    bars.insert(
        "LOSE",
        vec![
            bar("LOSE", d(2), 80.0, 81.0, 79.0, 80.0),
            bar("LOSE", d(3), 80.0, 80.0, 70.0, 71.0),
            bar("LOSE", d(4), 71.0, 72.0, 70.0, 71.0),
            bar("LOSE", d(5), 71.0, 72.0, 70.0, 71.0),
        ],
    );
    let agent = BuyOnceAgent { buy_day: d(2) };
    let mut runner = SimRunner::new(&["WIN", "LOSE"], d(2), d(5), &bars, &agent);
    runner.run_to_completion();

    let by_symbol: HashMap<&str, &ArenaPosition> = runner
        .state
        .positions
        .iter()
        .map(|p| (p.symbol.as_str(), p))
        .collect();

    let lose = by_symbol["LOSE"];
    assert_eq!(lose.exit_reason, Some(ExitReason::StopHit));
    assert_eq!(lose.exit_date, Some(d(3)));
    // 12 shares, entry 80, stop 76.
    assert_eq!(lose.realized_pnl, Some(dec!(-48.00)));

    let win = by_symbol["WIN"];
    assert_eq!(win.exit_reason, Some(ExitReason::SimulationEnd));
    assert_eq!(win.exit_date, Some(d(5)));
    assert_eq!(win.exit_price, Some(dec!(53.5000)));
    // 20 shares, entry 50: +70.
    assert_eq!(win.realized_pnl, Some(dec!(70.00)));
}
