//! Simulation engine service: orchestrates initialisation and day steps
//! against the price cache and the arena tables.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use sqlx::PgPool;

use super::analytics::compute_completion;
use super::repo::{self, DayPersist};
use super::sim::{close_remaining_open, run_day, BarSeries, DayContext};
use super::types::{AgentConfig, ArenaSimulation, PositionStatus};
use crate::agents::selector::{get_selector, PortfolioSelector};
use crate::agents::build_agent;
use crate::calendar::trading_days_in_range;
use crate::data::cache::MarketDataCache;
use crate::data::{Interval, PriceDataRequest};
use crate::error::{Error, Result};

/// Extra civil days fetched ahead of the start date so the agent's trading-
/// day lookback is covered across weekends and holidays.
const LOOKBACK_CIVIL_FACTOR: f64 = 1.5;

pub struct SimulationEngine {
    pool: PgPool,
    cache: Arc<MarketDataCache>,
    max_concurrent_fetches: usize,
}

impl SimulationEngine {
    pub fn new(pool: PgPool, cache: Arc<MarketDataCache>, max_concurrent_fetches: usize) -> Self {
        Self {
            pool,
            cache,
            max_concurrent_fetches: max_concurrent_fetches.max(1),
        }
    }

    /// One-time setup: trading-day count, concurrent bar prefetch across
    /// the symbol universe, and sector metadata.
    pub async fn initialize_simulation(&self, simulation_id: i64) -> Result<()> {
        let sim = self.load(simulation_id).await?;
        let trading_days = trading_days_in_range(sim.start_date, sim.end_date);

        let config = AgentConfig::from_value(&sim.agent_config)?;
        let agent = build_agent(&sim.agent_type, &config)?;
        let lookback_civil =
            (agent.required_lookback_days() as f64 * LOOKBACK_CIVIL_FACTOR).ceil() as i64;
        let fetch_start = sim.start_date - Duration::days(lookback_civil);

        tracing::info!(
            simulation_id,
            total_days = trading_days.len(),
            symbols = sim.symbols.len(),
            "initializing simulation"
        );

        // Prefetch bars for every symbol with bounded concurrency. Symbols
        // that fail here are handled by the day loop's missing-bar rules.
        let results: Vec<(String, Result<()>)> = stream::iter(sim.symbols.clone())
            .map(|symbol| {
                let cache = self.cache.clone();
                let request = PriceDataRequest {
                    symbol: symbol.clone(),
                    start: day_start(fetch_start),
                    end: day_end(sim.end_date),
                    interval: Interval::Day1,
                    include_pre_post: false,
                };
                async move {
                    let outcome = cache.fetch_and_store(&request, false).await.map(|_| ());
                    (symbol, outcome)
                }
            })
            .buffer_unordered(self.max_concurrent_fetches)
            .collect()
            .await;

        for (symbol, result) in results {
            if let Err(e) = result {
                tracing::warn!(simulation_id, %symbol, error = %e, "prefetch failed");
            }
        }

        self.prefetch_sectors(&sim.symbols).await;

        repo::set_total_days(&self.pool, simulation_id, trading_days.len() as i32).await?;
        Ok(())
    }

    async fn prefetch_sectors(&self, symbols: &[String]) {
        for symbol in symbols {
            match self.cache.store().get_sector(symbol).await {
                Ok(Some(_)) => {}
                Ok(None) => match self.cache.provider().get_symbol_info(symbol).await {
                    Ok(info) => {
                        if let Err(e) = self.cache.store().upsert_sector(&info).await {
                            tracing::warn!(%symbol, error = %e, "sector upsert failed");
                        }
                    }
                    Err(e) => {
                        tracing::debug!(%symbol, error = %e, "sector lookup failed");
                    }
                },
                Err(e) => tracing::warn!(%symbol, error = %e, "sector read failed"),
            }
        }
    }

    /// Advance one trading day. Returns the committed day number, or None
    /// once the simulation has no further days (it is then `completed`).
    pub async fn step_day(&self, simulation_id: i64) -> Result<Option<i32>> {
        let sim = self.load(simulation_id).await?;
        if !sim.is_initialized() || sim.current_day >= sim.total_days {
            return Ok(None);
        }

        let trading_days = trading_days_in_range(sim.start_date, sim.end_date);
        if trading_days.len() != sim.total_days as usize {
            return Err(Error::validation(format!(
                "simulation {simulation_id}: trading-day count changed since initialization"
            )));
        }
        let day = trading_days[sim.current_day as usize];
        let prev_trading_day = (sim.current_day > 0)
            .then(|| trading_days[(sim.current_day - 1) as usize]);

        let config = AgentConfig::from_value(&sim.agent_config)?;
        let agent = build_agent(&sim.agent_type, &config)?;
        let selector: Option<&dyn PortfolioSelector> = match config.portfolio_strategy.as_deref() {
            Some(name) => Some(get_selector(name).ok_or_else(|| {
                Error::validation(format!("unknown portfolio strategy '{name}'"))
            })?),
            None => None,
        };

        // Resume state: cash and equity come from the last committed
        // snapshot, positions from the active set.
        let all_positions = repo::positions_for(&self.pool, simulation_id).await?;
        let (active, previously_closed): (Vec<_>, Vec<_>) = all_positions
            .into_iter()
            .partition(|p| p.status != PositionStatus::Closed);

        let last_snapshot = repo::last_snapshot(&self.pool, simulation_id).await?;
        let (cash, prev_equity) = match &last_snapshot {
            Some(snap) => (snap.cash, snap.total_equity),
            None => (sim.initial_capital, sim.initial_capital),
        };

        let bars = self
            .load_bars(&sim, day, agent.required_lookback_days())
            .await?;
        let sector_by_symbol = self.sector_map(&sim.symbols).await?;

        let ctx = DayContext {
            simulation_id,
            day,
            day_number: sim.current_day,
            prev_trading_day,
            cash,
            prev_equity,
            initial_capital: sim.initial_capital,
            position_size: sim.position_size,
            trailing_stop_pct: config.trailing_stop_pct,
            symbols: &sim.symbols,
            bars: &bars,
            agent: agent.as_ref(),
            selector,
            max_per_sector: config.max_per_sector,
            max_open_positions: config.max_open_positions,
            sector_by_symbol: &sector_by_symbol,
        };

        let mut outcome = run_day(&ctx, active)?;
        let new_current_day = sim.current_day + 1;
        let completing = new_current_day == sim.total_days;

        let completion = if completing {
            let mut cash_final = outcome.cash;
            close_remaining_open(&mut outcome.positions, day, &bars, &mut cash_final);

            let snapshots = repo::snapshots_for(&self.pool, simulation_id).await?;
            let mut equity_curve: Vec<Decimal> =
                snapshots.iter().map(|s| s.total_equity).collect();
            equity_curve.push(outcome.snapshot.total_equity);
            let mut daily_returns: Vec<Decimal> =
                snapshots.iter().map(|s| s.daily_return_pct).collect();
            daily_returns.push(outcome.snapshot.daily_return_pct);

            let mut closed = previously_closed;
            closed.extend(outcome.positions.iter().cloned());
            Some(compute_completion(
                sim.initial_capital,
                cash_final,
                &closed,
                &equity_curve,
                &daily_returns,
            ))
        } else {
            None
        };

        repo::persist_day(
            &self.pool,
            DayPersist {
                simulation_id,
                new_current_day,
                positions: &outcome.positions,
                snapshot: &outcome.snapshot,
                completion: completion.as_ref(),
            },
        )
        .await?;

        tracing::debug!(
            simulation_id,
            day = %day,
            day_number = sim.current_day,
            equity = %outcome.snapshot.total_equity,
            "day committed"
        );

        if completing {
            tracing::info!(simulation_id, "simulation completed");
            return Ok(None);
        }
        Ok(Some(sim.current_day))
    }

    async fn load(&self, simulation_id: i64) -> Result<ArenaSimulation> {
        repo::get_simulation(&self.pool, simulation_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("simulation {simulation_id} not found")))
    }

    /// Read bars for the day's window from the store. Initialisation
    /// prefetched the full range; missing bars surface as gaps which the
    /// day algorithm tolerates.
    async fn load_bars(
        &self,
        sim: &ArenaSimulation,
        day: NaiveDate,
        lookback: usize,
    ) -> Result<BarSeries> {
        let civil_lookback = (lookback as f64 * LOOKBACK_CIVIL_FACTOR).ceil() as i64;
        let start = day_start(day - Duration::days(civil_lookback));
        let end = day_end(day);

        let mut series = BarSeries::new();
        for symbol in &sim.symbols {
            let bars = self
                .cache
                .store()
                .bars_in_range(symbol, start, end, Interval::Day1)
                .await?;
            series.insert(symbol, bars);
        }
        Ok(series)
    }

    async fn sector_map(&self, symbols: &[String]) -> Result<HashMap<String, String>> {
        let mut map = HashMap::new();
        for symbol in symbols {
            if let Some(record) = self.cache.store().get_sector(symbol).await? {
                if let Some(etf) = record.sector_etf {
                    map.insert(symbol.clone(), etf);
                }
            }
        }
        Ok(map)
    }
}

fn day_start(date: NaiveDate) -> chrono::DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

fn day_end(date: NaiveDate) -> chrono::DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms_opt(23, 59, 59).unwrap())
}
