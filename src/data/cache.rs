//! Two-tier market data cache.
//!
//! L1 is a bounded in-memory TTL map, L2 is the price store judged by
//! `last_fetched_at`. The freshness decision is market-aware: requests for
//! completed trading days never refetch, requests during the session expire
//! on a short TTL, and gaps refetch incrementally from the last cached bar
//! (the overlap is harmless because writes are idempotent upserts).

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::America::New_York;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;

use super::store::{PriceStore, SyncStats};
use super::{Interval, MarketDataProvider, PriceBar, PriceDataRequest, TtlClass};
use crate::calendar::{
    first_trading_day_on_or_after, last_complete_trading_day, last_trading_day_on_or_before,
    market_status, next_trading_day, MarketStatus,
};
use crate::config::Settings;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheHitType {
    L1Hit,
    L2Hit,
    Miss,
}

#[derive(Debug, Clone, Copy)]
pub struct TtlConfig {
    pub daily: u64,
    pub hourly: u64,
    pub intraday: u64,
    pub market_hours_ttl: u64,
    pub l1_ttl: u64,
    pub l1_size: usize,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            daily: 86_400,
            hourly: 3_600,
            intraday: 300,
            market_hours_ttl: 300,
            l1_ttl: 30,
            l1_size: 200,
        }
    }
}

impl From<&Settings> for TtlConfig {
    fn from(s: &Settings) -> Self {
        Self {
            daily: s.cache_ttl_daily,
            hourly: s.cache_ttl_hourly,
            intraday: s.cache_ttl_intraday,
            market_hours_ttl: s.market_hours_ttl,
            l1_ttl: s.cache_l1_ttl,
            l1_size: s.cache_l1_size,
        }
    }
}

impl TtlConfig {
    fn ttl_for(&self, interval: Interval) -> u64 {
        match interval.ttl_class() {
            TtlClass::Intraday => self.intraday,
            TtlClass::Hourly => self.hourly,
            TtlClass::Daily => self.daily,
        }
    }
}

/// Outcome of the market-aware freshness check. Total: every input yields a
/// well-formed result, anomalies force a refetch instead of failing.
#[derive(Debug, Clone)]
pub struct FreshnessResult {
    pub is_fresh: bool,
    pub reason: String,
    pub market_status: MarketStatus,
    pub recommended_ttl: u64,
    pub last_data_date: Option<NaiveDate>,
    pub last_complete_trading_day: NaiveDate,
    pub needs_fetch: bool,
    pub fetch_start_date: Option<NaiveDate>,
}

/// Market-aware freshness decision over cached coverage metadata.
///
/// `rows` is (bar date, last_fetched_at) per cached bar in the requested
/// range, ascending. Pure: all clock and calendar context comes in through
/// the arguments.
pub fn evaluate_freshness(
    now: DateTime<Utc>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    rows: &[(NaiveDate, DateTime<Utc>)],
    ttl: &TtlConfig,
) -> FreshnessResult {
    let today = now.with_timezone(&New_York).date_naive();
    let requested_end = end.with_timezone(&New_York).date_naive();
    let is_historical = requested_end < today;

    let (status, last_complete) = if is_historical {
        // Historical request: anchor completeness to the requested end.
        (
            MarketStatus::Closed,
            last_trading_day_on_or_before(requested_end),
        )
    } else {
        (market_status(now), last_complete_trading_day(now))
    };

    let requested_start = start.date_naive();

    let Some((&(first_data, _), &(last_data, _))) = rows.first().zip(rows.last()) else {
        return FreshnessResult {
            is_fresh: false,
            reason: "no cached data".into(),
            market_status: status,
            recommended_ttl: 0,
            last_data_date: None,
            last_complete_trading_day: last_complete,
            needs_fetch: true,
            fetch_start_date: Some(requested_start),
        };
    };

    // Front gap: cache must cover the start of the range. Requests starting
    // on a weekend/holiday are normalised forward before the comparison.
    let normalized_start = first_trading_day_on_or_after(requested_start);
    if first_data > normalized_start {
        return FreshnessResult {
            is_fresh: false,
            reason: format!(
                "cache missing data before {first_data} (requested {requested_start}, first trading day {normalized_start})"
            ),
            market_status: status,
            recommended_ttl: 0,
            last_data_date: Some(last_data),
            last_complete_trading_day: last_complete,
            needs_fetch: true,
            fetch_start_date: Some(requested_start),
        };
    }

    if is_historical {
        return if last_data >= last_complete {
            FreshnessResult {
                is_fresh: true,
                reason: format!("historical data covers requested range (up to {last_data})"),
                market_status: status,
                recommended_ttl: ttl.daily,
                last_data_date: Some(last_data),
                last_complete_trading_day: last_complete,
                needs_fetch: false,
                fetch_start_date: None,
            }
        } else {
            FreshnessResult {
                is_fresh: false,
                reason: format!(
                    "historical data missing from {} to {last_complete}",
                    next_trading_day(last_data)
                ),
                market_status: status,
                recommended_ttl: 0,
                last_data_date: Some(last_data),
                last_complete_trading_day: last_complete,
                // Refetch from the last cached bar: the overlap is idempotent.
                needs_fetch: true,
                fetch_start_date: Some(last_data),
            }
        };
    }

    if status == MarketStatus::MarketOpen {
        if last_data < today {
            return FreshnessResult {
                is_fresh: false,
                reason: "missing today's intraday data".into(),
                market_status: status,
                recommended_ttl: ttl.market_hours_ttl,
                last_data_date: Some(last_data),
                last_complete_trading_day: last_complete,
                needs_fetch: true,
                fetch_start_date: Some(last_data),
            };
        }

        let latest_fetch = rows.iter().map(|(_, f)| *f).max().unwrap_or(now);
        let threshold = now - chrono::Duration::seconds(ttl.market_hours_ttl as i64);
        return if latest_fetch >= threshold {
            FreshnessResult {
                is_fresh: true,
                reason: "data fresh within market-hours TTL".into(),
                market_status: status,
                recommended_ttl: ttl.market_hours_ttl,
                last_data_date: Some(last_data),
                last_complete_trading_day: last_complete,
                needs_fetch: false,
                fetch_start_date: None,
            }
        } else {
            FreshnessResult {
                is_fresh: false,
                reason: "TTL expired during market hours".into(),
                market_status: status,
                recommended_ttl: ttl.market_hours_ttl,
                last_data_date: Some(last_data),
                last_complete_trading_day: last_complete,
                needs_fetch: true,
                fetch_start_date: Some(last_data),
            }
        };
    }

    // Pre-market, after-hours or closed: fresh when the cache covers every
    // completed trading day.
    if last_data >= last_complete {
        FreshnessResult {
            is_fresh: true,
            reason: format!("data covers up to last complete trading day ({last_complete})"),
            market_status: status,
            recommended_ttl: ttl.daily,
            last_data_date: Some(last_data),
            last_complete_trading_day: last_complete,
            needs_fetch: false,
            fetch_start_date: None,
        }
    } else {
        FreshnessResult {
            is_fresh: false,
            reason: format!(
                "missing data from {} to {last_complete}",
                next_trading_day(last_data)
            ),
            market_status: status,
            recommended_ttl: 0,
            last_data_date: Some(last_data),
            last_complete_trading_day: last_complete,
            needs_fetch: true,
            fetch_start_date: Some(last_data),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FetchOutcome {
    pub stats: SyncStats,
    pub cache_hit: bool,
    pub hit_type: Option<CacheHitType>,
    pub market_status: Option<MarketStatus>,
}

struct L1Entry {
    bars: Arc<Vec<PriceBar>>,
    inserted_at: Instant,
}

/// Two-tier cache plus fetch coordination. Process-wide singleton, created
/// at startup and passed explicitly to consumers.
pub struct MarketDataCache {
    store: PriceStore,
    provider: Arc<dyn MarketDataProvider>,
    ttl: TtlConfig,
    l1: DashMap<String, L1Entry>,
    // Per-cache-key fetch locks. Map mutation is guarded by the map's own
    // locking; the per-key mutex serialises the provider critical section.
    // Entries are cheap and the keyspace is small, so the map is unbounded.
    fetch_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl MarketDataCache {
    pub fn new(store: PriceStore, provider: Arc<dyn MarketDataProvider>, ttl: TtlConfig) -> Self {
        tracing::info!(
            l1_size = ttl.l1_size,
            l1_ttl = ttl.l1_ttl,
            "market data cache initialized"
        );
        Self {
            store,
            provider,
            ttl,
            l1: DashMap::new(),
            fetch_locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &PriceStore {
        &self.store
    }

    pub fn provider(&self) -> &Arc<dyn MarketDataProvider> {
        &self.provider
    }

    fn l1_key(request: &PriceDataRequest) -> String {
        format!(
            "{}:{}:{}:{}",
            request.symbol,
            request.interval,
            request.start.date_naive(),
            request.end.date_naive()
        )
    }

    /// Read-through get: L1, then L2 with interval-class TTL validation.
    pub async fn get(
        &self,
        request: &PriceDataRequest,
    ) -> Result<(Option<Arc<Vec<PriceBar>>>, CacheHitType)> {
        let key = Self::l1_key(request);
        let l1_ttl = Duration::from_secs(self.ttl.l1_ttl);

        if let Some(entry) = self.l1.get(&key) {
            if entry.inserted_at.elapsed() < l1_ttl {
                tracing::debug!(%key, "L1 cache hit");
                return Ok((Some(entry.bars.clone()), CacheHitType::L1Hit));
            }
            drop(entry);
            self.l1.remove(&key);
        }

        let bars = self
            .store
            .bars_in_range(request.symbol.as_str(), request.start, request.end, request.interval)
            .await?;

        if !bars.is_empty() {
            let ttl = chrono::Duration::seconds(self.ttl.ttl_for(request.interval) as i64);
            let latest_fetch = bars.iter().map(|b| b.last_fetched_at).max();
            if latest_fetch.is_some_and(|f| f >= Utc::now() - ttl) {
                let bars = Arc::new(bars);
                self.l1_insert(key.clone(), bars.clone());
                tracing::debug!(%key, "L2 cache hit");
                return Ok((Some(bars), CacheHitType::L2Hit));
            }
        }

        tracing::debug!(%key, "cache miss");
        Ok((None, CacheHitType::Miss))
    }

    fn l1_insert(&self, key: String, bars: Arc<Vec<PriceBar>>) {
        // Evict expired entries first, then the oldest, to stay bounded.
        if self.l1.len() >= self.ttl.l1_size {
            let l1_ttl = Duration::from_secs(self.ttl.l1_ttl);
            self.l1.retain(|_, entry| entry.inserted_at.elapsed() < l1_ttl);
        }
        while self.l1.len() >= self.ttl.l1_size {
            let oldest = self
                .l1
                .iter()
                .min_by_key(|entry| entry.value().inserted_at)
                .map(|entry| entry.key().clone());
            match oldest {
                Some(key) => {
                    self.l1.remove(&key);
                }
                None => break,
            }
        }
        self.l1.insert(
            key,
            L1Entry {
                bars,
                inserted_at: Instant::now(),
            },
        );
    }

    pub async fn check_freshness_smart(
        &self,
        request: &PriceDataRequest,
    ) -> Result<FreshnessResult> {
        let rows = self
            .store
            .coverage(request.symbol.as_str(), request.start, request.end, request.interval)
            .await?;
        Ok(evaluate_freshness(
            Utc::now(),
            request.start,
            request.end,
            &rows,
            &self.ttl,
        ))
    }

    /// Fetch with market-aware cache logic and store in the database.
    ///
    /// At most one provider call runs per cache key: stale requests race for
    /// the key's mutex, and the freshness check is repeated inside the
    /// critical section so waiters observe the winner's fill and return
    /// without a second fetch.
    pub async fn fetch_and_store(
        &self,
        request: &PriceDataRequest,
        force_refresh: bool,
    ) -> Result<FetchOutcome> {
        let key = Self::l1_key(request);

        let mut fetch_start = request.start;
        if !force_refresh {
            let freshness = self.check_freshness_smart(request).await?;
            if freshness.is_fresh {
                tracing::info!(
                    symbol = %request.symbol,
                    reason = %freshness.reason,
                    market = freshness.market_status.as_str(),
                    "smart cache hit"
                );
                let (_, hit_type) = self.get(request).await?;
                return Ok(FetchOutcome {
                    stats: SyncStats::default(),
                    cache_hit: true,
                    hit_type: Some(hit_type),
                    market_status: Some(freshness.market_status),
                });
            }
            fetch_start = incremental_start(request.start, freshness.fetch_start_date);
        }

        let lock = self
            .fetch_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Double-checked: another task may have filled the cache while we
        // waited on the mutex.
        if !force_refresh {
            let freshness = self.check_freshness_smart(request).await?;
            if freshness.is_fresh {
                tracing::info!(
                    symbol = %request.symbol,
                    reason = %freshness.reason,
                    "smart cache hit after lock"
                );
                let (_, hit_type) = self.get(request).await?;
                return Ok(FetchOutcome {
                    stats: SyncStats::default(),
                    cache_hit: true,
                    hit_type: Some(hit_type),
                    market_status: Some(freshness.market_status),
                });
            }
            fetch_start = incremental_start(request.start, freshness.fetch_start_date);
        }

        let provider_request = PriceDataRequest {
            start: fetch_start,
            ..request.clone()
        };
        let bars = self.provider.fetch_price_data(&provider_request).await?;

        let stats = self
            .store
            .upsert_bars(request.symbol.as_str(), &bars, request.interval)
            .await?;

        self.l1_insert(key, Arc::new(bars));
        self.store
            .update_last_fetched_at(request.symbol.as_str(), request.start, request.end, request.interval)
            .await?;

        tracing::info!(
            symbol = %request.symbol,
            inserted = stats.inserted,
            updated = stats.updated,
            "fetched and stored price data"
        );

        Ok(FetchOutcome {
            stats,
            cache_hit: false,
            hit_type: None,
            market_status: None,
        })
    }

    /// Cache-first read: fill if stale, then return the stored range.
    pub async fn get_price_data(
        &self,
        request: &PriceDataRequest,
        force_refresh: bool,
    ) -> Result<Vec<PriceBar>> {
        self.fetch_and_store(request, force_refresh).await?;
        self.store
            .bars_in_range(request.symbol.as_str(), request.start, request.end, request.interval)
            .await
    }
}

/// Incremental fetches start at the freshness evaluator's recommendation
/// when it is later than the requested start.
fn incremental_start(start: DateTime<Utc>, fetch_start_date: Option<NaiveDate>) -> DateTime<Utc> {
    match fetch_start_date {
        Some(date) if date > start.date_naive() => Utc
            .from_utc_datetime(&date.and_time(NaiveTime::MIN)),
        _ => start,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn ttl() -> TtlConfig {
        TtlConfig::default()
    }

    // Coverage rows for consecutive trading days, all fetched at `fetched`.
    fn rows(days: &[NaiveDate], fetched: DateTime<Utc>) -> Vec<(NaiveDate, DateTime<Utc>)> {
        days.iter().map(|d| (*d, fetched)).collect()
    }

    #[test]
    fn no_cached_data_needs_full_fetch() {
        let result = evaluate_freshness(
            utc(2024, 12, 7, 16, 0), // Saturday
            utc(2024, 12, 2, 0, 0),
            utc(2024, 12, 6, 0, 0),
            &[],
            &ttl(),
        );
        assert!(!result.is_fresh);
        assert!(result.needs_fetch);
        assert_eq!(result.fetch_start_date, Some(date(2024, 12, 2)));
        assert_eq!(result.last_data_date, None);
    }

    #[test]
    fn front_gap_forces_refetch_from_requested_start() {
        // Cache starts Wednesday but the request starts Monday.
        let fetched = utc(2024, 12, 6, 22, 0);
        let result = evaluate_freshness(
            utc(2024, 12, 7, 16, 0),
            utc(2024, 12, 2, 0, 0),
            utc(2024, 12, 6, 0, 0),
            &rows(&[date(2024, 12, 4), date(2024, 12, 5), date(2024, 12, 6)], fetched),
            &ttl(),
        );
        assert!(!result.is_fresh);
        assert_eq!(result.fetch_start_date, Some(date(2024, 12, 2)));
    }

    #[test]
    fn front_gap_normalises_weekend_start() {
        // Request starts Saturday; cache starting Monday is complete.
        let fetched = utc(2024, 12, 13, 22, 0);
        let result = evaluate_freshness(
            utc(2024, 12, 14, 16, 0), // Saturday after
            utc(2024, 12, 7, 0, 0),   // Saturday start
            utc(2024, 12, 13, 0, 0),
            &rows(
                &[
                    date(2024, 12, 9),
                    date(2024, 12, 10),
                    date(2024, 12, 11),
                    date(2024, 12, 12),
                    date(2024, 12, 13),
                ],
                fetched,
            ),
            &ttl(),
        );
        assert!(result.is_fresh);
    }

    #[test]
    fn historical_request_fresh_when_covered() {
        // Requested end (Dec 6) is before "today" (Dec 20): historical.
        let fetched = utc(2024, 12, 6, 22, 0);
        let result = evaluate_freshness(
            utc(2024, 12, 20, 15, 0),
            utc(2024, 12, 2, 0, 0),
            utc(2024, 12, 6, 21, 0),
            &rows(
                &[
                    date(2024, 12, 2),
                    date(2024, 12, 3),
                    date(2024, 12, 4),
                    date(2024, 12, 5),
                    date(2024, 12, 6),
                ],
                fetched,
            ),
            &ttl(),
        );
        assert!(result.is_fresh);
        assert!(!result.needs_fetch);
        assert_eq!(result.market_status, MarketStatus::Closed);
        assert_eq!(result.last_complete_trading_day, date(2024, 12, 6));
    }

    #[test]
    fn historical_request_refetches_tail_gap() {
        let fetched = utc(2024, 12, 4, 22, 0);
        let result = evaluate_freshness(
            utc(2024, 12, 20, 15, 0),
            utc(2024, 12, 2, 0, 0),
            utc(2024, 12, 6, 0, 0),
            &rows(&[date(2024, 12, 2), date(2024, 12, 3), date(2024, 12, 4)], fetched),
            &ttl(),
        );
        assert!(!result.is_fresh);
        // Overlap fetch from the last cached bar.
        assert_eq!(result.fetch_start_date, Some(date(2024, 12, 4)));
    }

    #[test]
    fn historical_end_anchors_to_preceding_trading_day() {
        // Requested end is a Saturday; completeness anchors to Friday.
        let fetched = utc(2024, 12, 6, 22, 0);
        let result = evaluate_freshness(
            utc(2024, 12, 20, 15, 0),
            utc(2024, 12, 2, 0, 0),
            utc(2024, 12, 7, 0, 0),
            &rows(
                &[
                    date(2024, 12, 2),
                    date(2024, 12, 3),
                    date(2024, 12, 4),
                    date(2024, 12, 5),
                    date(2024, 12, 6),
                ],
                fetched,
            ),
            &ttl(),
        );
        assert!(result.is_fresh);
        assert_eq!(result.last_complete_trading_day, date(2024, 12, 6));
    }

    #[test]
    fn market_open_missing_today_refetches() {
        // Tuesday Dec 3, 12:00 ET, cache ends Monday.
        let fetched = utc(2024, 12, 2, 22, 0);
        let now = utc(2024, 12, 3, 17, 0);
        let result = evaluate_freshness(
            now,
            utc(2024, 11, 25, 0, 0),
            now,
            &rows(&[date(2024, 11, 29), date(2024, 12, 2)], fetched),
            &ttl(),
        );
        assert!(!result.is_fresh);
        assert_eq!(result.market_status, MarketStatus::MarketOpen);
        assert_eq!(result.reason, "missing today's intraday data");
        assert_eq!(result.fetch_start_date, Some(date(2024, 12, 2)));
    }

    #[test]
    fn market_open_within_ttl_is_fresh() {
        let now = utc(2024, 12, 3, 17, 0);
        let fetched = now - chrono::Duration::seconds(60);
        let result = evaluate_freshness(
            now,
            utc(2024, 11, 25, 0, 0),
            now,
            &rows(&[date(2024, 12, 2), date(2024, 12, 3)], fetched),
            &ttl(),
        );
        assert!(result.is_fresh);
        assert_eq!(result.recommended_ttl, ttl().market_hours_ttl);
    }

    #[test]
    fn market_open_expired_ttl_refetches() {
        let now = utc(2024, 12, 3, 17, 0);
        let fetched = now - chrono::Duration::seconds(600);
        let result = evaluate_freshness(
            now,
            utc(2024, 11, 25, 0, 0),
            now,
            &rows(&[date(2024, 12, 2), date(2024, 12, 3)], fetched),
            &ttl(),
        );
        assert!(!result.is_fresh);
        assert_eq!(result.reason, "TTL expired during market hours");
        assert_eq!(result.fetch_start_date, Some(date(2024, 12, 3)));
    }

    #[test]
    fn after_hours_fresh_when_covering_today() {
        // Tuesday 17:00 ET: today is the last complete trading day.
        let now = utc(2024, 12, 3, 22, 30);
        let fetched = now - chrono::Duration::hours(2);
        let result = evaluate_freshness(
            now,
            utc(2024, 11, 25, 0, 0),
            now,
            &rows(&[date(2024, 12, 2), date(2024, 12, 3)], fetched),
            &ttl(),
        );
        assert!(result.is_fresh);
        assert_eq!(result.market_status, MarketStatus::AfterHours);
    }

    #[test]
    fn pre_market_stale_when_missing_previous_day() {
        // Tuesday 08:00 ET, cache ends Friday: Monday is missing.
        let now = utc(2024, 12, 3, 13, 0);
        let fetched = utc(2024, 11, 29, 22, 0);
        let result = evaluate_freshness(
            now,
            utc(2024, 11, 25, 0, 0),
            now,
            &rows(&[date(2024, 11, 29)], fetched),
            &ttl(),
        );
        assert!(!result.is_fresh);
        assert_eq!(result.market_status, MarketStatus::PreMarket);
        assert_eq!(result.last_complete_trading_day, date(2024, 12, 2));
        assert_eq!(result.fetch_start_date, Some(date(2024, 11, 29)));
    }

    #[test]
    fn evaluator_is_total_on_degenerate_input() {
        // Inverted range, single stale row: still a well-formed result.
        let result = evaluate_freshness(
            utc(2024, 12, 3, 13, 0),
            utc(2024, 12, 6, 0, 0),
            utc(2024, 12, 2, 0, 0),
            &rows(&[date(2020, 1, 2)], utc(2020, 1, 2, 22, 0)),
            &ttl(),
        );
        assert!(!result.is_fresh);
        assert!(result.needs_fetch);
    }

    #[test]
    fn incremental_start_prefers_later_recommendation() {
        let start = utc(2024, 12, 2, 0, 0);
        assert_eq!(incremental_start(start, None), start);
        assert_eq!(incremental_start(start, Some(date(2024, 11, 20))), start);
        assert_eq!(
            incremental_start(start, Some(date(2024, 12, 4))),
            utc(2024, 12, 4, 0, 0)
        );
    }
}
