//! Durable price store over Postgres.
//!
//! Writes are upserts on the `(symbol, timestamp, interval)` unique key so
//! concurrent writers for overlapping ranges never collide; there is no
//! SELECT-then-INSERT anywhere in this module.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, QueryBuilder, Row};

use super::{sector_etf, Interval, PriceBar, SymbolInfo};
use crate::error::Result;

/// Rows per multi-row upsert statement. Keeps bind-parameter counts well
/// under the Postgres limit while staying a single statement per chunk.
const UPSERT_CHUNK: usize = 1_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub inserted: u64,
    pub updated: u64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SectorRecord {
    pub symbol: String,
    pub name: Option<String>,
    pub sector: Option<String>,
    pub sector_etf: Option<String>,
    pub industry: Option<String>,
    pub exchange: Option<String>,
}

#[derive(Clone)]
pub struct PriceStore {
    pool: PgPool,
}

impl PriceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Upsert a batch of bars. On conflict the price/volume fields are
    /// updated and `last_fetched_at` bumped. Atomic per call.
    pub async fn upsert_bars(
        &self,
        symbol: &str,
        bars: &[PriceBar],
        interval: Interval,
    ) -> Result<SyncStats> {
        if bars.is_empty() {
            return Ok(SyncStats::default());
        }

        let mut stats = SyncStats::default();
        let mut tx = self.pool.begin().await?;

        for chunk in bars.chunks(UPSERT_CHUNK) {
            let mut qb: QueryBuilder<'_, sqlx::Postgres> = QueryBuilder::new(
                "INSERT INTO stock_prices \
                 (symbol, timestamp, interval, open_price, high_price, low_price, \
                  close_price, adjusted_close, volume, data_source, is_validated) ",
            );
            qb.push_values(chunk, |mut b, bar| {
                b.push_bind(symbol)
                    .push_bind(bar.timestamp)
                    .push_bind(interval.as_str())
                    .push_bind(bar.open)
                    .push_bind(bar.high)
                    .push_bind(bar.low)
                    .push_bind(bar.close)
                    .push_bind(bar.adjusted_close)
                    .push_bind(bar.volume)
                    .push_bind(&bar.data_source)
                    .push_bind(bar.is_validated);
            });
            qb.push(
                " ON CONFLICT (symbol, timestamp, interval) DO UPDATE SET \
                 open_price = EXCLUDED.open_price, \
                 high_price = EXCLUDED.high_price, \
                 low_price = EXCLUDED.low_price, \
                 close_price = EXCLUDED.close_price, \
                 adjusted_close = EXCLUDED.adjusted_close, \
                 volume = EXCLUDED.volume, \
                 data_source = EXCLUDED.data_source, \
                 last_fetched_at = now() \
                 RETURNING (xmax = 0) AS inserted",
            );

            let rows = qb.build().fetch_all(&mut *tx).await?;
            for row in rows {
                if row.get::<bool, _>("inserted") {
                    stats.inserted += 1;
                } else {
                    stats.updated += 1;
                }
            }
        }

        tx.commit().await?;
        Ok(stats)
    }

    /// Bars in `[start, end]`, timestamp ascending.
    pub async fn bars_in_range(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: Interval,
    ) -> Result<Vec<PriceBar>> {
        let rows = sqlx::query(
            "SELECT symbol, timestamp, interval, open_price, high_price, low_price, \
             close_price, adjusted_close, volume, data_source, last_fetched_at, is_validated \
             FROM stock_prices \
             WHERE symbol = $1 AND interval = $2 AND timestamp >= $3 AND timestamp <= $4 \
             ORDER BY timestamp ASC",
        )
        .bind(symbol)
        .bind(interval.as_str())
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_bar).collect()
    }

    /// Bump freshness stamps for a range without touching bar values.
    pub async fn update_last_fetched_at(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: Interval,
    ) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE stock_prices SET last_fetched_at = now() \
             WHERE symbol = $1 AND interval = $2 AND timestamp >= $3 AND timestamp <= $4",
        )
        .bind(symbol)
        .bind(interval.as_str())
        .bind(start)
        .bind(end)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Coverage metadata for the freshness evaluator: (bar date,
    /// last_fetched_at) for every cached bar in the range.
    pub async fn coverage(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: Interval,
    ) -> Result<Vec<(NaiveDate, DateTime<Utc>)>> {
        let rows = sqlx::query(
            "SELECT timestamp, last_fetched_at FROM stock_prices \
             WHERE symbol = $1 AND interval = $2 AND timestamp >= $3 AND timestamp <= $4 \
             ORDER BY timestamp ASC",
        )
        .bind(symbol)
        .bind(interval.as_str())
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let ts: DateTime<Utc> = row.get("timestamp");
                let fetched: DateTime<Utc> = row.get("last_fetched_at");
                (ts.date_naive(), fetched)
            })
            .collect())
    }

    pub async fn get_sector(&self, symbol: &str) -> Result<Option<SectorRecord>> {
        let record = sqlx::query_as::<_, SectorRecord>(
            "SELECT symbol, name, sector, sector_etf, industry, exchange \
             FROM stock_sectors WHERE symbol = $1",
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    /// Insert-or-update the sector cache from provider metadata. The ETF
    /// column is derived from the sector name.
    pub async fn upsert_sector(&self, info: &SymbolInfo) -> Result<SectorRecord> {
        let etf = info.sector.as_deref().and_then(sector_etf);
        let record = sqlx::query_as::<_, SectorRecord>(
            "INSERT INTO stock_sectors (symbol, name, sector, sector_etf, industry, exchange) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (symbol) DO UPDATE SET \
             name = COALESCE(EXCLUDED.name, stock_sectors.name), \
             sector = COALESCE(EXCLUDED.sector, stock_sectors.sector), \
             sector_etf = COALESCE(EXCLUDED.sector_etf, stock_sectors.sector_etf), \
             industry = COALESCE(EXCLUDED.industry, stock_sectors.industry), \
             exchange = COALESCE(EXCLUDED.exchange, stock_sectors.exchange) \
             RETURNING symbol, name, sector, sector_etf, industry, exchange",
        )
        .bind(&info.symbol)
        .bind(&info.name)
        .bind(&info.sector)
        .bind(etf)
        .bind(&info.industry)
        .bind(&info.exchange)
        .fetch_one(&self.pool)
        .await?;
        Ok(record)
    }
}

fn row_to_bar(row: PgRow) -> Result<PriceBar> {
    let interval: String = row.get("interval");
    Ok(PriceBar {
        symbol: row.get("symbol"),
        timestamp: row.get("timestamp"),
        interval: interval.parse()?,
        open: row.get::<Decimal, _>("open_price"),
        high: row.get::<Decimal, _>("high_price"),
        low: row.get::<Decimal, _>("low_price"),
        close: row.get::<Decimal, _>("close_price"),
        volume: row.get("volume"),
        adjusted_close: row.get("adjusted_close"),
        data_source: row.get("data_source"),
        last_fetched_at: row.get("last_fetched_at"),
        is_validated: row.get("is_validated"),
    })
}
