//! Deterministic mock provider for tests and offline development.
//!
//! Bars are a seeded random walk over trading days so repeated fetches for
//! the same symbol and range return identical data.

use async_trait::async_trait;
use chrono::{Datelike, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;

use super::{
    canonicalize_symbol, MarketDataProvider, PriceBar, PriceDataRequest, SymbolInfo,
};
use crate::calendar::trading_days_in_range;
use crate::error::{Error, Result};

pub struct MockProvider;

impl MockProvider {
    /// Symbols the mock refuses to know, for exercising not-found paths.
    const UNKNOWN: &'static [&'static str] = &["UNKNOWN", "INVALID"];

    fn seed(symbol: &str) -> u64 {
        symbol.bytes().fold(0u64, |acc, b| {
            acc.wrapping_mul(31).wrapping_add(u64::from(b))
        })
    }
}

#[async_trait]
impl MarketDataProvider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn get_symbol_info(&self, symbol: &str) -> Result<SymbolInfo> {
        let symbol = canonicalize_symbol(symbol)?;
        if Self::UNKNOWN.contains(&symbol.as_str()) {
            return Err(Error::SymbolNotFound(symbol));
        }

        let sectors = [
            "Technology",
            "Healthcare",
            "Financial Services",
            "Energy",
            "Industrials",
        ];
        let sector = sectors[(Self::seed(&symbol) % sectors.len() as u64) as usize];

        Ok(SymbolInfo {
            name: Some(format!("{symbol} Inc.")),
            currency: Some("USD".into()),
            exchange: Some("NASDAQ".into()),
            market_cap: Some(1_000_000_000),
            sector: Some(sector.into()),
            industry: Some("Mock Industry".into()),
            symbol,
        })
    }

    async fn fetch_price_data(&self, request: &PriceDataRequest) -> Result<Vec<PriceBar>> {
        let symbol = canonicalize_symbol(&request.symbol)?;
        if Self::UNKNOWN.contains(&symbol.as_str()) {
            return Err(Error::SymbolNotFound(symbol));
        }

        let seed = Self::seed(&symbol);
        let base = 50.0 + (seed % 200) as f64;
        let now = Utc::now();

        let days = trading_days_in_range(request.start.date_naive(), request.end.date_naive());
        let bars = days
            .iter()
            .map(|day| {
                // Seed per (symbol, date) so a given bar is identical no
                // matter which request range covers it.
                let mut rng =
                    StdRng::seed_from_u64(seed.wrapping_add(day.num_days_from_ce() as u64));
                let drift = (f64::from(day.ordinal()) * 0.15).sin() * 2.0;
                let phase: f64 = rng.random_range(0.0..1.0);
                let open = base + drift + phase;
                let close = base + drift + rng.random_range(-1.0..1.5);
                let high = open.max(close) + rng.random_range(0.2..1.5);
                let low = open.min(close) - rng.random_range(0.2..1.5);

                PriceBar {
                    symbol: symbol.clone(),
                    timestamp: Utc
                        .from_utc_datetime(&day.and_hms_opt(0, 0, 0).unwrap()),
                    interval: request.interval,
                    open: to_price(open),
                    high: to_price(high),
                    low: to_price(low),
                    close: to_price(close),
                    volume: 1_000_000 + rng.random_range(0..500_000i64),
                    adjusted_close: Some(to_price(close)),
                    data_source: "mock".into(),
                    last_fetched_at: now,
                    is_validated: true,
                }
            })
            .collect();
        Ok(bars)
    }
}

fn to_price(v: f64) -> Decimal {
    Decimal::from_f64_retain(v).unwrap_or_default().round_dp(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(start_day: u32, end_day: u32) -> PriceDataRequest {
        PriceDataRequest {
            symbol: "AAPL".into(),
            start: Utc.with_ymd_and_hms(2024, 6, start_day, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 6, end_day, 0, 0, 0).unwrap(),
            interval: super::super::Interval::Day1,
            include_pre_post: false,
        }
    }

    #[tokio::test]
    async fn bars_cover_trading_days_only() {
        let bars = MockProvider.fetch_price_data(&request(1, 7)).await.unwrap();
        // Jun 1-2 2024 is a weekend: Mon 3 .. Fri 7 = 5 trading days.
        assert_eq!(bars.len(), 5);
    }

    #[tokio::test]
    async fn fetch_is_deterministic() {
        let a = MockProvider.fetch_price_data(&request(3, 14)).await.unwrap();
        let b = MockProvider.fetch_price_data(&request(3, 14)).await.unwrap();
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.close, y.close);
            assert_eq!(x.volume, y.volume);
        }
    }

    #[tokio::test]
    async fn bars_satisfy_ohlc_invariants() {
        let bars = MockProvider.fetch_price_data(&request(3, 28)).await.unwrap();
        for bar in bars {
            bar.validate().unwrap();
        }
    }

    #[tokio::test]
    async fn unknown_symbol_fails() {
        let mut req = request(3, 7);
        req.symbol = "UNKNOWN".into();
        assert!(matches!(
            MockProvider.fetch_price_data(&req).await,
            Err(Error::SymbolNotFound(_))
        ));
        assert!(MockProvider.get_symbol_info("UNKNOWN").await.is_err());
    }

    #[tokio::test]
    async fn symbol_info_is_stable() {
        let a = MockProvider.get_symbol_info("MSFT").await.unwrap();
        let b = MockProvider.get_symbol_info("msft").await.unwrap();
        assert_eq!(a.sector, b.sector);
        assert_eq!(a.symbol, "MSFT");
    }
}
