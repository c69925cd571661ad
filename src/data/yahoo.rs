//! Yahoo Finance market data provider.
//!
//! Uses the v8 chart endpoint for OHLCV history and the v10 quoteSummary
//! endpoint for symbol metadata. Transient failures (transport, 5xx) are
//! retried with exponential backoff; 404/empty payloads map to
//! `SymbolNotFound` and 429 to `RateLimited`.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::sleep;

use super::{
    canonicalize_symbol, Interval, MarketDataProvider, PriceBar, PriceDataRequest, SymbolInfo,
};
use crate::config::Settings;
use crate::error::{Error, Result};

const CHART_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";
const QUOTE_SUMMARY_URL: &str = "https://query1.finance.yahoo.com/v10/finance/quoteSummary";
const USER_AGENT: &str = "Mozilla/5.0 (compatible; trading-analyst/0.1)";

/// Intraday history is capped by the upstream API.
const INTRADAY_MAX_DAYS: i64 = 60;

pub struct YahooProvider {
    client: Client,
    max_retries: u32,
    retry_delay: f64,
}

impl YahooProvider {
    pub fn new(request_timeout: Duration, max_retries: u32, retry_delay: f64) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::Provider(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            max_retries,
            retry_delay,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(
            Duration::from_secs(30),
            settings.yahoo_max_retries,
            settings.yahoo_retry_delay,
        )
    }

    fn validate_range(request: &PriceDataRequest) -> Result<()> {
        if request.start >= request.end {
            return Err(Error::validation("start_date must be before end_date"));
        }
        if request.interval.is_intraday()
            && (request.end - request.start).num_days() > INTRADAY_MAX_DAYS
        {
            return Err(Error::validation(format!(
                "intraday data limited to {INTRADAY_MAX_DAYS} days"
            )));
        }
        Ok(())
    }

    /// GET with bounded retries. Only transport errors and 5xx/429 are
    /// retried; everything else is returned to the caller for mapping.
    async fn get_with_retry(&self, url: &str, params: &[(&str, String)]) -> Result<reqwest::Response> {
        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let wait = self.retry_delay * f64::from(1u32 << (attempt - 1));
                tracing::warn!(url, attempt, wait, "retrying Yahoo request");
                sleep(Duration::from_secs_f64(wait)).await;
            }

            match self.client.get(url).query(params).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                        last_error = Some(Error::Provider(format!("upstream status {status}")));
                        continue;
                    }
                    return Ok(resp);
                }
                Err(e) => {
                    last_error = Some(Error::Provider(format!("request failed: {e}")));
                }
            }
        }
        Err(last_error.unwrap_or_else(|| Error::Provider("max retries exceeded".into())))
    }
}

#[async_trait]
impl MarketDataProvider for YahooProvider {
    fn name(&self) -> &'static str {
        "yahoo"
    }

    async fn get_symbol_info(&self, symbol: &str) -> Result<SymbolInfo> {
        let symbol = canonicalize_symbol(symbol)?;
        let url = format!("{QUOTE_SUMMARY_URL}/{symbol}");
        let params = [("modules", "assetProfile,price".to_string())];

        let resp = self.get_with_retry(&url, &params).await?;
        match resp.status() {
            StatusCode::NOT_FOUND => return Err(Error::SymbolNotFound(symbol)),
            StatusCode::TOO_MANY_REQUESTS => {
                return Err(Error::RateLimited("Yahoo quoteSummary".into()));
            }
            s if !s.is_success() => {
                return Err(Error::Provider(format!("quoteSummary status {s}")));
            }
            _ => {}
        }

        let body: QuoteSummaryResponse = resp
            .json()
            .await
            .map_err(|e| Error::Provider(format!("quoteSummary parse error: {e}")))?;

        let result = body
            .quote_summary
            .and_then(|qs| qs.result)
            .and_then(|mut r| if r.is_empty() { None } else { Some(r.remove(0)) })
            .ok_or_else(|| Error::SymbolNotFound(symbol.clone()))?;

        let profile = result.asset_profile.unwrap_or_default();
        let price = result.price.unwrap_or_default();

        Ok(SymbolInfo {
            symbol,
            name: price.long_name.or(price.short_name),
            currency: price.currency,
            exchange: price.exchange_name,
            market_cap: price.market_cap.and_then(|m| m.raw),
            sector: profile.sector,
            industry: profile.industry,
        })
    }

    async fn fetch_price_data(&self, request: &PriceDataRequest) -> Result<Vec<PriceBar>> {
        let symbol = canonicalize_symbol(&request.symbol)?;
        Self::validate_range(request)?;

        let url = format!("{CHART_URL}/{symbol}");
        let params = [
            ("period1", request.start.timestamp().to_string()),
            ("period2", request.end.timestamp().to_string()),
            ("interval", request.interval.as_str().to_string()),
            ("includePrePost", request.include_pre_post.to_string()),
            ("events", "div,split".to_string()),
        ];

        let resp = self.get_with_retry(&url, &params).await?;
        match resp.status() {
            StatusCode::NOT_FOUND => return Err(Error::SymbolNotFound(symbol)),
            StatusCode::TOO_MANY_REQUESTS => {
                return Err(Error::RateLimited("Yahoo chart".into()));
            }
            s if !s.is_success() => return Err(Error::Provider(format!("chart status {s}"))),
            _ => {}
        }

        let body: ChartResponse = resp
            .json()
            .await
            .map_err(|e| Error::Provider(format!("chart parse error: {e}")))?;

        if let Some(err) = body.chart.error {
            if err.code.as_deref() == Some("Not Found") {
                return Err(Error::SymbolNotFound(symbol));
            }
            return Err(Error::Provider(format!(
                "Yahoo error: {}",
                err.description.unwrap_or_default()
            )));
        }

        let result = body
            .chart
            .result
            .and_then(|mut r| if r.is_empty() { None } else { Some(r.remove(0)) })
            .ok_or_else(|| Error::SymbolNotFound(symbol.clone()))?;

        Ok(chart_to_bars(&symbol, request.interval, &result))
    }
}

fn chart_to_bars(symbol: &str, interval: Interval, result: &ChartResult) -> Vec<PriceBar> {
    let Some(quote) = result.indicators.quote.first() else {
        return Vec::new();
    };
    let adjclose = result
        .indicators
        .adjclose
        .as_ref()
        .and_then(|a| a.first())
        .map(|a| a.adjclose.as_slice())
        .unwrap_or(&[]);

    let now = Utc::now();
    let mut bars = Vec::with_capacity(result.timestamp.len());
    for (i, &ts) in result.timestamp.iter().enumerate() {
        let (Some(open), Some(high), Some(low), Some(close)) = (
            value_at(&quote.open, i),
            value_at(&quote.high, i),
            value_at(&quote.low, i),
            value_at(&quote.close, i),
        ) else {
            // Partial quote rows (halts, bad prints) are dropped; the
            // freshness check treats the remaining gap as refetchable.
            continue;
        };

        let Some(timestamp) = normalize_timestamp(ts, interval) else {
            continue;
        };

        bars.push(PriceBar {
            symbol: symbol.to_string(),
            timestamp,
            interval,
            open: to_price(open),
            high: to_price(high),
            low: to_price(low),
            close: to_price(close),
            volume: value_at(&quote.volume, i).unwrap_or(0),
            adjusted_close: value_at(adjclose, i).map(to_price),
            data_source: "yahoo".into(),
            last_fetched_at: now,
            is_validated: false,
        });
    }
    bars
}

fn value_at<T: Copy>(values: &[Option<T>], i: usize) -> Option<T> {
    values.get(i).copied().flatten()
}

fn to_price(v: f64) -> Decimal {
    Decimal::from_f64_retain(v).unwrap_or_default().round_dp(4)
}

/// Daily and coarser bars are normalised to UTC midnight of their trading
/// date so the unique key is stable across fetches; intraday bars keep the
/// exact timestamp.
fn normalize_timestamp(unix: i64, interval: Interval) -> Option<DateTime<Utc>> {
    let ts = Utc.timestamp_opt(unix, 0).single()?;
    if interval.is_intraday() {
        Some(ts)
    } else {
        Some(Utc.from_utc_datetime(&ts.date_naive().and_hms_opt(0, 0, 0)?))
    }
}

// -- response types ---------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: ChartIndicators,
}

#[derive(Debug, Deserialize)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<ChartQuote>,
    adjclose: Option<Vec<ChartAdjClose>>,
}

#[derive(Debug, Default, Deserialize)]
struct ChartQuote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<i64>>,
}

#[derive(Debug, Deserialize)]
struct ChartAdjClose {
    #[serde(default)]
    adjclose: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct QuoteSummaryResponse {
    #[serde(rename = "quoteSummary")]
    quote_summary: Option<QuoteSummary>,
}

#[derive(Debug, Deserialize)]
struct QuoteSummary {
    result: Option<Vec<QuoteSummaryResult>>,
}

#[derive(Debug, Deserialize)]
struct QuoteSummaryResult {
    #[serde(rename = "assetProfile")]
    asset_profile: Option<AssetProfile>,
    price: Option<PriceModule>,
}

#[derive(Debug, Default, Deserialize)]
struct AssetProfile {
    sector: Option<String>,
    industry: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PriceModule {
    #[serde(rename = "longName")]
    long_name: Option<String>,
    #[serde(rename = "shortName")]
    short_name: Option<String>,
    currency: Option<String>,
    #[serde(rename = "exchangeName")]
    exchange_name: Option<String>,
    #[serde(rename = "marketCap")]
    market_cap: Option<RawValue>,
}

#[derive(Debug, Deserialize)]
struct RawValue {
    raw: Option<i64>,
}
