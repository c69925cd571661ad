//! Stock data endpoints: OHLCV ranges, indicator series, on-demand
//! analysis, symbol metadata and sector-ETF trend.

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use rust_decimal::prelude::ToPrimitive;
use serde::Deserialize;
use serde_json::{json, Value};

use super::AppState;
use crate::data::{canonicalize_symbol, sector_etf, Interval, PriceBar, PriceDataRequest};
use crate::error::{Error, Result};
use crate::indicators::cci::{analyze_cci, CciDirection, CciZone};
use crate::indicators::rsi2::analyze_rsi2;
use crate::indicators::{average_true_range, commodity_channel_index, simple_moving_average};

const MAX_DAILY_RANGE_DAYS: i64 = 3 * 365;
const MAX_INTRADAY_RANGE_DAYS: i64 = 60;

#[derive(Debug, Deserialize)]
pub struct PriceParams {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    #[serde(default = "default_interval")]
    pub interval: String,
    #[serde(default)]
    pub force_refresh: bool,
}

fn default_interval() -> String {
    "1d".into()
}

pub async fn prices(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(params): Query<PriceParams>,
) -> Result<Json<Value>> {
    let symbol = canonicalize_symbol(&symbol)?;
    let interval: Interval = params.interval.parse()?;

    let end = params
        .end_date
        .map_or_else(Utc::now, |d| day_end(d));
    let start = params.start_date.map_or_else(
        || end - Duration::days(state.settings.default_history_days),
        day_start,
    );

    if start >= end {
        return Err(Error::validation("start_date must be before end_date"));
    }
    let span = (end - start).num_days();
    if interval.is_intraday() && span > MAX_INTRADAY_RANGE_DAYS {
        return Err(Error::validation(format!(
            "intraday range limited to {MAX_INTRADAY_RANGE_DAYS} days"
        )));
    }
    if span > MAX_DAILY_RANGE_DAYS {
        return Err(Error::validation("date range exceeds 3 years"));
    }

    let request = PriceDataRequest {
        symbol: symbol.clone(),
        start,
        end,
        interval,
        include_pre_post: false,
    };
    let bars = state
        .cache
        .get_price_data(&request, params.force_refresh)
        .await?;

    Ok(Json(json!({
        "symbol": symbol,
        "interval": interval.as_str(),
        "count": bars.len(),
        "prices": bars,
    })))
}

#[derive(Debug, Deserialize)]
pub struct IndicatorParams {
    #[serde(default = "default_indicator_days")]
    pub days: i64,
}

fn default_indicator_days() -> i64 {
    90
}

/// MA-20 and CCI series aligned with the returned bars.
pub async fn indicators(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(params): Query<IndicatorParams>,
) -> Result<Json<Value>> {
    let symbol = canonicalize_symbol(&symbol)?;
    let days = params.days.clamp(1, MAX_DAILY_RANGE_DAYS);

    // Extra lookback so the first requested day already has indicator
    // values behind it.
    let bars = fetch_daily(&state, &symbol, days + 60).await?;
    if bars.is_empty() {
        return Err(Error::SymbolNotFound(symbol));
    }

    let closes: Vec<f64> = bars.iter().map(|b| to_f64(b.close)).collect();
    let highs: Vec<f64> = bars.iter().map(|b| to_f64(b.high)).collect();
    let lows: Vec<f64> = bars.iter().map(|b| to_f64(b.low)).collect();

    let ma20 = simple_moving_average(&closes, 20);
    let cci = commodity_channel_index(&highs, &lows, &closes, 20);

    let skip = bars.len().saturating_sub(days as usize);
    let rows: Vec<Value> = bars
        .iter()
        .enumerate()
        .skip(skip)
        .map(|(i, bar)| {
            json!({
                "date": bar.date(),
                "close": bar.close,
                "ma20": finite(ma20[i]),
                "cci": finite(cci[i]),
                "cci_signal": cci_signal_label(&cci, i),
            })
        })
        .collect();

    Ok(Json(json!({
        "symbol": symbol,
        "count": rows.len(),
        "indicators": rows,
    })))
}

#[derive(Debug, Deserialize)]
pub struct AnalysisParams {
    /// Comma-separated: trend, cci, rsi2, volume_signal, atr.
    pub include: Option<String>,
}

/// On-demand indicator analysis over the recent window.
pub async fn analysis(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(params): Query<AnalysisParams>,
) -> Result<Json<Value>> {
    let symbol = canonicalize_symbol(&symbol)?;
    let include: Vec<&str> = params
        .include
        .as_deref()
        .unwrap_or("trend,cci")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    let bars = fetch_daily(&state, &symbol, 120).await?;
    if bars.len() < 25 {
        return Err(Error::validation(format!(
            "insufficient data for analysis: {} bars",
            bars.len()
        )));
    }

    let closes: Vec<f64> = bars.iter().map(|b| to_f64(b.close)).collect();
    let highs: Vec<f64> = bars.iter().map(|b| to_f64(b.high)).collect();
    let lows: Vec<f64> = bars.iter().map(|b| to_f64(b.low)).collect();
    let volumes: Vec<f64> = bars.iter().map(|b| b.volume as f64).collect();

    let mut out = serde_json::Map::new();
    for section in include {
        match section {
            "trend" => {
                out.insert("trend".into(), trend_json(&closes));
            }
            "cci" => {
                let cci = analyze_cci(&highs, &lows, &closes, 20);
                out.insert(
                    "cci".into(),
                    json!({
                        "value": cci.value,
                        "zone": zone_label(cci.zone),
                        "direction": direction_label(cci.direction),
                    }),
                );
            }
            "rsi2" => {
                let rsi = analyze_rsi2(&closes);
                out.insert(
                    "rsi2".into(),
                    json!({
                        "value": rsi.value,
                        "long_score": rsi.long_score,
                        "short_score": rsi.short_score,
                    }),
                );
            }
            "volume_signal" => {
                let avg = volumes[volumes.len().saturating_sub(20)..]
                    .iter()
                    .sum::<f64>()
                    / 20.0;
                let last = *volumes.last().unwrap_or(&0.0);
                let ratio = if avg > 0.0 { last / avg } else { 0.0 };
                out.insert(
                    "volume_signal".into(),
                    json!({
                        "last_volume": last,
                        "avg_volume_20d": avg,
                        "ratio": ratio,
                        "expansion": ratio >= 1.5,
                    }),
                );
            }
            "atr" => {
                let atr = average_true_range(&highs, &lows, &closes, 14);
                let value = atr.last().copied().filter(|v| !v.is_nan());
                let pct = value.and_then(|v| {
                    closes.last().filter(|c| **c > 0.0).map(|c| v / c * 100.0)
                });
                out.insert("atr".into(), json!({ "value": value, "pct": pct }));
            }
            other => {
                return Err(Error::validation(format!("unknown indicator '{other}'")));
            }
        }
    }

    Ok(Json(json!({ "symbol": symbol, "analysis": out })))
}

pub async fn info(State(state): State<AppState>, Path(symbol): Path<String>) -> Result<Json<Value>> {
    let symbol = canonicalize_symbol(&symbol)?;

    // Serve from the sector cache when present; fall through to the
    // provider and cache the result opportunistically.
    if let Some(record) = state.cache.store().get_sector(&symbol).await? {
        return Ok(Json(json!({
            "symbol": record.symbol,
            "name": record.name,
            "sector": record.sector,
            "sector_etf": record.sector_etf,
            "industry": record.industry,
            "exchange": record.exchange,
            "cached": true,
        })));
    }

    let info = state.cache.provider().get_symbol_info(&symbol).await?;
    let record = state.cache.store().upsert_sector(&info).await?;
    Ok(Json(json!({
        "symbol": record.symbol,
        "name": record.name,
        "sector": record.sector,
        "sector_etf": record.sector_etf,
        "industry": record.industry,
        "exchange": record.exchange,
        "market_cap": info.market_cap,
        "currency": info.currency,
        "cached": false,
    })))
}

/// Trend analytics for the symbol's sector ETF.
pub async fn sector_trend(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<Value>> {
    let symbol = canonicalize_symbol(&symbol)?;

    let etf = match state.cache.store().get_sector(&symbol).await? {
        Some(record) => record
            .sector_etf
            .or_else(|| record.sector.as_deref().and_then(sector_etf).map(String::from)),
        None => {
            let info = state.cache.provider().get_symbol_info(&symbol).await?;
            let record = state.cache.store().upsert_sector(&info).await?;
            record.sector_etf
        }
    };
    let etf = etf.ok_or_else(|| {
        Error::not_found(format!("no sector ETF mapping for {symbol}"))
    })?;

    let bars = fetch_daily(&state, &etf, 120).await?;
    if bars.len() < 25 {
        return Err(Error::validation(format!(
            "insufficient data for sector trend: {} bars",
            bars.len()
        )));
    }

    let closes: Vec<f64> = bars.iter().map(|b| to_f64(b.close)).collect();
    let highs: Vec<f64> = bars.iter().map(|b| to_f64(b.high)).collect();
    let lows: Vec<f64> = bars.iter().map(|b| to_f64(b.low)).collect();
    let cci = analyze_cci(&highs, &lows, &closes, 20);

    Ok(Json(json!({
        "symbol": symbol,
        "sector_etf": etf,
        "trend": trend_json(&closes),
        "cci": {
            "value": cci.value,
            "zone": zone_label(cci.zone),
            "direction": direction_label(cci.direction),
        },
    })))
}

// -- helpers ----------------------------------------------------------------

async fn fetch_daily(state: &AppState, symbol: &str, days: i64) -> Result<Vec<PriceBar>> {
    let request = PriceDataRequest {
        symbol: symbol.to_string(),
        start: Utc::now() - Duration::days(days),
        end: Utc::now(),
        interval: Interval::Day1,
        include_pre_post: false,
    };
    state.cache.get_price_data(&request, false).await
}

fn trend_json(closes: &[f64]) -> Value {
    let ma20 = simple_moving_average(closes, 20);
    let last = closes.len() - 1;
    let ma_now = ma20[last];
    let ma_then = ma20[last.saturating_sub(5)];
    let rising = !ma_now.is_nan() && !ma_then.is_nan() && ma_now > ma_then;
    let distance_pct = if ma_now.is_nan() || ma_now == 0.0 {
        None
    } else {
        Some((closes[last] - ma_now) / ma_now * 100.0)
    };
    json!({
        "ma20": finite(ma_now),
        "ma20_rising": rising,
        "close": closes[last],
        "distance_from_ma20_pct": distance_pct,
    })
}

fn cci_signal_label(cci: &[f64], i: usize) -> Option<&'static str> {
    if i == 0 || cci[i].is_nan() || cci[i - 1].is_nan() {
        return None;
    }
    if cci[i - 1] <= 100.0 && cci[i] > 100.0 {
        Some("momentum_bullish")
    } else if cci[i - 1] >= -100.0 && cci[i] < -100.0 {
        Some("momentum_bearish")
    } else {
        None
    }
}

fn zone_label(zone: CciZone) -> &'static str {
    match zone {
        CciZone::Overbought => "overbought",
        CciZone::Oversold => "oversold",
        CciZone::Neutral => "neutral",
    }
}

fn direction_label(direction: CciDirection) -> &'static str {
    match direction {
        CciDirection::Rising => "rising",
        CciDirection::Falling => "falling",
        CciDirection::Flat => "flat",
    }
}

fn finite(v: f64) -> Option<f64> {
    (!v.is_nan() && v.is_finite()).then_some(v)
}

fn to_f64(d: rust_decimal::Decimal) -> f64 {
    d.to_f64().unwrap_or(0.0)
}

fn day_start(date: NaiveDate) -> chrono::DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

fn day_end(date: NaiveDate) -> chrono::DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms_opt(23, 59, 59).unwrap())
}
