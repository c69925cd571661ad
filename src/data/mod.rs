//! Market data: provider capability, price store, two-tier cache.

pub mod cache;
pub mod mock;
pub mod store;
pub mod yahoo;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Canonical symbol form: uppercase, trimmed, at most 10 characters.
pub fn canonicalize_symbol(raw: &str) -> Result<String> {
    let symbol = raw.trim().to_uppercase();
    if symbol.is_empty() {
        return Err(Error::validation("symbol must not be empty"));
    }
    if symbol.len() > 10 {
        return Err(Error::validation(format!(
            "symbol '{symbol}' exceeds 10 characters"
        )));
    }
    Ok(symbol)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1m")]
    Min1,
    #[serde(rename = "2m")]
    Min2,
    #[serde(rename = "5m")]
    Min5,
    #[serde(rename = "15m")]
    Min15,
    #[serde(rename = "30m")]
    Min30,
    #[serde(rename = "60m")]
    Min60,
    #[serde(rename = "90m")]
    Min90,
    #[serde(rename = "1h")]
    Hour1,
    #[serde(rename = "1d")]
    Day1,
    #[serde(rename = "5d")]
    Day5,
    #[serde(rename = "1wk")]
    Week1,
    #[serde(rename = "1mo")]
    Month1,
    #[serde(rename = "3mo")]
    Month3,
}

impl Interval {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Min1 => "1m",
            Self::Min2 => "2m",
            Self::Min5 => "5m",
            Self::Min15 => "15m",
            Self::Min30 => "30m",
            Self::Min60 => "60m",
            Self::Min90 => "90m",
            Self::Hour1 => "1h",
            Self::Day1 => "1d",
            Self::Day5 => "5d",
            Self::Week1 => "1wk",
            Self::Month1 => "1mo",
            Self::Month3 => "3mo",
        }
    }

    pub fn is_intraday(self) -> bool {
        matches!(
            self,
            Self::Min1
                | Self::Min2
                | Self::Min5
                | Self::Min15
                | Self::Min30
                | Self::Min60
                | Self::Min90
                | Self::Hour1
        )
    }

    /// TTL bucket used by the L2 freshness check.
    pub fn ttl_class(self) -> TtlClass {
        if self == Self::Hour1 {
            TtlClass::Hourly
        } else if self.is_intraday() {
            TtlClass::Intraday
        } else {
            TtlClass::Daily
        }
    }
}

impl std::str::FromStr for Interval {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "1m" => Ok(Self::Min1),
            "2m" => Ok(Self::Min2),
            "5m" => Ok(Self::Min5),
            "15m" => Ok(Self::Min15),
            "30m" => Ok(Self::Min30),
            "60m" => Ok(Self::Min60),
            "90m" => Ok(Self::Min90),
            "1h" => Ok(Self::Hour1),
            "1d" => Ok(Self::Day1),
            "5d" => Ok(Self::Day5),
            "1wk" => Ok(Self::Week1),
            "1mo" => Ok(Self::Month1),
            "3mo" => Ok(Self::Month3),
            other => Err(Error::validation(format!("invalid interval '{other}'"))),
        }
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlClass {
    Intraday,
    Hourly,
    Daily,
}

/// One OHLCV bar. Prices are fixed-point decimals quantised to 4 places.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceBar {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub interval: Interval,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: i64,
    pub adjusted_close: Option<Decimal>,
    pub data_source: String,
    pub last_fetched_at: DateTime<Utc>,
    pub is_validated: bool,
}

impl PriceBar {
    /// Civil date of the bar (UTC). Daily bars are stored at UTC midnight.
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }

    /// Bar invariants: positive prices, low <= open/close <= high,
    /// non-negative volume.
    pub fn validate(&self) -> Result<()> {
        if self.open <= Decimal::ZERO
            || self.high <= Decimal::ZERO
            || self.low <= Decimal::ZERO
            || self.close <= Decimal::ZERO
        {
            return Err(Error::validation(format!(
                "{}: prices must be positive",
                self.symbol
            )));
        }
        if self.low > self.open
            || self.low > self.close
            || self.open > self.high
            || self.close > self.high
        {
            return Err(Error::validation(format!(
                "{}: OHLC ordering violated at {}",
                self.symbol, self.timestamp
            )));
        }
        if self.volume < 0 {
            return Err(Error::validation(format!(
                "{}: negative volume",
                self.symbol
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    pub name: Option<String>,
    pub currency: Option<String>,
    pub exchange: Option<String>,
    pub market_cap: Option<i64>,
    pub sector: Option<String>,
    pub industry: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PriceDataRequest {
    pub symbol: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub interval: Interval,
    pub include_pre_post: bool,
}

/// External market data source. Implementations map upstream failures onto
/// the error taxonomy: unknown symbols to `SymbolNotFound`, throttling to
/// `RateLimited`, transport/5xx to `Provider`.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn get_symbol_info(&self, symbol: &str) -> Result<SymbolInfo>;

    async fn fetch_price_data(&self, request: &PriceDataRequest) -> Result<Vec<PriceBar>>;
}

/// Map a company sector to its SPDR sector ETF.
pub fn sector_etf(sector: &str) -> Option<&'static str> {
    match sector {
        "Technology" | "Information Technology" => Some("XLK"),
        "Financial Services" | "Financials" => Some("XLF"),
        "Healthcare" | "Health Care" => Some("XLV"),
        "Consumer Cyclical" | "Consumer Discretionary" => Some("XLY"),
        "Consumer Defensive" | "Consumer Staples" => Some("XLP"),
        "Energy" => Some("XLE"),
        "Industrials" => Some("XLI"),
        "Basic Materials" | "Materials" => Some("XLB"),
        "Utilities" => Some("XLU"),
        "Real Estate" => Some("XLRE"),
        "Communication Services" => Some("XLC"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn bar(open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> PriceBar {
        PriceBar {
            symbol: "AAPL".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 6, 3, 0, 0, 0).unwrap(),
            interval: Interval::Day1,
            open,
            high,
            low,
            close,
            volume: 1_000,
            adjusted_close: None,
            data_source: "mock".into(),
            last_fetched_at: Utc.with_ymd_and_hms(2024, 6, 3, 21, 0, 0).unwrap(),
            is_validated: false,
        }
    }

    #[test]
    fn canonicalize_uppercases_and_trims() {
        assert_eq!(canonicalize_symbol(" aapl ").unwrap(), "AAPL");
    }

    #[test]
    fn canonicalize_rejects_empty_and_long() {
        assert!(canonicalize_symbol("   ").is_err());
        assert!(canonicalize_symbol("ABCDEFGHIJK").is_err());
    }

    #[test]
    fn interval_round_trip() {
        for s in [
            "1m", "2m", "5m", "15m", "30m", "60m", "90m", "1h", "1d", "5d", "1wk", "1mo", "3mo",
        ] {
            let interval: Interval = s.parse().unwrap();
            assert_eq!(interval.as_str(), s);
        }
        assert!("4h".parse::<Interval>().is_err());
    }

    #[test]
    fn interval_ttl_classes() {
        assert_eq!(Interval::Min5.ttl_class(), TtlClass::Intraday);
        assert_eq!(Interval::Hour1.ttl_class(), TtlClass::Hourly);
        assert_eq!(Interval::Day1.ttl_class(), TtlClass::Daily);
        assert_eq!(Interval::Month1.ttl_class(), TtlClass::Daily);
    }

    #[test]
    fn valid_bar_passes() {
        assert!(bar(dec!(100), dec!(110), dec!(99), dec!(108))
            .validate()
            .is_ok());
    }

    #[test]
    fn inverted_ohlc_rejected() {
        assert!(bar(dec!(100), dec!(95), dec!(99), dec!(98))
            .validate()
            .is_err());
        assert!(bar(dec!(100), dec!(110), dec!(105), dec!(108))
            .validate()
            .is_err());
    }

    #[test]
    fn non_positive_price_rejected() {
        assert!(bar(dec!(0), dec!(110), dec!(99), dec!(108))
            .validate()
            .is_err());
    }

    #[test]
    fn sector_etf_mapping() {
        assert_eq!(sector_etf("Technology"), Some("XLK"));
        assert_eq!(sector_etf("Energy"), Some("XLE"));
        assert_eq!(sector_etf("Unknown Sector"), None);
    }
}
