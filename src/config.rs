use std::time::Duration;

use crate::error::{Error, Result};

/// Application settings, environment-sourced.
///
/// | Env Var | Default | Purpose |
/// |---------|---------|---------|
/// | `DATABASE_URL` | (required) | Postgres connection string |
/// | `BIND_ADDR` | `0.0.0.0:8000` | HTTP listen address |
/// | `BROKER_TYPE` | `mock` | `mock` or `ib` |
/// | `MARKET_DATA_PROVIDER` | `yahoo` | `yahoo`, `ib` or `mock` |
/// | `IB_HOST` / `IB_PORT` / `IB_CLIENT_ID` / `IB_ACCOUNT` | — | IB Gateway connection |
/// | `CACHE_TTL_*`, `CACHE_L1_*`, `MARKET_HOURS_TTL` | see below | cache freshness knobs |
/// | `WORKER_POLL_INTERVAL` etc. | 5/30/300/60 s | job queue timing |
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub bind_addr: String,

    pub broker_type: BrokerType,
    pub market_data_provider: ProviderKind,

    pub ib_host: String,
    pub ib_port: u16,
    pub ib_client_id: i32,
    pub ib_account: Option<String>,
    pub ib_connection_timeout: Duration,
    pub ib_order_timeout: Duration,
    pub ib_fill_poll_interval: Duration,
    pub ib_cancel_wait_time: Duration,

    pub cache_ttl_daily: u64,
    pub cache_ttl_hourly: u64,
    pub cache_ttl_intraday: u64,
    pub cache_l1_ttl: u64,
    pub cache_l1_size: usize,
    pub market_hours_ttl: u64,

    pub default_history_days: i64,
    pub arena_max_symbols: usize,
    pub max_concurrent_fetches: usize,
    pub yahoo_max_retries: u32,
    pub yahoo_retry_delay: f64,

    pub worker_poll_interval: Duration,
    pub heartbeat_interval: Duration,
    pub stale_threshold: Duration,
    pub sweep_interval: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerType {
    Mock,
    Ib,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Yahoo,
    Ib,
    Mock,
}

impl Settings {
    /// Load settings from the environment (`.env` honoured via dotenvy).
    ///
    /// Misconfiguration is fatal: the process refuses to serve rather than
    /// starting with a broker pointed at the wrong gateway.
    pub fn from_env() -> Result<Self> {
        let broker_type = match env_or("BROKER_TYPE", "mock").as_str() {
            "mock" => BrokerType::Mock,
            "ib" => BrokerType::Ib,
            other => {
                return Err(Error::Config(format!("unknown BROKER_TYPE '{other}'")));
            }
        };
        let market_data_provider = match env_or("MARKET_DATA_PROVIDER", "yahoo").as_str() {
            "yahoo" => ProviderKind::Yahoo,
            "ib" => ProviderKind::Ib,
            "mock" => ProviderKind::Mock,
            other => {
                return Err(Error::Config(format!(
                    "unknown MARKET_DATA_PROVIDER '{other}'"
                )));
            }
        };

        let settings = Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| Error::Config("DATABASE_URL is required".into()))?,
            bind_addr: env_or("BIND_ADDR", "0.0.0.0:8000"),

            broker_type,
            market_data_provider,

            ib_host: env_or("IB_HOST", "127.0.0.1"),
            ib_port: parse_env("IB_PORT", 4001)?,
            ib_client_id: parse_env("IB_CLIENT_ID", 1)?,
            ib_account: std::env::var("IB_ACCOUNT").ok().filter(|s| !s.is_empty()),
            ib_connection_timeout: Duration::from_secs_f64(parse_env(
                "IB_CONNECTION_TIMEOUT",
                10.0,
            )?),
            ib_order_timeout: Duration::from_secs_f64(parse_env("IB_ORDER_TIMEOUT", 30.0)?),
            ib_fill_poll_interval: Duration::from_secs_f64(parse_env(
                "IB_FILL_POLL_INTERVAL",
                0.5,
            )?),
            ib_cancel_wait_time: Duration::from_secs_f64(parse_env("IB_CANCEL_WAIT_TIME", 5.0)?),

            cache_ttl_daily: parse_env("CACHE_TTL_DAILY", 86_400)?,
            cache_ttl_hourly: parse_env("CACHE_TTL_HOURLY", 3_600)?,
            cache_ttl_intraday: parse_env("CACHE_TTL_INTRADAY", 300)?,
            cache_l1_ttl: parse_env("CACHE_L1_TTL", 30)?,
            cache_l1_size: parse_env("CACHE_L1_SIZE", 200)?,
            market_hours_ttl: parse_env("MARKET_HOURS_TTL", 300)?,

            default_history_days: parse_env("DEFAULT_HISTORY_DAYS", 365)?,
            arena_max_symbols: parse_env("ARENA_MAX_SYMBOLS", 150)?,
            max_concurrent_fetches: parse_env("MAX_CONCURRENT_FETCHES", 5)?,
            yahoo_max_retries: parse_env("YAHOO_MAX_RETRIES", 3)?,
            yahoo_retry_delay: parse_env("YAHOO_RETRY_DELAY", 1.0)?,

            worker_poll_interval: Duration::from_secs_f64(parse_env("WORKER_POLL_INTERVAL", 5.0)?),
            heartbeat_interval: Duration::from_secs_f64(parse_env("HEARTBEAT_INTERVAL", 30.0)?),
            stale_threshold: Duration::from_secs_f64(parse_env("STALE_THRESHOLD", 300.0)?),
            sweep_interval: Duration::from_secs_f64(parse_env("SWEEP_INTERVAL", 60.0)?),
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Cross-field validation. IB port pairing: paper accounts (DU…) talk
    /// to the paper gateway on 4001, live accounts (U…) on 4002.
    pub fn validate(&self) -> Result<()> {
        if self.broker_type == BrokerType::Ib {
            let account = self.ib_account.as_deref().ok_or_else(|| {
                Error::Config("IB_ACCOUNT is mandatory when BROKER_TYPE=ib".into())
            })?;

            if account.starts_with("DU") && self.ib_port != 4001 {
                return Err(Error::Config(format!(
                    "paper account {account} requires IB_PORT=4001, got {}",
                    self.ib_port
                )));
            }
            if !account.starts_with("DU") && account.starts_with('U') && self.ib_port != 4002 {
                return Err(Error::Config(format!(
                    "live account {account} requires IB_PORT=4002, got {}",
                    self.ib_port
                )));
            }
        }

        if self.market_data_provider == ProviderKind::Ib {
            return Err(Error::Config(
                "MARKET_DATA_PROVIDER=ib is not supported by this build; use yahoo or mock".into(),
            ));
        }

        if self.cache_l1_size == 0 {
            return Err(Error::Config("CACHE_L1_SIZE must be positive".into()));
        }

        Ok(())
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| Error::Config(format!("invalid value for {key}: '{raw}'"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_settings() -> Settings {
        Settings {
            database_url: "postgres://localhost/test".into(),
            bind_addr: "127.0.0.1:8000".into(),
            broker_type: BrokerType::Mock,
            market_data_provider: ProviderKind::Mock,
            ib_host: "127.0.0.1".into(),
            ib_port: 4001,
            ib_client_id: 1,
            ib_account: None,
            ib_connection_timeout: Duration::from_secs(10),
            ib_order_timeout: Duration::from_secs(30),
            ib_fill_poll_interval: Duration::from_millis(500),
            ib_cancel_wait_time: Duration::from_secs(5),
            cache_ttl_daily: 86_400,
            cache_ttl_hourly: 3_600,
            cache_ttl_intraday: 300,
            cache_l1_ttl: 30,
            cache_l1_size: 200,
            market_hours_ttl: 300,
            default_history_days: 365,
            arena_max_symbols: 150,
            max_concurrent_fetches: 5,
            yahoo_max_retries: 3,
            yahoo_retry_delay: 1.0,
            worker_poll_interval: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
            stale_threshold: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
        }
    }

    #[test]
    fn mock_broker_needs_no_account() {
        assert!(base_settings().validate().is_ok());
    }

    #[test]
    fn ib_broker_requires_account() {
        let mut s = base_settings();
        s.broker_type = BrokerType::Ib;
        assert!(s.validate().is_err());
    }

    #[test]
    fn paper_account_requires_port_4001() {
        let mut s = base_settings();
        s.broker_type = BrokerType::Ib;
        s.ib_account = Some("DU123456".into());
        s.ib_port = 4002;
        assert!(s.validate().is_err());

        s.ib_port = 4001;
        assert!(s.validate().is_ok());
    }

    #[test]
    fn live_account_requires_port_4002() {
        let mut s = base_settings();
        s.broker_type = BrokerType::Ib;
        s.ib_account = Some("U7654321".into());
        s.ib_port = 4001;
        assert!(s.validate().is_err());

        s.ib_port = 4002;
        assert!(s.validate().is_ok());
    }

    #[test]
    fn ib_data_provider_rejected() {
        let mut s = base_settings();
        s.market_data_provider = ProviderKind::Ib;
        assert!(s.validate().is_err());
    }
}
