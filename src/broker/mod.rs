//! Broker capability: order execution behind a closed registry.
//!
//! The engine never touches a broker; this surface exists for the account
//! endpoints and operator-driven execution. `connect` must validate the
//! configured account against the session's managed accounts and fail fast
//! on mismatch.

pub mod ib;
pub mod mock;

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::{BrokerType, Settings};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Submitted,
    Filled,
    Cancelled,
    Rejected,
}

#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: i32,
    pub order_type: OrderType,
    pub limit_price: Option<Decimal>,
}

#[derive(Debug, Clone)]
pub struct OrderResult {
    pub order_id: i64,
    pub status: OrderStatus,
    pub filled_quantity: i32,
    pub avg_fill_price: Option<Decimal>,
}

#[async_trait]
pub trait Broker: Send + Sync {
    fn name(&self) -> &'static str;

    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    async fn is_connected(&self) -> bool;

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderResult>;

    async fn order_status(&self, order_id: i64) -> Result<OrderStatus>;

    async fn cancel_order(&self, order_id: i64) -> Result<()>;
}

pub fn build_broker(settings: &Settings) -> Result<Arc<dyn Broker>> {
    match settings.broker_type {
        BrokerType::Mock => Ok(Arc::new(mock::MockBroker::new(None))),
        BrokerType::Ib => {
            let account = settings
                .ib_account
                .clone()
                .ok_or_else(|| Error::Config("IB_ACCOUNT is required for BROKER_TYPE=ib".into()))?;
            Ok(Arc::new(ib::IbBroker::new(
                settings.ib_host.clone(),
                settings.ib_port,
                settings.ib_client_id,
                account,
                settings.ib_connection_timeout,
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn settings(broker_type: BrokerType, account: Option<&str>) -> Settings {
        Settings {
            database_url: "postgres://localhost/test".into(),
            bind_addr: "127.0.0.1:8000".into(),
            broker_type,
            market_data_provider: crate::config::ProviderKind::Mock,
            ib_host: "127.0.0.1".into(),
            ib_port: 4001,
            ib_client_id: 1,
            ib_account: account.map(String::from),
            ib_connection_timeout: Duration::from_secs(1),
            ib_order_timeout: Duration::from_secs(5),
            ib_fill_poll_interval: Duration::from_millis(100),
            ib_cancel_wait_time: Duration::from_secs(1),
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
    fn mock_broker_resolves() {
        let broker = build_broker(&settings(BrokerType::Mock, None)).unwrap();
        assert_eq!(broker.name(), "mock");
    }

    #[test]
    fn ib_broker_requires_account() {
        assert!(build_broker(&settings(BrokerType::Ib, None)).is_err());
        let broker = build_broker(&settings(BrokerType::Ib, Some("DU123456"))).unwrap();
        assert_eq!(broker.name(), "ib");
    }
}
