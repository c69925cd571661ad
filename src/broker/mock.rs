//! In-memory broker with immediate fills.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::{Broker, OrderRequest, OrderResult, OrderStatus};
use crate::error::{Error, Result};

pub struct MockBroker {
    connected: AtomicBool,
    managed_accounts: Vec<String>,
    account: Option<String>,
    next_order_id: AtomicI64,
    orders: Mutex<HashMap<i64, OrderStatus>>,
}

impl MockBroker {
    pub fn new(account: Option<String>) -> Self {
        Self {
            connected: AtomicBool::new(false),
            managed_accounts: vec!["DU000000".into(), "MOCK0001".into()],
            account,
            next_order_id: AtomicI64::new(1),
            orders: Mutex::new(HashMap::new()),
        }
    }

    /// Test hook: control which accounts the session reports.
    pub fn with_managed_accounts(account: Option<String>, managed: Vec<String>) -> Self {
        Self {
            managed_accounts: managed,
            ..Self::new(account)
        }
    }
}

#[async_trait]
impl Broker for MockBroker {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn connect(&self) -> Result<()> {
        if let Some(account) = &self.account {
            if !self.managed_accounts.contains(account) {
                return Err(Error::Broker(format!(
                    "account {account} not in managed accounts {:?}",
                    self.managed_accounts
                )));
            }
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderResult> {
        if !self.is_connected().await {
            return Err(Error::Broker("not connected".into()));
        }
        if request.quantity <= 0 {
            return Err(Error::validation("order quantity must be positive"));
        }

        let order_id = self.next_order_id.fetch_add(1, Ordering::SeqCst);
        self.orders
            .lock()
            .unwrap()
            .insert(order_id, OrderStatus::Filled);

        Ok(OrderResult {
            order_id,
            status: OrderStatus::Filled,
            filled_quantity: request.quantity,
            avg_fill_price: request.limit_price.or(Some(Decimal::ONE_HUNDRED)),
        })
    }

    async fn order_status(&self, order_id: i64) -> Result<OrderStatus> {
        self.orders
            .lock()
            .unwrap()
            .get(&order_id)
            .copied()
            .ok_or_else(|| Error::not_found(format!("order {order_id} not found")))
    }

    async fn cancel_order(&self, order_id: i64) -> Result<()> {
        let mut orders = self.orders.lock().unwrap();
        match orders.get_mut(&order_id) {
            Some(status @ OrderStatus::Submitted) => {
                *status = OrderStatus::Cancelled;
                Ok(())
            }
            Some(_) => Err(Error::validation(format!(
                "order {order_id} is no longer cancellable"
            ))),
            None => Err(Error::not_found(format!("order {order_id} not found"))),
        }
    }
}
