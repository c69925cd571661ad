//! Minimal Interactive Brokers Gateway client.
//!
//! Speaks the v100+ wire format: every message is a 4-byte big-endian
//! length prefix followed by NUL-terminated string fields. This client
//! implements the handshake, START_API, managed-accounts capture, and
//! market/limit order placement — enough for the account-status surface
//! and operator execution. Connect fails fast when the configured account
//! is not in the session's managed accounts.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

use super::{Broker, OrderRequest, OrderResult, OrderStatus, OrderType};
use crate::error::{Error, Result};

// Outgoing message ids.
const START_API: &str = "71";
const PLACE_ORDER: &str = "3";
const CANCEL_ORDER: &str = "4";
// Incoming message ids.
const MSG_NEXT_VALID_ID: &str = "9";
const MSG_MANAGED_ACCTS: &str = "15";
const MSG_ORDER_STATUS: &str = "3";
const MSG_ERROR: &str = "4";

const CLIENT_VERSION_RANGE: &str = "v100..176";
const MAX_FRAME_LEN: u32 = 1 << 20;

struct IbSession {
    stream: TcpStream,
}

pub struct IbBroker {
    host: String,
    port: u16,
    client_id: i32,
    account: String,
    connection_timeout: Duration,
    session: Mutex<Option<IbSession>>,
    next_order_id: AtomicI64,
}

impl IbBroker {
    pub fn new(
        host: String,
        port: u16,
        client_id: i32,
        account: String,
        connection_timeout: Duration,
    ) -> Self {
        Self {
            host,
            port,
            client_id,
            account,
            connection_timeout,
            session: Mutex::new(None),
            next_order_id: AtomicI64::new(0),
        }
    }
}

#[async_trait]
impl Broker for IbBroker {
    fn name(&self) -> &'static str {
        "ib"
    }

    async fn connect(&self) -> Result<()> {
        let addr = format!("{}:{}", self.host, self.port);
        let stream = timeout(self.connection_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| Error::Broker(format!("connection to {addr} timed out")))?
            .map_err(|e| Error::Broker(format!("connection to {addr} failed: {e}")))?;

        let mut stream = stream;
        let handshake = timeout(
            self.connection_timeout,
            run_handshake(&mut stream, self.client_id),
        )
        .await
        .map_err(|_| Error::Broker("handshake timed out".into()))??;

        if !handshake.managed_accounts.iter().any(|a| a == &self.account) {
            return Err(Error::Broker(format!(
                "account {} not in session's managed accounts {:?}",
                self.account, handshake.managed_accounts
            )));
        }

        self.next_order_id
            .store(handshake.next_valid_id, Ordering::SeqCst);
        *self.session.lock().await = Some(IbSession { stream });

        tracing::info!(
            account = %self.account,
            server_version = handshake.server_version,
            "IB gateway connected"
        );
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(mut session) = self.session.lock().await.take() {
            let _ = session.stream.shutdown().await;
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.session.lock().await.is_some()
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderResult> {
        if request.quantity <= 0 {
            return Err(Error::validation("order quantity must be positive"));
        }
        let mut guard = self.session.lock().await;
        let session = guard
            .as_mut()
            .ok_or_else(|| Error::Broker("not connected".into()))?;

        let order_id = self.next_order_id.fetch_add(1, Ordering::SeqCst);
        let message = encode_place_order(order_id, &self.account, request);
        write_frame(&mut session.stream, &message)
            .await
            .map_err(|e| Error::Broker(format!("order write failed: {e}")))?;

        Ok(OrderResult {
            order_id,
            status: OrderStatus::Submitted,
            filled_quantity: 0,
            avg_fill_price: None,
        })
    }

    async fn order_status(&self, order_id: i64) -> Result<OrderStatus> {
        let mut guard = self.session.lock().await;
        let session = guard
            .as_mut()
            .ok_or_else(|| Error::Broker("not connected".into()))?;

        // Drain whatever the gateway has buffered and take the latest
        // status report for this order.
        let mut latest = None;
        while let Ok(Ok(fields)) =
            timeout(Duration::from_millis(200), read_fields(&mut session.stream)).await
        {
            if fields.first().map(String::as_str) == Some(MSG_ORDER_STATUS)
                && fields.get(1).and_then(|f| f.parse::<i64>().ok()) == Some(order_id)
            {
                latest = fields.get(2).map(|s| map_order_status(s));
            }
        }
        latest.ok_or_else(|| Error::not_found(format!("no status for order {order_id}")))
    }

    async fn cancel_order(&self, order_id: i64) -> Result<()> {
        let mut guard = self.session.lock().await;
        let session = guard
            .as_mut()
            .ok_or_else(|| Error::Broker("not connected".into()))?;

        let message = encode_fields(&[CANCEL_ORDER, "1", &order_id.to_string()]);
        write_frame(&mut session.stream, &message)
            .await
            .map_err(|e| Error::Broker(format!("cancel write failed: {e}")))?;
        Ok(())
    }
}

struct Handshake {
    server_version: i32,
    managed_accounts: Vec<String>,
    next_valid_id: i64,
}

/// v100+ handshake: "API\0" + version range, then START_API; the gateway
/// answers with NEXT_VALID_ID and MANAGED_ACCTS before normal traffic.
async fn run_handshake<S>(stream: &mut S, client_id: i32) -> Result<Handshake>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    stream
        .write_all(b"API\0")
        .await
        .map_err(|e| Error::Broker(format!("handshake write failed: {e}")))?;
    let version = frame(CLIENT_VERSION_RANGE.as_bytes());
    stream
        .write_all(&version)
        .await
        .map_err(|e| Error::Broker(format!("handshake write failed: {e}")))?;

    let greeting = read_fields(stream).await?;
    let server_version: i32 = greeting
        .first()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| Error::Broker("malformed server greeting".into()))?;

    let start = encode_fields(&[START_API, "2", &client_id.to_string(), ""]);
    write_frame(stream, &start)
        .await
        .map_err(|e| Error::Broker(format!("START_API write failed: {e}")))?;

    let mut managed_accounts = None;
    let mut next_valid_id = None;
    while managed_accounts.is_none() || next_valid_id.is_none() {
        let fields = read_fields(stream).await?;
        match fields.first().map(String::as_str) {
            Some(MSG_MANAGED_ACCTS) => {
                let accounts = fields
                    .get(2)
                    .map(|csv| {
                        csv.split(',')
                            .filter(|s| !s.is_empty())
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                managed_accounts = Some(accounts);
            }
            Some(MSG_NEXT_VALID_ID) => {
                next_valid_id = fields.get(2).and_then(|f| f.parse().ok());
            }
            Some(MSG_ERROR) => {
                let text = fields.get(4).cloned().unwrap_or_default();
                // Connection-level errors abort; informational ones don't.
                if !text.is_empty() {
                    tracing::debug!(%text, "IB message during handshake");
                }
            }
            _ => {}
        }
    }

    Ok(Handshake {
        server_version,
        managed_accounts: managed_accounts.unwrap_or_default(),
        next_valid_id: next_valid_id.unwrap_or(1),
    })
}

// -- wire format ------------------------------------------------------------

/// NUL-terminate and concatenate fields (no length prefix).
fn encode_fields(fields: &[&str]) -> Vec<u8> {
    let mut out = Vec::new();
    for field in fields {
        out.extend_from_slice(field.as_bytes());
        out.push(0);
    }
    out
}

/// Length-prefix a payload.
fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 4);
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

fn decode_fields(payload: &[u8]) -> Vec<String> {
    payload
        .split(|&b| b == 0)
        .filter(|chunk| !chunk.is_empty())
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect()
}

async fn write_frame<S: AsyncWrite + Unpin + Send>(stream: &mut S, payload: &[u8]) -> std::io::Result<()> {
    stream.write_all(&frame(payload)).await
}

async fn read_fields<S: AsyncRead + Unpin + Send>(stream: &mut S) -> Result<Vec<String>> {
    let mut len_buf = [0u8; 4];
    stream
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| Error::Broker(format!("read failed: {e}")))?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(Error::Broker(format!("oversized frame ({len} bytes)")));
    }
    let mut payload = vec![0u8; len as usize];
    stream
        .read_exact(&mut payload)
        .await
        .map_err(|e| Error::Broker(format!("read failed: {e}")))?;
    Ok(decode_fields(&payload))
}

/// Market/limit order encoding: symbol contract plus the order block, with
/// unused fields left empty as the protocol requires.
fn encode_place_order(order_id: i64, account: &str, request: &OrderRequest) -> Vec<u8> {
    let order_type = match request.order_type {
        OrderType::Market => "MKT",
        OrderType::Limit => "LMT",
    };
    let limit_price = request
        .limit_price
        .map(|p| p.to_string())
        .unwrap_or_default();

    let order_id = order_id.to_string();
    let quantity = request.quantity.to_string();
    let fields = [
        PLACE_ORDER,
        &order_id,
        // Contract: conId, symbol, secType, expiry, strike, right,
        // multiplier, exchange, primaryExchange, currency, localSymbol,
        // tradingClass, secIdType, secId.
        "0",
        &request.symbol,
        "STK",
        "",
        "0",
        "",
        "",
        "SMART",
        "",
        "USD",
        "",
        "",
        "",
        "",
        // Order: action, totalQuantity, orderType, lmtPrice, auxPrice.
        request.side.as_str(),
        &quantity,
        order_type,
        &limit_price,
        "",
        // tif, ocaGroup, account, openClose, origin, orderRef, transmit.
        "DAY",
        "",
        account,
        "O",
        "0",
        "",
        "1",
    ];
    encode_fields(&fields)
}

fn map_order_status(raw: &str) -> OrderStatus {
    match raw {
        "Filled" => OrderStatus::Filled,
        "Cancelled" | "ApiCancelled" => OrderStatus::Cancelled,
        "Inactive" => OrderStatus::Rejected,
        _ => OrderStatus::Submitted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::OrderSide;
    use rust_decimal_macros::dec;

    #[test]
    fn frame_prefixes_length_big_endian() {
        let framed = frame(b"abc");
        assert_eq!(&framed[..4], &[0, 0, 0, 3]);
        assert_eq!(&framed[4..], b"abc");
    }

    #[test]
    fn fields_round_trip() {
        let encoded = encode_fields(&["71", "2", "7", ""]);
        let decoded = decode_fields(&encoded);
        assert_eq!(decoded, vec!["71", "2", "7"]);
    }

    #[test]
    fn order_status_mapping() {
        assert_eq!(map_order_status("Filled"), OrderStatus::Filled);
        assert_eq!(map_order_status("Cancelled"), OrderStatus::Cancelled);
        assert_eq!(map_order_status("Inactive"), OrderStatus::Rejected);
        assert_eq!(map_order_status("PreSubmitted"), OrderStatus::Submitted);
    }

    #[test]
    fn place_order_encoding() {
        let request = OrderRequest {
            symbol: "AAPL".into(),
            side: OrderSide::Buy,
            quantity: 10,
            order_type: OrderType::Limit,
            limit_price: Some(dec!(123.45)),
        };
        let fields = decode_fields(&encode_place_order(42, "DU123456", &request));
        assert_eq!(fields[0], "3"); // PLACE_ORDER
        assert_eq!(fields[1], "42");
        assert!(fields.contains(&"AAPL".to_string()));
        assert!(fields.contains(&"LMT".to_string()));
        assert!(fields.contains(&"123.45".to_string()));
        assert!(fields.contains(&"DU123456".to_string()));
    }

    /// Scripted gateway over an in-memory duplex: handshake succeeds and
    /// managed accounts are captured.
    #[tokio::test]
    async fn handshake_captures_managed_accounts() {
        let (mut gateway, mut client) = tokio::io::duplex(4096);

        let server = tokio::spawn(async move {
            // Consume "API\0" + version frame.
            let mut prefix = [0u8; 4];
            gateway.read_exact(&mut prefix).await.unwrap();
            assert_eq!(&prefix, b"API\0");
            let _ = read_fields(&mut gateway).await.unwrap();

            // Greeting: server version + time.
            write_frame(&mut gateway, &encode_fields(&["176", "20240601 12:00:00 EST"]))
                .await
                .unwrap();

            // Expect START_API.
            let start = read_fields(&mut gateway).await.unwrap();
            assert_eq!(start[0], "71");

            write_frame(&mut gateway, &encode_fields(&["15", "1", "DU123456,U7654321"]))
                .await
                .unwrap();
            write_frame(&mut gateway, &encode_fields(&["9", "1", "100"]))
                .await
                .unwrap();
        });

        let handshake = run_handshake(&mut client, 7).await.unwrap();
        server.await.unwrap();

        assert_eq!(handshake.server_version, 176);
        assert_eq!(handshake.managed_accounts, vec!["DU123456", "U7654321"]);
        assert_eq!(handshake.next_valid_id, 100);
    }

    #[tokio::test]
    async fn oversized_frame_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&u32::MAX.to_be_bytes()).await.unwrap();
        let err = read_fields(&mut b).await.unwrap_err();
        assert!(err.to_string().contains("oversized"));
    }
}
