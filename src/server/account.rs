//! Broker and data-provider connection summary.

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use super::AppState;

pub async fn status(State(state): State<AppState>) -> Json<Value> {
    let broker_connected = state.broker.is_connected().await;
    let database_ok = sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(&state.pool)
        .await
        .is_ok();

    Json(json!({
        "broker": {
            "type": state.broker.name(),
            "connected": broker_connected,
            "account": state.settings.ib_account,
        },
        "data_provider": {
            "name": state.cache.provider().name(),
        },
        "database": {
            "connected": database_ok,
        },
    }))
}
