//! API route definitions.

use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};

use super::state::AppState;
use crate::monitor::TailCursor;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
}

fn meta() -> Value {
    json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    })
}

async fn health() -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": meta()
    }))
}

async fn status(State(state): State<AppState>) -> Json<Value> {
    let stats = state.stats.read().await.clone();

    let store = state.store.clone();
    let records = tokio::task::spawn_blocking(move || store.len())
        .await
        .map_err(|e| e.to_string())
        .and_then(|r| r.map_err(|e| e.to_string()));

    let store_view = match records {
        Ok(records) => {
            let cursor = stats.cursor.map_or_else(TailCursor::new, TailCursor::at);
            let pending = cursor.pending(records).map_or(0, |r| r.count());
            json!({
                "path": state.store.path().display().to_string(),
                "records": records,
                "pending": pending
            })
        }
        Err(error) => json!({
            "path": state.store.path().display().to_string(),
            "records": null,
            "error": error
        }),
    };

    Json(json!({
        "data": {
            "alert_topic": state.alert_topic,
            "store": store_view,
            "monitor": stats
        },
        "meta": meta()
    }))
}
