//! Minimal JSON-RPC tool server protected by backpressure middleware.
//!
//! Run:
//!     cargo run --example demo_server
//!
//! Then drive it, for example:
//!     curl -s localhost:8080/rpc -H 'content-type: application/json' \
//!         -d '{"jsonrpc":"2.0","id":1,"method":"slow_operation","params":{"duration":1.0}}'

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use floodgate::{BackpressureConfig, BackpressureMiddleware};

struct AppState {
    middleware: BackpressureMiddleware,
}

#[derive(Debug, Deserialize)]
struct RpcRequest {
    #[serde(default)]
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let middleware = BackpressureMiddleware::new(
        BackpressureConfig::new(5)
            .unwrap()
            .with_queue_size(10)
            .with_queue_timeout(Duration::from_secs(30))
            .with_overload_observer(|err| {
                tracing::warn!(reason = %err.reason(), active = err.active(), "shedding load");
            }),
    );

    let state = Arc::new(AppState { middleware });
    let app = Router::new()
        .route("/rpc", post(rpc))
        .route("/metrics", get(metrics))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
    info!("demo server listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("received SIGINT, shutting down...");
        })
        .await?;

    Ok(())
}

async fn metrics(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(serde_json::to_value(state.middleware.metrics()).expect("snapshot serializes"))
}

async fn rpc(State(state): State<Arc<AppState>>, Json(request): Json<RpcRequest>) -> Json<Value> {
    let id = request.id.clone();
    let outcome = state
        .middleware
        .handle(|| dispatch(request.method.clone(), request.params.clone()))
        .await;

    Json(match outcome {
        Ok(Ok(result)) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
        Ok(Err(error)) => json!({ "jsonrpc": "2.0", "id": id, "error": error }),
        Err(overload) => json!({ "jsonrpc": "2.0", "id": id, "error": overload.to_json_rpc() }),
    })
}

/// The "tools" behind the middleware: one slow, one immediate.
async fn dispatch(method: String, params: Value) -> Result<Value, Value> {
    match method.as_str() {
        "slow_operation" => {
            let duration = params
                .get("duration")
                .and_then(Value::as_f64)
                .unwrap_or(1.0);
            tokio::time::sleep(Duration::from_secs_f64(duration)).await;
            Ok(json!({ "result": "completed", "duration": duration }))
        }
        "fast_operation" => {
            let value = params.get("value").cloned().unwrap_or(Value::Null);
            Ok(json!({ "echo": value }))
        }
        other => Err(json!({ "code": -32601, "message": format!("method not found: {other}") })),
    }
}
