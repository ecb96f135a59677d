// SPDX-License-Identifier: MIT

use axum::{
    extract::State,
    response::sse::{Event, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::engine::Engine;

pub async fn serve(
    engine: Arc<Engine>,
    port: u16,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = Router::new()
        .route("/api/health", get(health_check))
        .route("/api/backends", get(list_backends))
        .route("/api/runs", post(create_run))
        .route("/api/runs/stream", post(stream_run))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(engine);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    log::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn list_backends(State(engine): State<Arc<Engine>>) -> Json<Value> {
    let mut backends = Vec::new();
    for (name, description) in engine.registry().descriptions().await {
        let catalog = match engine.registry().get(&name).await {
            Some(backend) => backend
                .catalog()
                .iter()
                .map(|spec| json!({"name": spec.name, "read_only": spec.read_only}))
                .collect(),
            None => Vec::new(),
        };
        backends.push(json!({
            "name": name,
            "description": description,
            "catalog": catalog,
        }));
    }
    Json(json!(backends))
}

#[derive(Debug, Deserialize)]
struct RunRequest {
    request: String,
    #[serde(default)]
    context: Value,
}

/// Run a request to a terminal state and return the full report
async fn create_run(
    State(engine): State<Arc<Engine>>,
    Json(body): Json<RunRequest>,
) -> Json<Value> {
    match engine.run(&body.request, &body.context).await {
        Ok(report) => Json(serde_json::to_value(&report).unwrap_or_else(|e| {
            json!({"error": format!("report serialization failed: {}", e)})
        })),
        Err(e) => Json(json!({"error": e.to_string()})),
    }
}

/// Run a request and stream workflow events as SSE
async fn stream_run(
    State(engine): State<Arc<Engine>>,
    Json(body): Json<RunRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel(64);

    tokio::spawn(async move {
        let cancel = tokio_util::sync::CancellationToken::new();
        if let Err(e) = engine
            .run_with(&body.request, &body.context, cancel, Some(tx))
            .await
        {
            log::error!("Streamed run failed before producing a report: {}", e);
        }
    });

    let stream = ReceiverStream::new(rx).map(|event| {
        let payload = serde_json::to_string(&event)
            .unwrap_or_else(|e| format!("{{\"event\":\"error\",\"reason\":\"{}\"}}", e));
        Ok(Event::default().data(payload))
    });

    Sse::new(stream)
}
