use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

use crate::app::{App, TriggerOutcome};
use crate::health::HealthReport;

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    timestamp: DateTime<Utc>,
    #[serde(flatten)]
    report: HealthReport,
}

pub fn router(app: Arc<App>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/trigger_repost", post(trigger_repost))
        .with_state(app)
}

async fn health(State(app): State<Arc<App>>) -> Json<HealthBody> {
    let report = app.health().await;
    Json(HealthBody {
        status: if report.is_healthy() { "healthy" } else { "degraded" },
        timestamp: Utc::now(),
        report,
    })
}

async fn trigger_repost(State(app): State<Arc<App>>) -> Response {
    match app.trigger_repost().await {
        Ok(TriggerOutcome::Published(message_id)) => {
            Json(json!({ "status": "ok", "message_id": message_id })).into_response()
        }
        Ok(TriggerOutcome::Skipped) => {
            Json(json!({ "status": "skipped", "reason": "no posts available" })).into_response()
        }
        Ok(TriggerOutcome::Busy) => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "detail": "repost already in progress" })),
        )
            .into_response(),
        Err(err) => {
            error!(?err, "triggered repost failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "detail": format!("repost failed: {err}") })),
            )
                .into_response()
        }
    }
}

/// Serve until Ctrl-C.
pub async fn serve(app: Arc<App>, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "http server listening");
    axum::serve(listener, router(app))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;
    Ok(())
}
