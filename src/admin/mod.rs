/// Administrative HTTP endpoints
///
/// Read-only views of the hub plus an out-of-band broadcast trigger.
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::json;
use tokio::net::TcpListener;

use crate::logger::Logger;
use crate::server::hub::{Hub, MemberInfo, Metrics};
use crate::server::shutdown::Shutdown;

/// Shared state passed to every route handler
#[derive(Clone)]
pub struct AdminState {
    pub hub: Arc<Hub>,
    pub logger: Logger,
}

/// Build the admin router
pub fn router(hub: Arc<Hub>, logger: Logger) -> Router {
    Router::new()
        .route("/broadcast", post(broadcast))
        .route("/clients", get(clients))
        .route("/metrics", get(metrics))
        .with_state(AdminState { hub, logger })
}

/// Serve the admin router on `listener` until `shutdown` fires
pub async fn serve(
    listener: TcpListener,
    hub: Arc<Hub>,
    shutdown: Shutdown,
    logger: Logger,
) -> std::io::Result<()> {
    let app = router(hub, logger.clone());

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.wait().await;
        })
        .await?;

    logger.info("✅ HTTP server stopped gracefully");
    Ok(())
}

/// POST /broadcast — the body (trimmed) goes to every connection
async fn broadcast(State(state): State<AdminState>, body: String) -> Response {
    let mut logger = state.logger.for_session();
    logger.new_request();

    let msg = body.trim();
    if msg.is_empty() {
        logger.warn("Admin broadcast rejected: empty body");
        return StatusCode::BAD_REQUEST.into_response();
    }

    let report = state.hub.broadcast(msg);
    logger.info(&format!(
        "Admin broadcast: {} (delivered {}, dropped {})",
        msg, report.delivered, report.dropped
    ));
    Json(json!({ "broadcasted": msg })).into_response()
}

/// GET /clients — one record per registered connection
async fn clients(State(state): State<AdminState>) -> Json<Vec<MemberInfo>> {
    Json(state.hub.snapshot())
}

/// GET /metrics — aggregate counters
async fn metrics(State(state): State<AdminState>) -> Json<Metrics> {
    Json(state.hub.metrics())
}
