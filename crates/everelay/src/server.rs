//! HTTP entry point: content-negotiates the capability document against a
//! transport upgrade, then hands accepted sockets to the connection
//! handler.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::header::ACCEPT;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use everelay_proto::capability::wants_capability_document;
use everelay_store::Store;
use snafu::ResultExt as _;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::connection::handle_socket;
use crate::error::{BindSnafu, RelayResult, ServeSnafu};

const LOG_TARGET: &str = "everelay::server";

#[derive(Clone)]
struct AppState {
    store: Arc<Store>,
}

pub fn router(store: Arc<Store>) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { store })
}

async fn root_handler(
    ws: Option<WebSocketUpgrade>,
    headers: axum::http::HeaderMap,
    State(state): State<AppState>,
) -> Response {
    if wants_capability_document(headers.get(ACCEPT).and_then(|v| v.to_str().ok())) {
        return Json(capability_document()).into_response();
    }

    let Some(ws) = ws else {
        return Json(capability_document()).into_response();
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state.store))
        .into_response()
}

/// The relay's own capability metadata. Its schema is out of scope per
/// spec §1; this is the minimal self-description needed for the content
/// negotiation glue in §6 to be exercisable end to end.
fn capability_document() -> serde_json::Value {
    serde_json::json!({
        "name": "everelay",
        "supported_commands": [
            "EVENT", "REQ", "CLOSE", "CHANGES", "LASTSEQ", "CHANGES_SUB", "CHANGES_UNSUB",
        ],
    })
}

pub async fn run(listener: TcpListener, store: Arc<Store>) -> RelayResult<()> {
    let app = router(store);
    info!(target: LOG_TARGET, addr = ?listener.local_addr(), "listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context(ServeSnafu)?;
    Ok(())
}

pub async fn bind(addr: &str) -> RelayResult<TcpListener> {
    TcpListener::bind(addr).await.context(BindSnafu)
}


async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!(target: LOG_TARGET, "shutdown signal received, draining connections");
}
