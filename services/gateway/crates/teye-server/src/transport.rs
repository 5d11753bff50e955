//! HTTP/WebSocket surface.
//!
//! - `GET /` with an upgrade → command protocol over WebSocket
//!   (subprotocol `echo-protocol`)
//! - `GET /` without an upgrade → debug console, or an empty body
//! - `GET /health` → probe for load balancers / supervisors

use std::future::Future;
use std::net::SocketAddr;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::header;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Json, Router};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info};

use teye_common::OutboundEvent;

use crate::page::DEBUG_CONSOLE;
use crate::session::{CommandEngine, EVENT_BUFFER, Session};
use crate::state::AppState;

/// WebSocket subprotocol offered to clients.
pub const PROTOCOL: &str = "echo-protocol";

/// Largest inbound frame accepted, in bytes.
pub const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// Body of the `/health` probe.
#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub started_at: DateTime<Utc>,
    pub commands: usize,
}

/// Compose the axum router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .with_state(state)
}

/// Serve plain HTTP/WS on `listener` until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the accept loop fails.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}

async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    Json(HealthReport {
        status: "ok",
        started_at: state.started_at,
        commands: state.engine.catalog().len(),
    })
}

async fn root(
    State(state): State<AppState>,
    peer: Option<Extension<ConnectInfo<SocketAddr>>>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let peer = peer.map(|Extension(ConnectInfo(addr))| addr);
    match ws {
        Ok(ws) => {
            let engine = state.engine.clone();
            ws.protocols([PROTOCOL])
                .max_message_size(MAX_PAYLOAD_BYTES)
                .on_upgrade(move |socket| serve_socket(socket, engine, peer))
        }
        Err(_) if state.debug => Html(DEBUG_CONSOLE).into_response(),
        Err(_) => ([(header::CONTENT_TYPE, "text/plain")], "").into_response(),
    }
}

/// Drive one WebSocket connection until the client goes away.
async fn serve_socket(socket: WebSocket, engine: CommandEngine, peer: Option<SocketAddr>) {
    info!(peer = ?peer, "client connected");

    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<OutboundEvent>(EVENT_BUFFER);

    // Single writer keeps events in the order they were produced.
    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if sink.send(Message::Text(event.encode().into())).await.is_err() {
                break;
            }
        }
    });

    let mut session = Session::new(engine, tx);
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => session.on_message(text.as_str()).await,
            Ok(Message::Binary(bytes)) => {
                session.on_message(&String::from_utf8_lossy(&bytes)).await;
            }
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_) | Message::Pong(_)) => {}
            Err(err) => {
                debug!(peer = ?peer, error = %err, "websocket read failed");
                break;
            }
        }
    }

    drop(session);
    writer.abort();
    info!(peer = ?peer, "client disconnected");
}
