//! ==============================================================================
//! server.rs - web server for both dashboards
//! ==============================================================================
//!
//! routes:
//!     GET /             history chart page
//!     GET /api/series   current series snapshot, mean and mean line (json)
//!     GET /api/status   poll loop counters (json)
//!     GET /live         live gauge page
//!     GET /ws           websocket, one json frame per broker message
//!
//! relationships:
//!     - reads: poller.rs (SharedState), live.rs (LiveFeed)
//!     - uses: render.rs (views and pages)
//!
//! ==============================================================================

use std::net::SocketAddr;

use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::{Html, Json, Response},
    routing::get,
    Router,
};
use tokio::signal;
use tokio::sync::broadcast::{self, error::RecvError};
use tower_http::cors::CorsLayer;

use crate::live::{LiveEvent, LiveFeed};
use crate::poller::{PollStatus, SharedState};
use crate::render::{self, ChartView};

#[derive(Clone)]
pub struct AppContext {
    pub state: SharedState,
    pub live: LiveFeed,
    /// attribute name shown on the history chart
    pub attribute: String,
    /// how often the history page pulls /api/series
    pub refresh_ms: u64,
}

pub fn router(ctx: AppContext) -> Router {
    Router::new()
        .route("/", get(history_handler))
        .route("/api/series", get(series_handler))
        .route("/api/status", get(status_handler))
        .route("/live", get(live_handler))
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

pub async fn run_server(addr: SocketAddr, ctx: AppContext) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("[SERVER] ✓ Dashboard live at http://{}", addr);

    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("[SERVER] Shut down gracefully");
    Ok(())
}

/// resolves on SIGINT or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("[SERVER] Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("[SERVER] Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("[SERVER] Received SIGINT, shutting down"),
        _ = terminate => tracing::info!("[SERVER] Received SIGTERM, shutting down"),
    }
}

// ==============================================================================
// handlers
// ==============================================================================

async fn history_handler(State(ctx): State<AppContext>) -> Html<String> {
    Html(render::history_page(&ctx.attribute, ctx.refresh_ms))
}

async fn live_handler() -> Html<String> {
    Html(render::live_page())
}

/// json snapshot for the history chart
async fn series_handler(State(ctx): State<AppContext>) -> Json<ChartView> {
    // clone the arc and let go of the lock before building the view
    let series = ctx.state.read().await.series.clone();
    Json(ChartView::from_series(&ctx.attribute, &series))
}

async fn status_handler(State(ctx): State<AppContext>) -> Json<PollStatus> {
    Json(ctx.state.read().await.status.clone())
}

async fn ws_handler(ws: WebSocketUpgrade, State(ctx): State<AppContext>) -> Response {
    let rx = ctx.live.subscribe();
    ws.on_upgrade(move |socket| forward_events(socket, rx))
}

/// push live events to one viewer until either side goes away
async fn forward_events(mut socket: WebSocket, mut rx: broadcast::Receiver<LiveEvent>) {
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(event) => {
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::warn!("[WS] ⚠ Failed to encode event: {}", e);
                            continue;
                        }
                    };
                    if socket.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("[WS] ⚠ Viewer lagging, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    tracing::debug!("[WS] viewer disconnected");
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{parse_batch, RawRecord};
    use crate::poller::AppState;
    use crate::series::Series;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use chrono_tz::Europe::Lisbon;
    use futures_util::StreamExt;
    use std::sync::Arc;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tower::ServiceExt;

    fn context() -> AppContext {
        AppContext {
            state: SharedState::default(),
            live: LiveFeed::new(),
            attribute: "luminosity".to_string(),
            refresh_ms: 5000,
        }
    }

    async fn get_json(app: Router, uri: &str) -> serde_json::Value {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_series_empty() {
        let json = get_json(router(context()), "/api/series").await;
        assert_eq!(json["attribute"], "luminosity");
        assert_eq!(json["values"], serde_json::json!([]));
        assert!(json.get("mean").is_none());
    }

    #[tokio::test]
    async fn test_series_snapshot() {
        let ctx = context();
        let readings = parse_batch(
            &[
                RawRecord::new("10", "2024-01-01 12:00:00.000000"),
                RawRecord::new("10", "2024-01-01 12:00:01"),
            ],
            Lisbon,
        )
        .unwrap();
        *ctx.state.write().await = AppState {
            series: Arc::new(Series::new().merged(&readings)),
            ..AppState::default()
        };

        let json = get_json(router(ctx), "/api/series").await;
        assert_eq!(json["values"], serde_json::json!([10.0, 10.0]));
        assert_eq!(json["mean"], 10.0);
        assert_eq!(json["mean_line"]["from"], "2024-01-01T12:00:00+00:00");
        assert_eq!(json["mean_line"]["to"], "2024-01-01T12:00:01+00:00");
    }

    #[tokio::test]
    async fn test_status() {
        let ctx = context();
        ctx.state.write().await.status.ticks = 3;

        let json = get_json(router(ctx), "/api/status").await;
        assert_eq!(json["ticks"], 3);
        assert_eq!(json["last_error"], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn test_pages_served() {
        for uri in ["/", "/live"] {
            let response = router(context())
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            assert!(String::from_utf8_lossy(&bytes).starts_with("<!DOCTYPE html>"));
        }
    }

    #[tokio::test]
    async fn test_ws_requires_upgrade() {
        let response = router(context())
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }

    /// serve the full router on a free local port, return the /ws url
    async fn spawn_server(ctx: AppContext) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(ctx)).await.unwrap();
        });
        format!("ws://{}/ws", addr)
    }

    async fn next_text<S>(ws: &mut S) -> String
    where
        S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        let frame = tokio::time::timeout(std::time::Duration::from_secs(5), ws.next())
            .await
            .expect("no frame within 5s")
            .unwrap()
            .unwrap();
        match frame {
            WsMessage::Text(text) => text,
            other => panic!("expected a text frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ws_viewer_receives_published_event() {
        let ctx = context();
        let url = spawn_server(ctx.clone()).await;
        let (mut ws, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();

        ctx.live.publish("/TEF/hosp200/attrs/l", br#"{"z":1,"a":2}"#);

        assert_eq!(
            next_text(&mut ws).await,
            r#"{"event":"novo_dado_luminosidade","topic":"/TEF/hosp200/attrs/l","valor":{"z":1,"a":2}}"#
        );
    }

    #[tokio::test]
    async fn test_ws_late_viewer_gets_no_history() {
        let ctx = context();
        let url = spawn_server(ctx.clone()).await;

        // published before anyone is connected
        ctx.live.publish("/TEF/hosp200/attrs/t", b"19");

        let (mut ws, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        ctx.live.publish("/TEF/hosp200/attrs/t", b"20");

        let frame: serde_json::Value = serde_json::from_str(&next_text(&mut ws).await).unwrap();
        assert_eq!(frame["event"], "novo_dado_temperatura");
        assert_eq!(frame["valor"], 20);
    }
}
