use crate::live_status::{LiveStatus, LIVE_STATUS_FILE};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tokio::net::TcpListener;
use tokio::time::sleep;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
struct AppState {
    status_file: PathBuf,
}

/// Routes serving the tracker's live status from `data_dir`
pub fn router(data_dir: PathBuf) -> Router {
    let state = AppState {
        status_file: data_dir.join(LIVE_STATUS_FILE),
    };

    Router::new()
        .route("/api/status", get(status_handler))
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(data_dir: PathBuf, port: u16) -> std::io::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    log::info!("[dashboard] listening on http://{}", addr);
    axum::serve(listener, router(data_dir)).await
}

async fn status_handler(State(state): State<AppState>) -> Response {
    match tokio::fs::read_to_string(&state.status_file).await {
        Ok(content) => match serde_json::from_str::<LiveStatus>(&content) {
            Ok(status) => Json(status).into_response(),
            Err(e) => {
                log::warn!("[dashboard] unreadable status file: {}", e);
                (StatusCode::SERVICE_UNAVAILABLE, "status file is being written").into_response()
            }
        },
        Err(_) => (StatusCode::NOT_FOUND, "tracker has not written a status yet").into_response(),
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let mut last_mtime = SystemTime::UNIX_EPOCH;

    loop {
        let modified = tokio::fs::metadata(&state.status_file)
            .await
            .and_then(|m| m.modified())
            .ok();

        if let Some(mtime) = modified.filter(|m| *m > last_mtime) {
            if let Ok(content) = tokio::fs::read_to_string(&state.status_file).await {
                // Forward only complete documents
                if let Ok(status) = serde_json::from_str::<LiveStatus>(&content) {
                    last_mtime = mtime;
                    if let Ok(json) = serde_json::to_string(&status) {
                        if socket.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        // 2Hz polling, matches the tracker's status cadence
        sleep(Duration::from_millis(500)).await;
    }
}
