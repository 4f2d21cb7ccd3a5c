use crate::pulse_logic::config::Config;
use crate::pulse_logic::state::{AppState, SettingsView};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use lib_pulse::configs::SettingsPatch;
use lib_pulse::core::{HubMessage, StatusSnapshot};
use std::net::SocketAddr;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};

pub fn router(app_state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/settings", get(get_settings_handler).post(post_settings_handler))
        .layer(cors)
        .with_state(app_state)
}

pub async fn run(
    config: Config,
    app_state: AppState,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind downstream server to {}", addr))?;
    log::info!("Downstream server listening on {}", addr);

    axum::serve(listener, router(app_state).into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            shutdown.recv().await.ok();
            log::info!("Downstream server shutting down.");
        })
        .await?;
    Ok(())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, peer, state))
}

async fn health_handler() -> impl IntoResponse {
    (axum::http::StatusCode::OK, "OK")
}

async fn status_handler(State(state): State<AppState>) -> Json<StatusSnapshot> {
    Json(state.status())
}

async fn get_settings_handler(State(state): State<AppState>) -> Json<SettingsView> {
    Json(state.settings_view())
}

async fn post_settings_handler(
    State(state): State<AppState>,
    Json(patch): Json<SettingsPatch>,
) -> Json<SettingsView> {
    Json(state.apply_settings(patch))
}

/// One overlay session: a channel sink on the dispatcher, forwarded as JSON
/// text frames until either side goes away.
async fn handle_socket(socket: WebSocket, peer: SocketAddr, state: AppState) {
    let label = format!("ws:{}", peer);
    let (sink_id, mut updates) = state.dispatcher.add_client(&label);
    let (mut sender, mut receiver) = socket.split();

    // Current status first; samples start with the next broadcast.
    let greeting = HubMessage::Status(state.status());
    if send_json(&mut sender, &greeting).await.is_err() {
        state.dispatcher.remove_sink(sink_id);
        return;
    }

    loop {
        tokio::select! {
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            update = updates.recv() => match update {
                Some(message) => {
                    if send_json(&mut sender, message.as_ref()).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }

    state.dispatcher.remove_sink(sink_id);
    log::info!("Client {} disconnected", peer);
}

async fn send_json<S>(sender: &mut S, message: &HubMessage) -> Result<()>
where
    S: futures_util::Sink<Message, Error = axum::Error> + Unpin,
{
    let text = serde_json::to_string(message)?;
    sender.send(Message::Text(text.into())).await?;
    Ok(())
}
