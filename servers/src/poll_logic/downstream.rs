use anyhow::{Context, Result};
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use axum_server::tls_rustls::RustlsConfig;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::poll_logic::config::Config;
use crate::poll_logic::model::ServerMessage;
use crate::poll_logic::routes;
use crate::poll_logic::state::AppState;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Serves the API until a shutdown signal arrives, then closes the hub so
/// every live WebSocket session ends.
pub async fn run(config: Config, app_state: AppState, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
    let hub = app_state.hub.clone();
    let app = routes::router(app_state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port()));

    if let Some((cert_path, key_path)) = config.tls_paths() {
        let tls_config = RustlsConfig::from_pem_file(cert_path, key_path)
            .await
            .context("failed to load TLS configuration")?;
        let handle = axum_server::Handle::new();
        let shutdown_handle = handle.clone();
        tokio::spawn(async move {
            shutdown.recv().await.ok();
            info!("Poll server shutting down");
            hub.close();
            shutdown_handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
        });

        info!("Poll server listening on https://{}", addr);
        axum_server::bind_rustls(addr, tls_config)
            .handle(handle)
            .serve(app.into_make_service())
            .await
            .context("TLS server failed")?;
    } else {
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        info!("Poll server listening on http://{}", addr);
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.recv().await.ok();
                info!("Poll server shutting down");
                hub.close();
            })
            .await
            .context("server failed")?;
    }
    Ok(())
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn send_json(socket: &mut WebSocket, message: &ServerMessage<'_>) -> bool {
    match serde_json::to_string(message) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!("Failed to encode server message: {}", e);
            true
        }
    }
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    // Registered before the greeting, so anything committed after the client
    // reads "connected" reaches it.
    let mut subscription = state.hub.subscribe();
    let client_id = subscription.id();
    info!("Client {} connected", client_id);

    if !send_json(&mut socket, &ServerMessage::connected()).await {
        info!("Client {} disconnected", client_id);
        return;
    }

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Text(text))) => {
                        debug!("Client {} sent ignored text frame ({} bytes)", client_id, text.len());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("Client {} socket error: {}", client_id, e);
                        break;
                    }
                }
            }
            snapshot = subscription.recv() => {
                let Some(snapshot) = snapshot else {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                };
                if !send_json(&mut socket, &ServerMessage::poll_updated(&snapshot)).await {
                    break;
                }
            }
        }
    }

    drop(subscription);
    info!("Client {} disconnected", client_id);
}
