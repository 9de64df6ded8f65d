use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use crate::auth::middleware::Claims;
use crate::pairs::engine;
use crate::state::AppState;
use crate::ws::protocol;
use crate::ws::ConnectionSender;

/// Ping interval: server sends WebSocket ping every 30 seconds.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Pong timeout: if pong not received within 10 seconds after ping, close.
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Run the actor-per-connection pattern for an authenticated WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards messages from an mpsc channel
/// - Reader task: processes incoming requests, dispatches to the pairing engine
///
/// While the connection lives, the account's session registry entry is kept
/// fresh so admission rejects a second concurrent session.
pub async fn run_connection(socket: WebSocket, state: AppState, claims: Claims) {
    let user_id = claims.uid.clone();
    let character_ident = claims.character_ident.clone();

    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    register_connection(&state, &user_id, tx.clone());

    if let Err(e) = state
        .sessions
        .set(&user_id, &character_ident, state.session_ttl)
        .await
    {
        tracing::warn!(user_id = %user_id, error = %e, "Failed to claim session");
    }
    if let Err(e) = engine::mark_online(&state, &user_id, &character_ident).await {
        tracing::error!(user_id = %user_id, error = %e, "Failed to mark account online");
    }

    tracing::info!(
        user_id = %user_id,
        ident = %character_ident,
        "WebSocket actor started"
    );

    // Spawn writer task: forwards mpsc messages to WebSocket sink
    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    // Track pong reception
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();

    // Spawn ping task: sends periodic pings, monitors pongs and refreshes the session
    let ping_tx = tx.clone();
    let ping_sessions = state.sessions.clone();
    let ping_ttl = state.session_ttl;
    let ping_uid = user_id.clone();
    let ping_ident = character_ident.clone();
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(PING_INTERVAL);
        // Skip the first immediate tick
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            if let Err(e) = ping_sessions.set(&ping_uid, &ping_ident, ping_ttl).await {
                tracing::warn!(user_id = %ping_uid, error = %e, "Failed to refresh session");
            }

            if ping_tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                // Writer task has died, connection is gone
                break;
            }

            match timeout(PONG_TIMEOUT, pong_rx.recv()).await {
                Ok(Some(())) => {}
                _ => {
                    tracing::warn!(user_id = %ping_uid, "Pong timeout, closing connection");
                    let _ = ping_tx.send(Message::Close(Some(CloseFrame {
                        code: 1001,
                        reason: "Pong timeout".into(),
                    })));
                    break;
                }
            }
        }
    });

    // Reader loop: process incoming WebSocket messages
    loop {
        match ws_receiver.next().await {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    protocol::handle_text_message(text.as_str(), &tx, &state, &user_id).await;
                }
                Message::Binary(_) => {
                    tracing::debug!(user_id = %user_id, "Ignoring binary frame");
                    protocol::send_error(&tx, "", 400, "Binary frames are not supported");
                }
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(
                        user_id = %user_id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    user_id = %user_id,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                tracing::info!(user_id = %user_id, "WebSocket stream ended");
                break;
            }
        }
    }

    writer_handle.abort();
    ping_handle.abort();

    let has_remaining = unregister_connection(&state, &user_id, &tx);

    // Only go offline if this was the account's last connection
    if !has_remaining {
        if let Err(e) = state.sessions.remove(&user_id).await {
            tracing::warn!(user_id = %user_id, error = %e, "Failed to release session");
        }
        if let Err(e) = engine::mark_offline(&state, &user_id).await {
            tracing::error!(user_id = %user_id, error = %e, "Failed to mark account offline");
        }
    }

    tracing::info!(
        user_id = %user_id,
        ident = %character_ident,
        "WebSocket actor stopped"
    );
}

/// Writer task: receives messages from mpsc channel and forwards them to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if ws_sender.send(msg).await.is_err() {
            break;
        }
    }
}

/// Register a connection sender in the connection registry.
fn register_connection(state: &AppState, user_id: &str, tx: ConnectionSender) {
    let mut connections = state.connections.entry(user_id.to_string()).or_default();
    connections.push(tx);

    tracing::debug!(
        user_id = %user_id,
        connections = connections.len(),
        "Connection registered"
    );
}

/// Remove this connection (and any closed ones) from the registry.
/// Returns whether the account still has live connections.
fn unregister_connection(state: &AppState, user_id: &str, tx: &ConnectionSender) -> bool {
    let mut remaining = 0;

    if let Some(mut connections) = state.connections.get_mut(user_id) {
        connections.retain(|sender| !sender.same_channel(tx) && !sender.is_closed());
        remaining = connections.len();
    }

    if remaining == 0 {
        state
            .connections
            .remove_if(user_id, |_, connections| connections.is_empty());
    }

    tracing::debug!(
        user_id = %user_id,
        remaining = remaining,
        "Connection unregistered"
    );

    remaining > 0
}
