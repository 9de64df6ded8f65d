use axum::extract::ws::Message;
use serde::Serialize;

use super::ConnectionRegistry;

/// Send an event to a specific user (all their connections).
/// Users without a live connection are skipped; delivery is best-effort.
pub fn send_to_user<T: Serialize>(registry: &ConnectionRegistry, user_id: &str, event: &T) {
    let json = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(user_id = %user_id, error = %e, "Failed to encode event");
            return;
        }
    };
    let msg = Message::Text(json.into());

    if let Some(connections) = registry.get(user_id) {
        for sender in connections.value().iter() {
            let _ = sender.send(msg.clone());
        }
    }
}
