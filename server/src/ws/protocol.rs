use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::pairs::{engine, ClientPairDto};
use crate::state::AppState;

/// A request frame: `{"request_id": "...", "call": ...}`.
#[derive(Debug, Deserialize)]
pub struct ClientRequest {
    #[serde(default)]
    pub request_id: String,
    pub call: ClientCall,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientCall {
    DeleteAccount,
    GetOnlineCharacters,
    GetPairedClients,
    PushCharacterData {
        data: Value,
        #[serde(default)]
        visible_characters: Vec<String>,
    },
    AddPair {
        uid: String,
    },
    SetPairPause {
        uid: String,
        paused: bool,
    },
    RemovePair {
        uid: String,
    },
}

/// Events pushed to an account outside of any request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    UpdateClientPair {
        pair: ClientPairDto,
        character_ident: String,
    },
    AddOnlinePairedPlayer {
        character_ident: String,
    },
    RemoveOnlinePairedPlayer {
        character_ident: String,
    },
    ReceiveCharacterData {
        data: Value,
        character_ident: String,
    },
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: u16,
    pub message: String,
}

/// Reply to one request. Exactly one of `result` and `error` is set.
#[derive(Debug, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

/// Handle an incoming text frame.
/// Decodes the request, dispatches it, and sends the response frame.
pub async fn handle_text_message(
    text: &str,
    tx: &mpsc::UnboundedSender<Message>,
    state: &AppState,
    user_id: &str,
) {
    let request: ClientRequest = match serde_json::from_str(text) {
        Ok(req) => req,
        Err(e) => {
            tracing::warn!(
                user_id = %user_id,
                error = %e,
                "Failed to decode request frame"
            );
            send_error(tx, "", 400, "Invalid request frame");
            return;
        }
    };

    let request_id = request.request_id;

    match dispatch_call(request.call, state, user_id).await {
        Ok(result) => send_result(tx, &request_id, result),
        Err(e) => {
            tracing::error!(
                user_id = %user_id,
                request_id = %request_id,
                error = %e,
                "Pairing call failed"
            );
            send_error(tx, &request_id, 500, "Internal server error");
        }
    }
}

/// Route a decoded call to the pairing engine.
async fn dispatch_call(
    call: ClientCall,
    state: &AppState,
    user_id: &str,
) -> Result<Value, crate::db::DbError> {
    let result = match call {
        ClientCall::DeleteAccount => {
            engine::delete_account(state, user_id).await?;
            Value::Null
        }
        ClientCall::GetOnlineCharacters => {
            let idents = engine::get_online_characters(state, user_id).await?;
            serde_json::json!(idents)
        }
        ClientCall::GetPairedClients => {
            let pairs = engine::get_paired_clients(state, user_id).await?;
            serde_json::json!(pairs)
        }
        ClientCall::PushCharacterData {
            data,
            visible_characters,
        } => {
            engine::push_character_data(state, user_id, data, visible_characters).await?;
            Value::Null
        }
        ClientCall::AddPair { uid } => {
            engine::add_pair(state, user_id, &uid).await?;
            Value::Null
        }
        ClientCall::SetPairPause { uid, paused } => {
            engine::set_pair_pause(state, user_id, &uid, paused).await?;
            Value::Null
        }
        ClientCall::RemovePair { uid } => {
            engine::remove_pair(state, user_id, &uid).await?;
            Value::Null
        }
    };

    Ok(result)
}

fn send_frame(tx: &mpsc::UnboundedSender<Message>, frame: &ResponseFrame) {
    match serde_json::to_string(frame) {
        Ok(json) => {
            let _ = tx.send(Message::Text(json.into()));
        }
        Err(e) => tracing::error!(error = %e, "Failed to encode response frame"),
    }
}

fn send_result(tx: &mpsc::UnboundedSender<Message>, request_id: &str, result: Value) {
    send_frame(
        tx,
        &ResponseFrame {
            request_id: request_id.to_string(),
            result: Some(result),
            error: None,
        },
    );
}

/// Send an error frame to the client.
pub fn send_error(tx: &mpsc::UnboundedSender<Message>, request_id: &str, code: u16, message: &str) {
    send_frame(
        tx,
        &ResponseFrame {
            request_id: request_id.to_string(),
            result: None,
            error: Some(ErrorBody {
                code,
                message: message.to_string(),
            }),
        },
    );
}
