use crate::live::config::Config;
use crate::live::consts::{API_KEY_PARAM, LIVE_PATH};
use crate::types::live::ServerMessage;
use secrecy::ExposeSecret;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;

pub fn build_request(config: &Config) -> tokio_tungstenite::tungstenite::Result<Request> {
    format!(
        "{}/{}?{}={}",
        config.base_url(),
        LIVE_PATH,
        API_KEY_PARAM,
        config.api_key().expose_secret()
    )
    .into_client_request()
}

/// Parses one server frame. Text and binary frames both carry JSON.
pub fn decode_server_message(payload: &[u8]) -> serde_json::Result<ServerMessage> {
    serde_json::from_slice(payload)
}

/// Top-level keys of a frame, for logging.
pub fn message_kinds(message: &ServerMessage) -> Vec<&'static str> {
    let mut kinds = Vec::new();
    if message.setup_complete.is_some() {
        kinds.push("setupComplete");
    }
    if message.server_content.is_some() {
        kinds.push("serverContent");
    }
    if message.tool_call.is_some() {
        kinds.push("toolCall");
    }
    if message.tool_call_cancellation.is_some() {
        kinds.push("toolCallCancellation");
    }
    if message.go_away.is_some() {
        kinds.push("goAway");
    }
    kinds
}
