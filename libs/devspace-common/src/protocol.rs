//! Wire messages exchanged over a session's WebSocket.
//!
//! Every frame is a JSON object discriminated by its `type` field.

use crate::types::RunRequest;
use serde::{Deserialize, Serialize};

/// Reply text for frames that cannot be decoded
pub const INVALID_MESSAGE: &str = "invalid message";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InboundMessage {
    #[serde(rename = "code:change")]
    CodeChange { filepath: String, code: String },
    #[serde(rename = "exec:run")]
    ExecRun(RunRequest),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundMessage {
    Saved {
        path: String,
    },
    Output {
        output: String,
        #[serde(rename = "exitCode", default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i64>,
    },
    Error {
        message: String,
    },
}

impl OutboundMessage {
    pub fn error(message: impl Into<String>) -> Self {
        OutboundMessage::Error {
            message: message.into(),
        }
    }

    pub fn invalid() -> Self {
        Self::error(INVALID_MESSAGE)
    }
}

pub fn decode_inbound(frame: &str) -> serde_json::Result<InboundMessage> {
    serde_json::from_str(frame)
}

pub fn decode_outbound(frame: &str) -> serde_json::Result<OutboundMessage> {
    serde_json::from_str(frame)
}

pub fn encode<T: Serialize>(message: &T) -> serde_json::Result<String> {
    serde_json::to_string(message)
}
