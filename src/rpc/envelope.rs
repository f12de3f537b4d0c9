//! Wire envelopes for tool calls
//!
//! Request: `POST /tool/{name}` with `{"arguments": {...}}`.
//! Success: 200 with `{"result": {...}}`.
//! Failure: non-200 with `{"error": {"code", "message", "details"}}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tool call request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub arguments: Value,
}

/// Tool call success body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResponse {
    pub result: Value,
}

/// Error payload carried in a non-success response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub details: Value,
}

/// Failure body wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireErrorBody {
    pub error: WireError,
}
