use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Messages sent from a client to the sheet server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join a sheet by UUID; the server answers with a full snapshot.
    Join { uuid: String },
    /// A single-field edit on the joined sheet.
    Update { field: String, value: String },
}

/// Messages sent from the sheet server to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Full field snapshot, wire-named, sent right after a join.
    Init {
        data: serde_json::Map<String, serde_json::Value>,
    },
    /// A field edit made by another client on the same sheet.
    Update { field: String, value: String },
    /// Per-message failure report. The connection stays open.
    Error { message: String },
}

/// Generate a new sheet UUID.
pub fn generate_sheet_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generate a unique id for one WebSocket connection.
pub fn generate_client_id() -> String {
    Uuid::new_v4().to_string()
}
