//! Frames exchanged with the LiveQuery server. Every frame is a JSON object
//! whose `op` field names its kind.

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    Connect {
        application_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        javascript_key: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        master_key: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_token: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        installation_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Subscribe {
        request_id: u64,
        query: QueryFrame,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_token: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Unsubscribe { request_id: u64 },
}

impl ClientMessage {
    pub fn to_json_string(&self) -> String {
        // Serialising these frames cannot fail: every field is a string, number or JSON value.
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryFrame {
    pub class_name: String,
    #[serde(rename = "where")]
    pub where_clause: JsonMap<String, JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keys: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watch: Option<Vec<String>>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    Connected {
        #[serde(default)]
        client_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Subscribed { request_id: u64 },
    #[serde(rename_all = "camelCase")]
    Unsubscribed { request_id: u64 },
    #[serde(rename_all = "camelCase")]
    Error {
        #[serde(default)]
        code: Option<i64>,
        #[serde(default)]
        error: JsonValue,
        #[serde(default)]
        request_id: Option<u64>,
        #[serde(default)]
        reconnect: bool,
    },
    Create(EventFrame),
    Update(EventFrame),
    Enter(EventFrame),
    Leave(EventFrame),
    Delete(EventFrame),
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Payload of an object event frame.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFrame {
    #[serde(default)]
    pub client_id: Option<String>,
    pub request_id: u64,
    pub object: JsonMap<String, JsonValue>,
    #[serde(default)]
    pub original: Option<JsonMap<String, JsonValue>>,
}

/// Object event kinds carried by [`EventFrame`]s.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Create,
    Update,
    Enter,
    Leave,
    Delete,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Create => "create",
            EventKind::Update => "update",
            EventKind::Enter => "enter",
            EventKind::Leave => "leave",
            EventKind::Delete => "delete",
        }
    }
}
