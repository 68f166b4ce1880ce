pub mod paths;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

/// Unique identifier for a session.
pub type SessionId = String;

/// Discriminant of an [`EventPayload`], also used as the SSE event name.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Status,
    Output,
    Input,
    Activity,
    Chat,
    Thought,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Status => "status",
            EventKind::Output => "output",
            EventKind::Input => "input",
            EventKind::Activity => "activity",
            EventKind::Chat => "chat",
            EventKind::Thought => "thought",
        }
    }
}

/// Lifecycle state carried by `status` events.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Started,
    Stopped,
}

/// Phase of a provider task reported by `activity` events.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStage {
    Start,
    Stream,
    Stderr,
    Error,
    Finish,
}

/// Author of a `chat` event.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    Assistant,
    System,
}

/// Kind-specific event body.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum EventPayload {
    Status {
        state: SessionState,
    },
    Output {
        text: String,
    },
    Input {
        text: String,
    },
    Activity {
        provider: String,
        stage: ActivityStage,
        detail: String,
    },
    Chat {
        role: ChatRole,
        text: String,
        provider: String,
    },
    Thought {
        provider: String,
        text: String,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Status { .. } => EventKind::Status,
            EventPayload::Output { .. } => EventKind::Output,
            EventPayload::Input { .. } => EventKind::Input,
            EventPayload::Activity { .. } => EventKind::Activity,
            EventPayload::Chat { .. } => EventKind::Chat,
            EventPayload::Thought { .. } => EventKind::Thought,
        }
    }
}

/// An event published on a session bus. Immutable once published.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Event {
    #[serde(flatten)]
    pub payload: EventPayload,
    pub timestamp_ms: u64,
}

impl Event {
    pub fn new(payload: EventPayload, timestamp_ms: u64) -> Self {
        Self {
            payload,
            timestamp_ms,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Payload fields plus `ts`, the body of one wire frame.
    pub fn wire_data(&self) -> Value {
        let mut data = match serde_json::to_value(&self.payload) {
            Ok(Value::Object(mut tagged)) => match tagged.remove("payload") {
                Some(Value::Object(fields)) => fields,
                _ => Map::new(),
            },
            _ => Map::new(),
        };
        data.insert("ts".to_string(), Value::from(self.timestamp_ms));
        Value::Object(data)
    }
}

/// Summary info returned by session list/create/info.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: SessionId,
    pub title: String,
    pub working_directory: PathBuf,
    pub alive: bool,
    pub created_at_epoch_ms: u64,
    pub pid: Option<u32>,
}

/// Error codes for structured error handling.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidPath,
    InvalidRequest,
    SessionNotFound,
    SessionNotRunning,
    UnsupportedProvider,
    EmptyPrompt,
    CliNotFound,
    Timeout,
    ProviderFailed,
    ServerError,
}

impl ErrorCode {
    /// HTTP status a routing layer should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::InvalidPath
            | ErrorCode::InvalidRequest
            | ErrorCode::UnsupportedProvider
            | ErrorCode::EmptyPrompt => 400,
            ErrorCode::SessionNotFound => 404,
            ErrorCode::SessionNotRunning => 409,
            ErrorCode::CliNotFound | ErrorCode::ProviderFailed => 502,
            ErrorCode::Timeout => 504,
            ErrorCode::ServerError => 500,
        }
    }
}
