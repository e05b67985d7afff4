/// dispatcher status structs
///
use serde::{Deserialize, Serialize};

pub type JsonString = String;

pub const OK: &str = "ok";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatcherState {
    #[default]
    Idle,
    Busy,
    Broken,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchKind {
    Direct,
    Pooled,
    Buffered,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherStatus {
    pub id: String,
    pub listener_id: u64,
    pub kind: DispatchKind,
    pub status: String,
    pub state: DispatcherState,
    pub uptime: String,
    pub pending: usize,
    pub error_count: u64,
}

impl DispatcherStatus {
    pub fn new(
        id: String,
        listener_id: u64,
        kind: DispatchKind,
        state: DispatcherState,
        uptime: String,
        pending: usize,
        error_count: u64,
    ) -> DispatcherStatus {
        let status = match state {
            DispatcherState::Broken => "errors",
            _ => OK,
        };

        DispatcherStatus {
            id,
            listener_id,
            kind,
            status: status.to_string(),
            state,
            uptime,
            pending,
            error_count,
        }
    }
}

/// serialize a status value, never failing
pub fn to_json<T: Serialize>(value: &T) -> JsonString {
    match serde_json::to_string(value) {
        Ok(js) => js,
        Err(e) => format!(r#"{}"status":"json parse error: {:?}"{}"#, "{", e, "}"),
    }
}
