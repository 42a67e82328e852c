use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// A historical channel post tracked for republishing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BacklogEntry {
    pub message_id: i32,
    pub channel_id: i64,
    pub post_date: NaiveDateTime,
    pub content_preview: Option<String>,
    pub is_reposted: bool,
    pub reposted_at: Option<DateTime<Utc>>,
}

/// Connectivity of one Telegram client as reported by `/health`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClientStatus {
    Connected,
    Unauthorized,
    Disconnected,
    Error,
}

impl ClientStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientStatus::Connected => "connected",
            ClientStatus::Unauthorized => "unauthorized",
            ClientStatus::Disconnected => "disconnected",
            ClientStatus::Error => "error",
        }
    }
}

/// Lifecycle of the privileged user session within one process run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    ConnectedUnauthorized,
    AwaitingCode,
    Authenticated,
    Failed,
}
