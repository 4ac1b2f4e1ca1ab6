use lib_polls::PollSnapshot;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub option_index: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateResponse {
    pub message: String,
    pub poll: PollSnapshot,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub store: &'static str,
    pub subscribers: usize,
    pub busy_polls: usize,
    pub dropped_snapshots: u64,
    pub uptime_secs: u64,
}

/// Frame pushed to WebSocket clients.
#[derive(Debug, Clone, Serialize)]
pub struct ServerMessage<'a> {
    pub r#type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'a PollSnapshot>,
}

impl<'a> ServerMessage<'a> {
    pub const CONNECTED: &'static str = "connected";
    pub const POLL_UPDATED: &'static str = "pollUpdated";

    pub fn connected() -> Self {
        Self {
            r#type: Self::CONNECTED,
            message: None,
        }
    }

    pub fn poll_updated(snapshot: &'a PollSnapshot) -> Self {
        Self {
            r#type: Self::POLL_UPDATED,
            message: Some(snapshot),
        }
    }
}
