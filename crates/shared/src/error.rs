//! Error types shared by the real-time client and its transports.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::GroupKey;

/// Errors surfaced by the real-time order client.
///
/// Only connection-level variants ever reach a caller. `GroupOperationFailed`
/// is produced for logging at the registry boundary and is never returned
/// from `join`/`leave`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RealtimeError {
    #[error("an authentication token is required to connect")]
    AuthenticationRequired,
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("connection lost after {attempts} reconnect attempts")]
    ConnectionLost { attempts: u32 },
    #[error("{target} for {group} failed: {reason}")]
    GroupOperationFailed {
        group: GroupKey,
        target: String,
        reason: String,
    },
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl RealtimeError {
    pub fn transport(detail: impl std::fmt::Display) -> Self {
        RealtimeError::Transport(detail.to_string())
    }
}

pub type RealtimeResult<T> = Result<T, RealtimeError>;

/// RFC7807 Problem Details (application/problem+json)
///
/// The hub answers rejected HTTP command posts with this body; the SSE
/// transport turns it into a readable rejection reason.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProblemDetails {
    /// A URI reference that identifies the problem type.
    #[serde(rename = "type", default)]
    pub type_url: String,
    /// A short, human-readable summary of the problem type.
    #[serde(default)]
    pub title: String,
    /// HTTP status code.
    pub status: u16,
    /// Human-readable explanation specific to this occurrence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Attempt to parse an RFC7807 (or RFC7807-ish) JSON body into a user-facing message.
/// Prefers `detail`, falls back to `title`.
pub fn try_problem_detail(body: &str) -> Option<String> {
    let parsed = serde_json::from_str::<ProblemDetails>(body).ok()?;
    if let Some(detail) = parsed.detail {
        if !detail.trim().is_empty() {
            return Some(detail);
        }
    }
    if !parsed.title.trim().is_empty() {
        return Some(parsed.title);
    }
    None
}
