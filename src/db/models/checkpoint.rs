use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Position of a stream cursor.
///
/// Block-driven streams advance by height; the alphabetical account scan
/// advances by username.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Position {
    Height(u64),
    Token(String),
}

impl Position {
    pub fn as_height(&self) -> Option<u64> {
        match self {
            Self::Height(h) => Some(*h),
            Self::Token(_) => None,
        }
    }

    pub fn as_token(&self) -> Option<&str> {
        match self {
            Self::Token(t) => Some(t),
            Self::Height(_) => None,
        }
    }
}

/// Durable per-stream progress marker.
///
/// Only written after the work up to `position` has been applied, so a
/// restart re-processes a small overlap instead of skipping anything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub stream: String,
    pub position: Position,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(stream: impl Into<String>, position: Position) -> Self {
        Self {
            stream: stream.into(),
            position,
            updated_at: Utc::now(),
        }
    }
}
