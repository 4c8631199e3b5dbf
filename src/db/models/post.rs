use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{IntegrityFault, LedgerError};

/// Which projection a post-like record lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PostKind {
    /// `depth == 0`, stored in `posts`
    Root,
    /// `depth > 0`, stored in `comments`
    Comment,
}

/// Post or comment projection, keyed by `author/permlink`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub identifier: String,
    pub author: String,
    pub permlink: String,
    pub parent_identifier: Option<String>,
    pub depth: u32,
    pub is_deleted: bool,
    /// Remaining `get_content` fields (payouts, body, votes...)
    pub body: Map<String, Value>,
    pub updated_at: DateTime<Utc>,
}

/// Post as returned by `get_content`.
#[derive(Debug, Deserialize)]
pub struct RawPost {
    pub author: String,
    pub permlink: String,
    #[serde(default)]
    pub parent_author: String,
    #[serde(default)]
    pub parent_permlink: String,
    #[serde(default)]
    pub depth: u32,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

/// Split `author/permlink` (an optional leading `@` is accepted).
pub fn split_identifier(identifier: &str) -> Option<(&str, &str)> {
    let trimmed = identifier.strip_prefix('@').unwrap_or(identifier);
    let (author, permlink) = trimmed.split_once('/')?;
    if author.is_empty() || permlink.is_empty() {
        return None;
    }
    Some((author, permlink))
}

impl RawPost {
    /// steemd answers unknown posts with an all-empty object.
    pub fn into_post(self, requested: &str) -> Result<Post, LedgerError> {
        if self.author.is_empty() {
            return Err(LedgerError::NotFound(requested.to_string()));
        }
        let parent_identifier = if self.parent_author.is_empty() {
            None
        } else {
            Some(format!("{}/{}", self.parent_author, self.parent_permlink))
        };
        let mut body = self.rest;
        body.insert("parent_author".into(), Value::String(self.parent_author));
        body.insert("parent_permlink".into(), Value::String(self.parent_permlink));
        Ok(Post {
            identifier: format!("{}/{}", self.author, self.permlink),
            author: self.author,
            permlink: self.permlink,
            parent_identifier,
            depth: self.depth,
            is_deleted: false,
            body,
            updated_at: Utc::now(),
        })
    }
}

impl Post {
    /// Root posts have depth 0; anything deeper must name its parent.
    pub fn kind(&self) -> Result<PostKind, IntegrityFault> {
        match (self.depth, &self.parent_identifier) {
            (0, _) => Ok(PostKind::Root),
            (_, Some(_)) => Ok(PostKind::Comment),
            (depth, None) => Err(IntegrityFault::OrphanComment {
                identifier: self.identifier.clone(),
                depth,
            }),
        }
    }
}
