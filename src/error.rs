//! Error types for the ingestion pipeline.
//!
//! Component boundaries return these typed errors so callers can tell the
//! taxonomy apart: transient ledger faults are retried, not-found is a no-op,
//! duplicate keys confirm prior work, and integrity faults stop ingestion.
//! Worker entry points wrap them in `anyhow` for logging.

use thiserror::Error;

/// Errors returned by the remote ledger client.
#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    #[error("transport error talking to {node}: {reason}")]
    Transport { node: String, reason: String },

    #[error("RPC error {code} from {method}: {message}")]
    Rpc {
        method: String,
        code: i64,
        message: String,
    },

    #[error("failed to decode {what}: {reason}")]
    Decode { what: String, reason: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("request cancelled")]
    Cancelled,
}

impl LedgerError {
    /// Network hiccups, timeouts and node-side overload are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            // -32603 internal error, -32000 server error, -32001/-32003 node overload
            Self::Rpc { code, .. } => matches!(code, -32603 | -32000 | -32001 | -32003),
            Self::Decode { .. } | Self::NotFound(_) | Self::Cancelled => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Errors returned by the persistent store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate key in {collection}: {key}")]
    DuplicateKey { collection: String, key: String },

    /// A different row already holds a unique secondary key.
    #[error("conflicting row in {collection}: {key}")]
    Conflict { collection: String, key: String },

    #[error("store backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateKey { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl From<tokio_postgres::Error> for StoreError {
    fn from(e: tokio_postgres::Error) -> Self {
        Self::Backend(format!("{e:#}"))
    }
}

impl From<deadpool_postgres::PoolError> for StoreError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        Self::Backend(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Chain linkage and tree-shape violations.
///
/// These are never retried in place: the local copy disagrees with the
/// ledger and needs reconciling.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IntegrityFault {
    #[error("block {block_num} references missing previous block {previous_block_id}")]
    MissingAncestor {
        block_num: u64,
        previous_block_id: String,
    },

    #[error("comment {identifier} revisits {repeated} while walking to its root")]
    CommentCycle {
        identifier: String,
        repeated: String,
    },

    #[error("comment {identifier} exceeds the maximum chain depth of {max_depth}")]
    ChainTooDeep { identifier: String, max_depth: usize },

    #[error("comment {identifier} has depth {depth} but no parent")]
    OrphanComment { identifier: String, depth: u32 },
}

/// Top-level error for pipeline components.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("integrity fault: {0}")]
    Integrity(#[from] IntegrityFault),
}

impl SyncError {
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity(_))
    }

    pub fn integrity(&self) -> Option<&IntegrityFault> {
        match self {
            Self::Integrity(fault) => Some(fault),
            _ => None,
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        let transport = LedgerError::Transport {
            node: "https://node".into(),
            reason: "connection reset".into(),
        };
        assert!(transport.is_transient());

        let overloaded = LedgerError::Rpc {
            method: "condenser_api.get_block".into(),
            code: -32003,
            message: "busy".into(),
        };
        assert!(overloaded.is_transient());

        let invalid = LedgerError::Rpc {
            method: "condenser_api.get_block".into(),
            code: -32602,
            message: "invalid params".into(),
        };
        assert!(!invalid.is_transient());
        assert!(!LedgerError::NotFound("alice".into()).is_transient());
    }

    #[test]
    fn integrity_is_detectable_through_sync_error() {
        let err: SyncError = IntegrityFault::MissingAncestor {
            block_num: 101,
            previous_block_id: "abc".into(),
        }
        .into();
        assert!(err.is_integrity());
        assert!(matches!(
            err.integrity(),
            Some(IntegrityFault::MissingAncestor { block_num: 101, .. })
        ));
    }
}
