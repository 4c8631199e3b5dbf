use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::{
    db::models::{Block, Operation, Post},
    error::LedgerError,
};

/// Raw `get_accounts` entry.
pub type AccountSnapshot = Map<String, Value>;

/// Follow graph of one account, fetched for full refreshes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountRelations {
    pub followers: Vec<String>,
    pub following: Vec<String>,
}

/// Read-only access to the remote ledger.
///
/// Implementations retry transient faults internally; anything they return
/// as an error has already exhausted its retries or is not retryable.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Last irreversible block height.
    async fn head_height(&self) -> Result<u64, LedgerError>;

    /// Blocks in the order requested. A missing block is `NotFound`.
    async fn get_blocks(&self, heights: &[u64]) -> Result<Vec<Block>, LedgerError>;

    /// All operations of one block, virtual ones included, in origin order.
    async fn get_ops_in_block(&self, block_num: u64) -> Result<Vec<Operation>, LedgerError>;

    async fn get_account(&self, name: &str) -> Result<AccountSnapshot, LedgerError>;

    async fn get_account_relations(&self, name: &str) -> Result<AccountRelations, LedgerError>;

    /// Up to `limit + 1` history entries with index `<= from` (`None` means the
    /// newest), ascending by index.
    async fn get_account_history(
        &self,
        name: &str,
        from: Option<u64>,
        limit: u32,
    ) -> Result<Vec<(u64, Operation)>, LedgerError>;

    /// `author/permlink` lookup. Unknown or deleted posts are `NotFound`.
    async fn get_post(&self, identifier: &str) -> Result<Post, LedgerError>;

    /// Account names in alphabetical order starting at `lower_bound`
    /// (inclusive).
    async fn lookup_accounts(&self, lower_bound: &str, limit: u32)
        -> Result<Vec<String>, LedgerError>;
}

/// Cheaply cloneable handle, owned by each worker.
pub type Ledger = Arc<dyn LedgerClient>;
