//! The persistent store capability.
//!
//! Implemented by [`PostgresClient`](crate::db::PostgresClient) in production
//! and by [`MemoryStore`](crate::db::MemoryStore) in tests. Inserts into
//! append-only collections report a unique-key collision as
//! [`StoreError::DuplicateKey`]; the [`Writer`](crate::db::Writer) decides
//! what that means.

use async_trait::async_trait;

use crate::{
    db::models::{Account, AccountOperation, Block, Checkpoint, Operation, Post, RefreshDepth},
    error::StoreError,
};

/// Range query over persisted operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationQuery {
    /// Exclusive lower bound
    pub after_block: u64,
    /// Inclusive upper bound
    pub to_block: u64,
    pub op_type: Option<String>,
}

impl OperationQuery {
    pub fn window(after_block: u64, to_block: u64) -> Self {
        Self {
            after_block,
            to_block,
            op_type: None,
        }
    }

    pub fn of_type(mut self, op_type: &str) -> Self {
        self.op_type = Some(op_type.to_string());
        self
    }

    pub fn matches(&self, op: &Operation) -> bool {
        op.block_num > self.after_block
            && op.block_num <= self.to_block
            && self.op_type.as_deref().map_or(true, |t| t == op.op_type)
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Apply schema and index declarations. Called once at startup.
    async fn migrate(&self) -> Result<(), StoreError>;

    // ==================== CHECKPOINTS ====================

    async fn load_checkpoint(&self, stream: &str) -> Result<Option<Checkpoint>, StoreError>;

    /// Last write wins.
    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StoreError>;

    // ==================== OPERATIONS ====================

    async fn insert_operation(&self, op: &Operation) -> Result<(), StoreError>;

    /// Operations in the window, ordered by block then in-block position.
    async fn find_operations(&self, query: &OperationQuery) -> Result<Vec<Operation>, StoreError>;

    async fn operation_ids_in_block(&self, block_num: u64) -> Result<Vec<String>, StoreError>;

    async fn delete_operations(&self, ids: &[String]) -> Result<u64, StoreError>;

    // ==================== BLOCKS ====================

    async fn insert_block(&self, block: &Block) -> Result<(), StoreError>;

    /// Indexed point lookup on `block_id`.
    async fn block_id_exists(&self, block_id: &str) -> Result<bool, StoreError>;

    async fn block_ids_at(&self, block_num: u64) -> Result<Vec<String>, StoreError>;

    async fn delete_blocks(&self, block_ids: &[String]) -> Result<u64, StoreError>;

    async fn last_block_num(&self) -> Result<Option<u64>, StoreError>;

    // ==================== ACCOUNTS ====================

    /// Light upserts merge the minimal fields over the stored profile and keep
    /// relations; full upserts replace the projection.
    async fn upsert_account(&self, account: &Account, depth: RefreshDepth)
        -> Result<(), StoreError>;

    async fn find_account(&self, name: &str) -> Result<Option<Account>, StoreError>;

    // ==================== ACCOUNT OPERATIONS ====================

    async fn insert_account_operation(&self, op: &AccountOperation) -> Result<(), StoreError>;

    async fn highest_account_operation_index(
        &self,
        account: &str,
    ) -> Result<Option<u64>, StoreError>;

    // ==================== POSTS / COMMENTS ====================

    /// Upsert into `posts` (depth 0) or `comments` (depth > 0).
    async fn upsert_post(&self, post: &Post) -> Result<(), StoreError>;

    /// Flag any stored post or comment with this identifier as deleted.
    async fn mark_post_deleted(&self, identifier: &str) -> Result<u64, StoreError>;
}
