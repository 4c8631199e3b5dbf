use std::sync::Arc;

use log::{debug, error};

use crate::{
    db::{
        models::{Account, AccountOperation, Block, Operation, Post, RefreshDepth},
        sanitize::{sanitize_map, sanitize_string},
        store::Store,
    },
    error::StoreError,
};

/// Result of an idempotent insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The record was already persisted; treated as confirmation, not failure
    AlreadyPresent,
}

impl InsertOutcome {
    pub fn is_inserted(self) -> bool {
        matches!(self, Self::Inserted)
    }
}

/// Single write path into the store.
///
/// Every record passes through key sanitization before it reaches the
/// backend, and unique-key collisions on append-only collections are folded
/// into [`InsertOutcome::AlreadyPresent`].
#[derive(Clone)]
pub struct Writer {
    store: Arc<dyn Store>,
}

fn fold_duplicate(result: Result<(), StoreError>) -> Result<InsertOutcome, StoreError> {
    match result {
        Ok(()) => Ok(InsertOutcome::Inserted),
        Err(e) if e.is_duplicate() => {
            debug!("{e}");
            Ok(InsertOutcome::AlreadyPresent)
        },
        Err(e) => {
            error!("Store write failed: {e}");
            Err(e)
        },
    }
}

impl Writer {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn insert_operation(&self, op: Operation) -> Result<InsertOutcome, StoreError> {
        let op = Operation {
            body: sanitize_map(op.body),
            trx_id: sanitize_string(&op.trx_id),
            ..op
        };
        fold_duplicate(self.store.insert_operation(&op).await)
    }

    pub async fn insert_block(&self, block: Block) -> Result<InsertOutcome, StoreError> {
        let block = Block {
            payload: sanitize_map(block.payload),
            ..block
        };
        fold_duplicate(self.store.insert_block(&block).await)
    }

    pub async fn insert_account_operation(
        &self,
        op: AccountOperation,
    ) -> Result<InsertOutcome, StoreError> {
        let op = AccountOperation {
            body: sanitize_map(op.body),
            ..op
        };
        fold_duplicate(self.store.insert_account_operation(&op).await)
    }

    pub async fn upsert_account(
        &self,
        account: Account,
        depth: RefreshDepth,
    ) -> Result<(), StoreError> {
        let account = Account {
            profile: sanitize_map(account.profile),
            ..account
        };
        self.store.upsert_account(&account, depth).await
    }

    pub async fn upsert_post(&self, post: Post) -> Result<(), StoreError> {
        let post = Post {
            body: sanitize_map(post.body),
            ..post
        };
        self.store.upsert_post(&post).await
    }

    pub async fn mark_post_deleted(&self, identifier: &str) -> Result<u64, StoreError> {
        self.store.mark_post_deleted(identifier).await
    }

    pub async fn delete_operations(&self, ids: &[String]) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.store.delete_operations(ids).await
    }

    pub async fn delete_blocks(&self, block_ids: &[String]) -> Result<u64, StoreError> {
        if block_ids.is_empty() {
            return Ok(0);
        }
        self.store.delete_blocks(block_ids).await
    }
}
