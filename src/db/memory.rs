//! In-memory store backend.
//!
//! Mirrors the uniqueness rules of the Postgres schema so idempotence can be
//! tested without a database. All data is lost when the process exits.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{
    db::{
        models::{Account, AccountOperation, Block, Checkpoint, Operation, Post, RefreshDepth},
        store::{OperationQuery, Store},
    },
    error::StoreError,
};

#[derive(Default)]
struct Tables {
    checkpoints: HashMap<String, Checkpoint>,
    operations: BTreeMap<String, Operation>,
    blocks: HashMap<String, Block>,
    accounts: HashMap<String, Account>,
    account_operations: BTreeMap<(String, u64), AccountOperation>,
    posts: HashMap<String, Post>,
    comments: HashMap<String, Post>,
}

/// In-memory implementation of [`Store`].
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

fn duplicate(collection: &str, key: impl Into<String>) -> StoreError {
    StoreError::DuplicateKey {
        collection: collection.to_string(),
        key: key.into(),
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> std::sync::MutexGuard<'_, Tables> {
        // A panic while holding the lock only happens in a failing test.
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn operation_count(&self) -> usize {
        self.tables().operations.len()
    }

    pub fn operations(&self) -> Vec<Operation> {
        self.tables().operations.values().cloned().collect()
    }

    pub fn block_count(&self) -> usize {
        self.tables().blocks.len()
    }

    pub fn block_at(&self, block_num: u64) -> Option<Block> {
        self.tables()
            .blocks
            .values()
            .find(|b| b.block_num == block_num)
            .cloned()
    }

    pub fn account(&self, name: &str) -> Option<Account> {
        self.tables().accounts.get(name).cloned()
    }

    pub fn account_operation_indexes(&self, account: &str) -> Vec<u64> {
        self.tables()
            .account_operations
            .keys()
            .filter(|(a, _)| a == account)
            .map(|(_, i)| *i)
            .collect()
    }

    pub fn post(&self, identifier: &str) -> Option<Post> {
        self.tables().posts.get(identifier).cloned()
    }

    pub fn comment(&self, identifier: &str) -> Option<Post> {
        self.tables().comments.get(identifier).cloned()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn migrate(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn load_checkpoint(&self, stream: &str) -> Result<Option<Checkpoint>, StoreError> {
        Ok(self.tables().checkpoints.get(stream).cloned())
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        self.tables()
            .checkpoints
            .insert(checkpoint.stream.clone(), checkpoint.clone());
        Ok(())
    }

    async fn insert_operation(&self, op: &Operation) -> Result<(), StoreError> {
        let id = op.id();
        let mut tables = self.tables();
        if tables.operations.contains_key(&id) {
            return Err(duplicate("operations", id));
        }
        tables.operations.insert(id, op.clone());
        Ok(())
    }

    async fn find_operations(&self, query: &OperationQuery) -> Result<Vec<Operation>, StoreError> {
        let mut ops: Vec<Operation> = self
            .tables()
            .operations
            .values()
            .filter(|op| query.matches(op))
            .cloned()
            .collect();
        ops.sort_by_key(|op| (op.block_num, op.trx_in_block, op.op_in_trx, op.virtual_op));
        Ok(ops)
    }

    async fn operation_ids_in_block(&self, block_num: u64) -> Result<Vec<String>, StoreError> {
        Ok(self
            .tables()
            .operations
            .iter()
            .filter(|(_, op)| op.block_num == block_num)
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn delete_operations(&self, ids: &[String]) -> Result<u64, StoreError> {
        let mut tables = self.tables();
        Ok(ids
            .iter()
            .filter(|id| tables.operations.remove(*id).is_some())
            .count() as u64)
    }

    async fn insert_block(&self, block: &Block) -> Result<(), StoreError> {
        let mut tables = self.tables();
        if tables.blocks.contains_key(&block.block_id) {
            return Err(duplicate("blocks", block.block_id.clone()));
        }
        if tables
            .blocks
            .values()
            .any(|b| b.previous_block_id == block.previous_block_id)
        {
            return Err(StoreError::Conflict {
                collection: "blocks".to_string(),
                key: format!("previous {}", block.previous_block_id),
            });
        }
        tables.blocks.insert(block.block_id.clone(), block.clone());
        Ok(())
    }

    async fn block_id_exists(&self, block_id: &str) -> Result<bool, StoreError> {
        Ok(self.tables().blocks.contains_key(block_id))
    }

    async fn block_ids_at(&self, block_num: u64) -> Result<Vec<String>, StoreError> {
        Ok(self
            .tables()
            .blocks
            .values()
            .filter(|b| b.block_num == block_num)
            .map(|b| b.block_id.clone())
            .collect())
    }

    async fn delete_blocks(&self, block_ids: &[String]) -> Result<u64, StoreError> {
        let mut tables = self.tables();
        Ok(block_ids
            .iter()
            .filter(|id| tables.blocks.remove(*id).is_some())
            .count() as u64)
    }

    async fn last_block_num(&self) -> Result<Option<u64>, StoreError> {
        Ok(self.tables().blocks.values().map(|b| b.block_num).max())
    }

    async fn upsert_account(
        &self,
        account: &Account,
        depth: RefreshDepth,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables();
        match (depth, tables.accounts.get_mut(&account.name)) {
            (RefreshDepth::Light, Some(existing)) => {
                for (k, v) in &account.profile {
                    existing.profile.insert(k.clone(), v.clone());
                }
                existing.updated_at = account.updated_at;
            },
            _ => {
                tables.accounts.insert(account.name.clone(), account.clone());
            },
        }
        Ok(())
    }

    async fn find_account(&self, name: &str) -> Result<Option<Account>, StoreError> {
        Ok(self.tables().accounts.get(name).cloned())
    }

    async fn insert_account_operation(&self, op: &AccountOperation) -> Result<(), StoreError> {
        let key = (op.account.clone(), op.index);
        let mut tables = self.tables();
        if tables.account_operations.contains_key(&key) {
            return Err(duplicate(
                "account_operations",
                format!("{}/{}", op.account, op.index),
            ));
        }
        tables.account_operations.insert(key, op.clone());
        Ok(())
    }

    async fn highest_account_operation_index(
        &self,
        account: &str,
    ) -> Result<Option<u64>, StoreError> {
        Ok(self
            .tables()
            .account_operations
            .keys()
            .filter(|(a, _)| a == account)
            .map(|(_, i)| *i)
            .max())
    }

    async fn upsert_post(&self, post: &Post) -> Result<(), StoreError> {
        let mut tables = self.tables();
        let table = if post.depth == 0 {
            &mut tables.posts
        } else {
            &mut tables.comments
        };
        table.insert(post.identifier.clone(), post.clone());
        Ok(())
    }

    async fn mark_post_deleted(&self, identifier: &str) -> Result<u64, StoreError> {
        let mut tables = self.tables();
        let Tables {
            posts, comments, ..
        } = &mut *tables;
        let mut marked = 0;
        for table in [posts, comments] {
            if let Some(post) = table.get_mut(identifier) {
                post.is_deleted = true;
                marked += 1;
            }
        }
        Ok(marked)
    }
}
