//! Scripted in-process ledger used by the test-suite.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Mutex,
};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::{json, Map, Value};

use crate::{
    db::models::{Block, Operation, Post, GENESIS_PREVIOUS},
    error::LedgerError,
    ledger::client::{AccountRelations, AccountSnapshot, LedgerClient},
};

#[derive(Default)]
struct FakeState {
    head: u64,
    blocks: BTreeMap<u64, Block>,
    ops: BTreeMap<u64, Vec<Operation>>,
    op_failures: HashMap<u64, LedgerError>,
    accounts: HashMap<String, AccountSnapshot>,
    failing_accounts: HashSet<String>,
    relations: HashMap<String, AccountRelations>,
    history: HashMap<String, Vec<(u64, Operation)>>,
    posts: HashMap<String, Post>,
    calls: Vec<String>,
}

#[derive(Default)]
pub struct FakeLedger {
    state: Mutex<FakeState>,
}

/// Id of block `height` on the canonical fake chain.
pub fn chain_block_id(height: u64) -> String {
    format!("{height:08x}{}", "a".repeat(32))
}

pub fn chain_block(height: u64) -> Block {
    let previous = if height <= 1 {
        GENESIS_PREVIOUS.to_string()
    } else {
        chain_block_id(height - 1)
    };
    Block {
        block_num: height,
        block_id: chain_block_id(height),
        previous_block_id: previous,
        timestamp: Utc
            .timestamp_opt(1_458_835_200 + height as i64 * 3, 0)
            .single()
            .unwrap_or_default(),
        witness: "initminer".into(),
        payload: Map::new(),
    }
}

/// Operation at `block_num` with the given type and body fields.
pub fn make_op(block_num: u64, op_type: &str, body: Value) -> Operation {
    Operation {
        block_num,
        trx_id: format!("trx{block_num:06}"),
        trx_in_block: 0,
        op_in_trx: 0,
        virtual_op: 0,
        timestamp: Utc::now(),
        op_type: op_type.to_string(),
        body: body.as_object().cloned().unwrap_or_default(),
    }
}

pub fn make_post(identifier: &str, parent: Option<&str>, depth: u32) -> Post {
    let (author, permlink) = identifier.split_once('/').unwrap_or((identifier, ""));
    Post {
        identifier: identifier.to_string(),
        author: author.to_string(),
        permlink: permlink.to_string(),
        parent_identifier: parent.map(str::to_string),
        depth,
        is_deleted: false,
        body: Map::new(),
        updated_at: Utc::now(),
    }
}

impl FakeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, call: String) {
        self.state().calls.push(call);
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn set_head(&self, head: u64) {
        self.state().head = head;
    }

    /// Replace the canonical block at its height.
    pub fn put_block(&self, block: Block) {
        self.state().blocks.insert(block.block_num, block);
    }

    pub fn push_op(&self, op: Operation) {
        self.state().ops.entry(op.block_num).or_default().push(op);
    }

    pub fn push_transfer(&self, block_num: u64, from: &str, to: &str) {
        self.push_op(make_op(
            block_num,
            "transfer",
            json!({"from": from, "to": to, "amount": "1.000 STEEM", "memo": ""}),
        ));
    }

    pub fn fail_ops_at(&self, block_num: u64, error: LedgerError) {
        self.state().op_failures.insert(block_num, error);
    }

    pub fn put_account(&self, name: &str, snapshot: Value) {
        self.state()
            .accounts
            .insert(name.to_string(), snapshot.as_object().cloned().unwrap_or_default());
    }

    /// Every lookup of this account fails with a transport error.
    pub fn fail_account(&self, name: &str) {
        self.state().failing_accounts.insert(name.to_string());
    }

    pub fn put_relations(&self, name: &str, followers: &[&str], following: &[&str]) {
        self.state().relations.insert(
            name.to_string(),
            AccountRelations {
                followers: followers.iter().map(|s| s.to_string()).collect(),
                following: following.iter().map(|s| s.to_string()).collect(),
            },
        );
    }

    /// History entries `0..count` for `name`, one per block.
    pub fn put_history(&self, name: &str, count: u64) {
        let entries = (0..count)
            .map(|i| (i, make_op(i + 1, "vote", json!({"voter": name, "author": "x", "permlink": "y"}))))
            .collect();
        self.state().history.insert(name.to_string(), entries);
    }

    pub fn put_post(&self, post: Post) {
        self.state().posts.insert(post.identifier.clone(), post);
    }

    fn account_lookup(&self, name: &str) -> Result<(), LedgerError> {
        if self.state().failing_accounts.contains(name) {
            return Err(LedgerError::Transport {
                node: "fake".into(),
                reason: format!("{name} unavailable"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerClient for FakeLedger {
    async fn head_height(&self) -> Result<u64, LedgerError> {
        Ok(self.state().head)
    }

    async fn get_blocks(&self, heights: &[u64]) -> Result<Vec<Block>, LedgerError> {
        self.record(format!("get_blocks {heights:?}"));
        let state = self.state();
        heights
            .iter()
            .map(|h| {
                if *h == 0 || *h > state.head {
                    return Err(LedgerError::NotFound(format!("block {h}")));
                }
                Ok(state.blocks.get(h).cloned().unwrap_or_else(|| chain_block(*h)))
            })
            .collect()
    }

    async fn get_ops_in_block(&self, block_num: u64) -> Result<Vec<Operation>, LedgerError> {
        self.record(format!("get_ops_in_block {block_num}"));
        let state = self.state();
        if let Some(e) = state.op_failures.get(&block_num) {
            return Err(e.clone());
        }
        Ok(state.ops.get(&block_num).cloned().unwrap_or_default())
    }

    async fn get_account(&self, name: &str) -> Result<AccountSnapshot, LedgerError> {
        self.record(format!("get_account {name}"));
        self.account_lookup(name)?;
        self.state()
            .accounts
            .get(name)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("account {name}")))
    }

    async fn get_account_relations(&self, name: &str) -> Result<AccountRelations, LedgerError> {
        self.record(format!("get_account_relations {name}"));
        self.account_lookup(name)?;
        Ok(self.state().relations.get(name).cloned().unwrap_or_default())
    }

    async fn get_account_history(
        &self,
        name: &str,
        from: Option<u64>,
        limit: u32,
    ) -> Result<Vec<(u64, Operation)>, LedgerError> {
        self.record(format!("get_account_history {name} {from:?} {limit}"));
        self.account_lookup(name)?;
        let state = self.state();
        let entries: Vec<(u64, Operation)> = state
            .history
            .get(name)
            .map(|h| {
                h.iter()
                    .filter(|(i, _)| from.map_or(true, |f| *i <= f))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        let keep = limit as usize + 1;
        let skip = entries.len().saturating_sub(keep);
        Ok(entries.into_iter().skip(skip).collect())
    }

    async fn get_post(&self, identifier: &str) -> Result<Post, LedgerError> {
        self.record(format!("get_post {identifier}"));
        self.state()
            .posts
            .get(identifier)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(identifier.to_string()))
    }

    async fn lookup_accounts(
        &self,
        lower_bound: &str,
        limit: u32,
    ) -> Result<Vec<String>, LedgerError> {
        self.record(format!("lookup_accounts {lower_bound} {limit}"));
        let mut names: Vec<String> = self
            .state()
            .accounts
            .keys()
            .filter(|n| n.as_str() >= lower_bound)
            .cloned()
            .collect();
        names.sort();
        names.truncate(limit as usize);
        Ok(names)
    }
}
