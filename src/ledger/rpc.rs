//! `condenser_api` JSON-RPC client over HTTP.
//!
//! Transient faults are retried with exponential backoff, rotating to the next
//! configured node on every retry.

use std::{
    sync::atomic::{AtomicU64, AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use futures::future::try_join_all;
use log::{debug, error, warn};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    config::LedgerSettings,
    db::models::{split_identifier, Block, Operation, Post, RawBlock, RawOperation, RawPost},
    error::LedgerError,
    ledger::client::{AccountRelations, AccountSnapshot, LedgerClient},
};

/// Maximum page size accepted by `get_followers` / `get_following`.
const FOLLOW_PAGE: u32 = 1000;

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: &'a Value,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct GlobalProperties {
    last_irreversible_block_num: u64,
}

#[derive(Deserialize)]
struct FollowEntry {
    follower: String,
    following: String,
}

pub struct SteemRpcClient {
    http: reqwest::Client,
    nodes: Vec<String>,
    current: AtomicUsize,
    next_id: AtomicU64,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl SteemRpcClient {
    pub fn new(settings: &LedgerSettings) -> Result<Self, LedgerError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.request_timeout_ms))
            .build()
            .map_err(|e| LedgerError::Transport {
                node: "-".to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            http,
            nodes: settings.nodes.clone(),
            current: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            max_retries: settings.max_retries,
            retry_base_delay: Duration::from_millis(settings.retry_base_delay_ms),
        })
    }

    fn node(&self) -> &str {
        let idx = self.current.load(Ordering::Relaxed) % self.nodes.len().max(1);
        self.nodes.get(idx).map(String::as_str).unwrap_or_default()
    }

    fn rotate(&self) {
        self.current.fetch_add(1, Ordering::Relaxed);
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, LedgerError> {
        let method = format!("condenser_api.{method}");
        let mut attempt = 0u32;
        loop {
            let node = self.node().to_string();
            match self.call_once(&node, &method, &params).await {
                Ok(result) => {
                    return serde_json::from_value(result).map_err(|e| LedgerError::Decode {
                        what: method.clone(),
                        reason: e.to_string(),
                    });
                },
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.retry_base_delay * 2_u32.pow(attempt - 1);
                    warn!(
                        "{} failed on {} (attempt {}/{}): {}, retrying in {:?}",
                        method, node, attempt, self.max_retries, e, delay
                    );
                    self.rotate();
                    tokio::time::sleep(delay).await;
                },
                Err(e) => {
                    if e.is_transient() {
                        error!("{} failed after {} retries: {}", method, self.max_retries, e);
                    }
                    return Err(e);
                },
            }
        }
    }

    async fn call_once(&self, node: &str, method: &str, params: &Value) -> Result<Value, LedgerError> {
        let transport = |reason: String| LedgerError::Transport {
            node: node.to_string(),
            reason,
        };

        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };
        debug!("-> {} {}", method, params);

        let resp = self
            .http
            .post(node)
            .json(&request)
            .send()
            .await
            .map_err(|e| transport(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(transport(format!("HTTP {}", resp.status().as_u16())));
        }

        let body: RpcResponse = resp.json().await.map_err(|e| transport(e.to_string()))?;
        if let Some(err) = body.error {
            return Err(LedgerError::Rpc {
                method: method.to_string(),
                code: err.code,
                message: err.message,
            });
        }
        Ok(body.result.unwrap_or(Value::Null))
    }

    async fn get_block(&self, height: u64) -> Result<Block, LedgerError> {
        let raw: Option<RawBlock> = self.call("get_block", json!([height])).await?;
        let raw = raw.ok_or_else(|| LedgerError::NotFound(format!("block {height}")))?;
        Block::try_from(raw)
    }

    async fn follow_page(
        &self,
        method: &str,
        name: &str,
        start: &str,
    ) -> Result<Vec<FollowEntry>, LedgerError> {
        self.call(method, json!([name, start, "blog", FOLLOW_PAGE]))
            .await
    }

    /// Walk a follow list page by page. Each page after the first starts at
    /// the last name of the previous one, which is returned again.
    async fn follow_list(&self, method: &str, name: &str) -> Result<Vec<String>, LedgerError> {
        let pick = |e: FollowEntry| {
            if method == "get_followers" {
                e.follower
            } else {
                e.following
            }
        };

        let mut names: Vec<String> = Vec::new();
        loop {
            let start = names.last().cloned().unwrap_or_default();
            let page = self.follow_page(method, name, &start).await?;
            let page_len = page.len();
            let skip = usize::from(!start.is_empty());
            names.extend(page.into_iter().skip(skip).map(pick));
            if page_len < FOLLOW_PAGE as usize {
                return Ok(names);
            }
        }
    }
}

#[async_trait]
impl LedgerClient for SteemRpcClient {
    async fn head_height(&self) -> Result<u64, LedgerError> {
        let props: GlobalProperties = self
            .call("get_dynamic_global_properties", json!([]))
            .await?;
        Ok(props.last_irreversible_block_num)
    }

    async fn get_blocks(&self, heights: &[u64]) -> Result<Vec<Block>, LedgerError> {
        try_join_all(heights.iter().map(|h| self.get_block(*h))).await
    }

    async fn get_ops_in_block(&self, block_num: u64) -> Result<Vec<Operation>, LedgerError> {
        let raw: Vec<RawOperation> = self
            .call("get_ops_in_block", json!([block_num, false]))
            .await?;
        raw.into_iter().map(Operation::try_from).collect()
    }

    async fn get_account(&self, name: &str) -> Result<AccountSnapshot, LedgerError> {
        let accounts: Vec<AccountSnapshot> = self.call("get_accounts", json!([[name]])).await?;
        accounts
            .into_iter()
            .next()
            .ok_or_else(|| LedgerError::NotFound(format!("account {name}")))
    }

    async fn get_account_relations(&self, name: &str) -> Result<AccountRelations, LedgerError> {
        Ok(AccountRelations {
            followers: self.follow_list("get_followers", name).await?,
            following: self.follow_list("get_following", name).await?,
        })
    }

    async fn get_account_history(
        &self,
        name: &str,
        from: Option<u64>,
        limit: u32,
    ) -> Result<Vec<(u64, Operation)>, LedgerError> {
        // -1 asks for the newest entries
        let from = from.map_or(-1, |f| f as i64);
        let raw: Vec<(u64, RawOperation)> = self
            .call("get_account_history", json!([name, from, limit]))
            .await?;
        let mut history = raw
            .into_iter()
            .map(|(index, op)| Ok((index, Operation::try_from(op)?)))
            .collect::<Result<Vec<_>, LedgerError>>()?;
        history.sort_by_key(|(index, _)| *index);
        Ok(history)
    }

    async fn get_post(&self, identifier: &str) -> Result<Post, LedgerError> {
        let (author, permlink) = split_identifier(identifier)
            .ok_or_else(|| LedgerError::NotFound(identifier.to_string()))?;
        let raw: RawPost = self.call("get_content", json!([author, permlink])).await?;
        raw.into_post(identifier)
    }

    async fn lookup_accounts(
        &self,
        lower_bound: &str,
        limit: u32,
    ) -> Result<Vec<String>, LedgerError> {
        self.call("lookup_accounts", json!([lower_bound, limit])).await
    }
}
