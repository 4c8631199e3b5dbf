use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::db::models::Operation;

/// One entry of an account's history, unique on `(account, index)`.
///
/// `index` is assigned by the ledger per account and strictly increases, so
/// the highest stored index doubles as the backfill cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountOperation {
    pub account: String,
    pub index: u64,
    pub op_type: String,
    pub block_num: u64,
    pub trx_id: String,
    pub timestamp: DateTime<Utc>,
    pub body: Map<String, Value>,
}

impl AccountOperation {
    pub fn new(account: &str, index: u64, op: Operation) -> Self {
        Self {
            account: account.to_string(),
            index,
            op_type: op.op_type,
            block_num: op.block_num,
            trx_id: op.trx_id,
            timestamp: op.timestamp,
            body: op.body,
        }
    }
}
