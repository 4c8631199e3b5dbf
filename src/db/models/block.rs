use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{db::models::operation::parse_steem_time, error::LedgerError};

/// `previous` of the genesis block.
pub const GENESIS_PREVIOUS: &str = "0000000000000000000000000000000000000000";

/// A full block as stored in `blocks`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub block_num: u64,
    pub block_id: String,
    pub previous_block_id: String,
    pub timestamp: DateTime<Utc>,
    pub witness: String,
    /// Transactions and remaining header fields as returned by the node
    pub payload: Map<String, Value>,
}

/// Block as returned by `get_block`.
#[derive(Debug, Deserialize)]
pub struct RawBlock {
    pub block_id: String,
    pub previous: String,
    pub timestamp: String,
    #[serde(default)]
    pub witness: String,
    #[serde(default)]
    pub block_num: Option<u64>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

/// Block height encoded in the first four bytes of a block id.
pub fn block_num_from_id(block_id: &str) -> Result<u64, LedgerError> {
    let prefix = block_id.get(..8).ok_or_else(|| LedgerError::Decode {
        what: format!("block id {block_id}"),
        reason: "shorter than 8 hex characters".to_string(),
    })?;
    u64::from_str_radix(prefix, 16).map_err(|e| LedgerError::Decode {
        what: format!("block id {block_id}"),
        reason: e.to_string(),
    })
}

impl TryFrom<RawBlock> for Block {
    type Error = LedgerError;

    fn try_from(raw: RawBlock) -> Result<Self, Self::Error> {
        let block_num = match raw.block_num {
            Some(n) => n,
            None => block_num_from_id(&raw.block_id)?,
        };
        Ok(Self {
            block_num,
            timestamp: parse_steem_time(&raw.timestamp)?,
            block_id: raw.block_id,
            previous_block_id: raw.previous,
            witness: raw.witness,
            payload: raw.rest,
        })
    }
}

impl Block {
    /// Blocks above genesis must link to a persisted parent.
    pub fn requires_parent(&self) -> bool {
        self.block_num > 1
    }

    pub fn transaction_count(&self) -> usize {
        self.payload
            .get("transactions")
            .and_then(Value::as_array)
            .map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn derives_height_from_block_id() {
        let raw: RawBlock = serde_json::from_value(json!({
            "block_id": "0000006400000000000000000000000000000000",
            "previous": "0000006300000000000000000000000000000000",
            "timestamp": "2016-03-24T16:10:00",
            "witness": "initminer",
            "transactions": [{"operations": []}]
        }))
        .unwrap();
        let block = Block::try_from(raw).unwrap();
        assert_eq!(block.block_num, 100);
        assert_eq!(block.transaction_count(), 1);
        assert!(block.requires_parent());
    }

    #[test]
    fn rejects_short_block_id() {
        assert!(block_num_from_id("abc").is_err());
    }
}
