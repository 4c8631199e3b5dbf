use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::LedgerError;

/// Timestamp format used by steemd (`2016-03-24T16:05:00`, always UTC).
const STEEM_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

pub fn parse_steem_time(raw: &str) -> Result<DateTime<Utc>, LedgerError> {
    NaiveDateTime::parse_from_str(raw.trim_end_matches('Z'), STEEM_TIME_FORMAT)
        .map(|t| t.and_utc())
        .map_err(|e| LedgerError::Decode {
            what: format!("timestamp {raw}"),
            reason: e.to_string(),
        })
}

/// One ledger operation (regular or virtual), as stored in `operations`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub block_num: u64,
    pub trx_id: String,
    pub trx_in_block: u32,
    pub op_in_trx: u32,
    pub virtual_op: u32,
    pub timestamp: DateTime<Utc>,
    pub op_type: String,
    /// Operation fields, e.g. `{"from": "alice", "to": "bob", ...}`
    pub body: Map<String, Value>,
}

/// Operation as returned by `get_ops_in_block` / `get_account_history`.
#[derive(Debug, Deserialize)]
pub struct RawOperation {
    #[serde(default)]
    pub trx_id: String,
    pub block: u64,
    #[serde(default)]
    pub trx_in_block: u32,
    #[serde(default)]
    pub op_in_trx: u32,
    #[serde(default)]
    pub virtual_op: u32,
    pub timestamp: String,
    /// `["transfer", {...}]`
    pub op: (String, Map<String, Value>),
}

impl TryFrom<RawOperation> for Operation {
    type Error = LedgerError;

    fn try_from(raw: RawOperation) -> Result<Self, Self::Error> {
        let (op_type, body) = raw.op;
        Ok(Self {
            block_num: raw.block,
            trx_id: raw.trx_id,
            trx_in_block: raw.trx_in_block,
            op_in_trx: raw.op_in_trx,
            virtual_op: raw.virtual_op,
            timestamp: parse_steem_time(&raw.timestamp)?,
            op_type,
            body,
        })
    }
}

impl Operation {
    /// Natural identity used as the store's unique key.
    ///
    /// Virtual operations share the all-zero `trx_id`, so the block number
    /// and in-block position are part of the key.
    pub fn id(&self) -> String {
        format!(
            "{}-{}-{}-{}-{}",
            self.block_num, self.trx_id, self.trx_in_block, self.op_in_trx, self.virtual_op
        )
    }

    /// Look up a string field of the operation body.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.body.get(name).and_then(Value::as_str)
    }

    /// `author/permlink` for operations that reference a post or comment.
    pub fn comment_identifier(&self) -> Option<String> {
        let author = self.field("author").or_else(|| self.field("comment_author"))?;
        let permlink = self
            .field("permlink")
            .or_else(|| self.field("comment_permlink"))?;
        if author.is_empty() || permlink.is_empty() {
            return None;
        }
        Some(format!("{author}/{permlink}"))
    }

    /// The body as a JSON object carrying its `type` tag, the shape the
    /// classifier decodes.
    pub fn tagged_body(&self) -> Value {
        let mut tagged = self.body.clone();
        tagged.insert("type".to_string(), Value::String(self.op_type.clone()));
        Value::Object(tagged)
    }
}
