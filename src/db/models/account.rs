use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Fields written by a light refresh. Everything else is only touched by a
/// full refresh.
pub const LIGHT_FIELDS: &[&str] = &[
    "name",
    "balance",
    "sbd_balance",
    "savings_balance",
    "savings_sbd_balance",
    "vesting_shares",
    "delegated_vesting_shares",
    "received_vesting_shares",
    "voting_power",
    "reputation",
    "post_count",
    "last_post",
    "last_root_post",
    "last_vote_time",
    "created",
];

/// How much of an account is re-fetched and written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshDepth {
    /// Name and a minimal field subset; cheap and always safe under load
    Light,
    /// Complete projection including follower/following relations
    Full,
}

/// Account projection stored in `accounts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub name: String,
    pub profile: Map<String, Value>,
    /// Only populated by full refreshes
    pub followers: Option<Vec<String>>,
    pub following: Option<Vec<String>>,
    pub updated_at: DateTime<Utc>,
    /// Time of the last full refresh, used to throttle repeated full refreshes
    pub full_updated_at: Option<DateTime<Utc>>,
}

impl Account {
    /// Light projection: the minimal subset, merged over whatever is stored.
    pub fn light(name: &str, snapshot: &Map<String, Value>) -> Self {
        let profile = snapshot
            .iter()
            .filter(|(k, _)| LIGHT_FIELDS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Self {
            name: name.to_string(),
            profile,
            followers: None,
            following: None,
            updated_at: Utc::now(),
            full_updated_at: None,
        }
    }

    /// Full projection: the whole snapshot plus relationship data.
    pub fn full(
        name: &str,
        snapshot: Map<String, Value>,
        followers: Vec<String>,
        following: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: name.to_string(),
            profile: snapshot,
            followers: Some(followers),
            following: Some(following),
            updated_at: now,
            full_updated_at: Some(now),
        }
    }

    /// True if a full refresh happened within `min_age`.
    pub fn fully_refreshed_within(&self, min_age: chrono::Duration, now: DateTime<Utc>) -> bool {
        self.full_updated_at
            .is_some_and(|at| now.signed_duration_since(at) < min_age)
    }
}
