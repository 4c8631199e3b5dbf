//! Maps one ledger operation to the entities whose projections it touches.
//!
//! Pure and deterministic: no I/O, never fails. Unknown or malformed
//! operations classify to nothing.

use rustc_hash::FxHashSet;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::db::models::Operation;

/// Entities affected by one or more operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    pub accounts_light: FxHashSet<String>,
    pub accounts_full: FxHashSet<String>,
    /// `author/permlink` identifiers
    pub comments: FxHashSet<String>,
}

impl Classification {
    pub fn is_empty(&self) -> bool {
        self.accounts_light.is_empty() && self.accounts_full.is_empty() && self.comments.is_empty()
    }

    fn light(&mut self, name: &str) {
        if !name.is_empty() {
            self.accounts_light.insert(name.to_string());
        }
    }

    fn full(&mut self, name: &str) {
        if !name.is_empty() {
            self.accounts_full.insert(name.to_string());
        }
    }

    fn comment(&mut self, author: &str, permlink: &str) {
        if !author.is_empty() && !permlink.is_empty() {
            self.comments.insert(format!("{author}/{permlink}"));
        }
    }

    /// Set union. Duplicates collapse.
    pub fn merge(&mut self, other: Classification) {
        self.accounts_light.extend(other.accounts_light);
        self.accounts_full.extend(other.accounts_full);
        self.comments.extend(other.comments);
        self.normalize();
    }

    /// A full refresh supersedes a light one.
    pub fn normalize(&mut self) {
        let full = &self.accounts_full;
        self.accounts_light.retain(|name| !full.contains(name));
    }
}

#[derive(Debug, Default, Deserialize)]
struct Pow2Input {
    #[serde(default)]
    worker_account: String,
}

#[derive(Debug, Default, Deserialize)]
struct Pow2Work {
    #[serde(default)]
    input: Pow2Input,
}

/// The closed set of operation shapes the classifier understands.
///
/// Only fields naming affected parties are decoded; everything else in the
/// body is ignored.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum LedgerOp {
    Vote {
        #[serde(default)]
        voter: String,
        #[serde(default)]
        author: String,
        #[serde(default)]
        permlink: String,
    },
    Comment {
        #[serde(default)]
        author: String,
        #[serde(default)]
        permlink: String,
    },
    CommentOptions {
        #[serde(default)]
        author: String,
        #[serde(default)]
        permlink: String,
    },
    DeleteComment {
        #[serde(default)]
        author: String,
        #[serde(default)]
        permlink: String,
    },
    Transfer {
        #[serde(default)]
        from: String,
        #[serde(default)]
        to: String,
    },
    TransferToVesting {
        #[serde(default)]
        from: String,
        #[serde(default)]
        to: String,
    },
    TransferToSavings {
        #[serde(default)]
        from: String,
        #[serde(default)]
        to: String,
    },
    TransferFromSavings {
        #[serde(default)]
        from: String,
        #[serde(default)]
        to: String,
    },
    CancelTransferFromSavings {
        #[serde(default)]
        from: String,
    },
    WithdrawVesting {
        #[serde(default)]
        account: String,
    },
    SetWithdrawVestingRoute {
        #[serde(default)]
        from_account: String,
        #[serde(default)]
        to_account: String,
    },
    DelegateVestingShares {
        #[serde(default)]
        delegator: String,
        #[serde(default)]
        delegatee: String,
    },
    LimitOrderCreate {
        #[serde(default)]
        owner: String,
    },
    LimitOrderCreate2 {
        #[serde(default)]
        owner: String,
    },
    LimitOrderCancel {
        #[serde(default)]
        owner: String,
    },
    Convert {
        #[serde(default)]
        owner: String,
    },
    FeedPublish {
        #[serde(default)]
        publisher: String,
    },
    AccountCreate {
        #[serde(default)]
        creator: String,
        #[serde(default)]
        new_account_name: String,
    },
    AccountCreateWithDelegation {
        #[serde(default)]
        creator: String,
        #[serde(default)]
        new_account_name: String,
    },
    CreateClaimedAccount {
        #[serde(default)]
        creator: String,
        #[serde(default)]
        new_account_name: String,
    },
    ClaimAccount {
        #[serde(default)]
        creator: String,
    },
    AccountUpdate {
        #[serde(default)]
        account: String,
    },
    AccountUpdate2 {
        #[serde(default)]
        account: String,
    },
    WitnessUpdate {
        #[serde(default)]
        owner: String,
    },
    AccountWitnessVote {
        #[serde(default)]
        account: String,
        #[serde(default)]
        witness: String,
    },
    AccountWitnessProxy {
        #[serde(default)]
        account: String,
        #[serde(default)]
        proxy: String,
    },
    Pow {
        #[serde(default)]
        worker_account: String,
    },
    Pow2 {
        /// `[variant, {input: {worker_account}}]`; the variant tag is either
        /// a name or a numeric index depending on the node
        #[serde(default)]
        work: Option<(Value, Pow2Work)>,
    },
    CustomJson {
        #[serde(default)]
        id: String,
        #[serde(default)]
        required_auths: Vec<String>,
        #[serde(default)]
        required_posting_auths: Vec<String>,
        #[serde(default)]
        json: Value,
    },
    EscrowTransfer {
        #[serde(default)]
        from: String,
        #[serde(default)]
        to: String,
        #[serde(default)]
        agent: String,
    },
    EscrowApprove {
        #[serde(default)]
        from: String,
        #[serde(default)]
        to: String,
        #[serde(default)]
        agent: String,
    },
    EscrowDispute {
        #[serde(default)]
        from: String,
        #[serde(default)]
        to: String,
        #[serde(default)]
        agent: String,
    },
    EscrowRelease {
        #[serde(default)]
        from: String,
        #[serde(default)]
        to: String,
        #[serde(default)]
        agent: String,
    },
    RequestAccountRecovery {
        #[serde(default)]
        recovery_account: String,
        #[serde(default)]
        account_to_recover: String,
    },
    RecoverAccount {
        #[serde(default)]
        account_to_recover: String,
    },
    ChangeRecoveryAccount {
        #[serde(default)]
        account_to_recover: String,
        #[serde(default)]
        new_recovery_account: String,
    },
    DeclineVotingRights {
        #[serde(default)]
        account: String,
    },
    ClaimRewardBalance {
        #[serde(default)]
        account: String,
    },

    // virtual operations
    AuthorReward {
        #[serde(default)]
        author: String,
        #[serde(default)]
        permlink: String,
    },
    CurationReward {
        #[serde(default)]
        curator: String,
        #[serde(default)]
        comment_author: String,
        #[serde(default)]
        comment_permlink: String,
    },
    CommentBenefactorReward {
        #[serde(default)]
        benefactor: String,
        #[serde(default)]
        author: String,
        #[serde(default)]
        permlink: String,
    },
    FillConvertRequest {
        #[serde(default)]
        owner: String,
    },
    FillOrder {
        #[serde(default)]
        current_owner: String,
        #[serde(default)]
        open_owner: String,
    },
    FillVestingWithdraw {
        #[serde(default)]
        from_account: String,
        #[serde(default)]
        to_account: String,
    },
    FillTransferFromSavings {
        #[serde(default)]
        from: String,
        #[serde(default)]
        to: String,
    },
    Interest {
        #[serde(default)]
        owner: String,
    },
    LiquidityReward {
        #[serde(default)]
        owner: String,
    },
    ProducerReward {
        #[serde(default)]
        producer: String,
    },
    ReturnVestingDelegation {
        #[serde(default)]
        account: String,
    },
    ShutdownWitness {
        #[serde(default)]
        owner: String,
    },

    #[serde(other)]
    Unknown,
}

/// Embedded command of a `custom_json` with id `follow`.
fn follow_command(json: &Value) -> Option<(String, Map<String, Value>)> {
    let parsed;
    let value = match json {
        Value::String(raw) => {
            parsed = serde_json::from_str::<Value>(raw).ok()?;
            &parsed
        },
        other => other,
    };
    let (command, args) = match value.as_array()?.as_slice() {
        [Value::String(command), Value::Object(args)] => (command.clone(), args.clone()),
        _ => return None,
    };
    Some((command, args))
}

fn str_field<'a>(args: &'a Map<String, Value>, key: &str) -> &'a str {
    args.get(key).and_then(Value::as_str).unwrap_or_default()
}

/// Classify one persisted operation.
pub fn classify(op: &Operation) -> Classification {
    let parsed = serde_json::from_value::<LedgerOp>(op.tagged_body()).unwrap_or(LedgerOp::Unknown);
    let mut c = Classification::default();

    use LedgerOp::*;
    match parsed {
        Vote {
            voter,
            author,
            permlink,
        } => {
            c.light(&voter);
            c.comment(&author, &permlink);
        },
        // Comment bodies are high volume; keep only the payout view fresh.
        Comment { author, permlink } | CommentOptions { author, permlink } => {
            c.comment(&author, &permlink);
        },
        DeleteComment { author, permlink } => {
            c.light(&author);
            c.comment(&author, &permlink);
        },
        Transfer { from, to }
        | TransferToVesting { from, to }
        | TransferToSavings { from, to }
        | TransferFromSavings { from, to }
        | FillTransferFromSavings { from, to } => {
            c.light(&from);
            c.light(&to);
        },
        CancelTransferFromSavings { from } => c.light(&from),
        WithdrawVesting { account }
        | DeclineVotingRights { account }
        | ClaimRewardBalance { account }
        | ReturnVestingDelegation { account } => c.light(&account),
        SetWithdrawVestingRoute {
            from_account,
            to_account,
        }
        | FillVestingWithdraw {
            from_account,
            to_account,
        } => {
            c.light(&from_account);
            c.light(&to_account);
        },
        DelegateVestingShares {
            delegator,
            delegatee,
        } => {
            c.light(&delegator);
            c.light(&delegatee);
        },
        LimitOrderCreate { owner }
        | LimitOrderCreate2 { owner }
        | LimitOrderCancel { owner }
        | Convert { owner }
        | FillConvertRequest { owner }
        | Interest { owner }
        | LiquidityReward { owner }
        | WitnessUpdate { owner }
        | ShutdownWitness { owner } => c.light(&owner),
        FeedPublish { publisher } => c.light(&publisher),
        ProducerReward { producer } => c.light(&producer),
        FillOrder {
            current_owner,
            open_owner,
        } => {
            c.light(&current_owner);
            c.light(&open_owner);
        },
        AccountCreate {
            creator,
            new_account_name,
        }
        | AccountCreateWithDelegation {
            creator,
            new_account_name,
        }
        | CreateClaimedAccount {
            creator,
            new_account_name,
        } => {
            c.light(&creator);
            c.full(&new_account_name);
        },
        ClaimAccount { creator } => c.light(&creator),
        AccountUpdate { account } | AccountUpdate2 { account } => c.full(&account),
        AccountWitnessVote { account, witness } => {
            c.light(&account);
            c.light(&witness);
        },
        AccountWitnessProxy { account, proxy } => {
            c.light(&account);
            c.light(&proxy);
        },
        Pow { worker_account } => c.light(&worker_account),
        Pow2 { work } => {
            if let Some((_, work)) = work {
                c.light(&work.input.worker_account);
            }
        },
        CustomJson {
            id,
            required_auths,
            required_posting_auths,
            json,
        } => {
            if let Some(signer) = required_posting_auths.first().or(required_auths.first()) {
                c.light(signer);
            }
            if id == "follow" {
                match follow_command(&json) {
                    Some((command, args)) if command == "follow" => {
                        c.full(str_field(&args, "follower"));
                        c.full(str_field(&args, "following"));
                    },
                    Some((command, args)) if command == "reblog" => {
                        c.light(str_field(&args, "account"));
                        c.comment(str_field(&args, "author"), str_field(&args, "permlink"));
                    },
                    _ => {},
                }
            }
        },
        EscrowTransfer { from, to, agent }
        | EscrowApprove { from, to, agent }
        | EscrowDispute { from, to, agent }
        | EscrowRelease { from, to, agent } => {
            c.light(&from);
            c.light(&to);
            c.light(&agent);
        },
        RequestAccountRecovery {
            recovery_account,
            account_to_recover,
        } => {
            c.light(&recovery_account);
            c.light(&account_to_recover);
        },
        RecoverAccount { account_to_recover } => c.full(&account_to_recover),
        ChangeRecoveryAccount {
            account_to_recover,
            new_recovery_account,
        } => {
            c.light(&account_to_recover);
            c.light(&new_recovery_account);
        },
        AuthorReward { author, permlink } => {
            c.light(&author);
            c.comment(&author, &permlink);
        },
        CurationReward {
            curator,
            comment_author,
            comment_permlink,
        } => {
            c.light(&curator);
            c.comment(&comment_author, &comment_permlink);
        },
        CommentBenefactorReward {
            benefactor,
            author,
            permlink,
        } => {
            c.light(&benefactor);
            c.comment(&author, &permlink);
        },
        Unknown => {},
    }

    c.normalize();
    c
}

/// Union of the classifications of every operation in `ops`.
pub fn classify_all<'a>(ops: impl IntoIterator<Item = &'a Operation>) -> Classification {
    let mut merged = Classification::default();
    for op in ops {
        merged.merge(classify(op));
    }
    merged
}
