use std::time::Duration;

use chrono::Utc;
use log::{debug, info};
use moka::future::Cache;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::{
    config::RefreshSettings,
    db::{
        models::{Account, AccountOperation, Operation, PostKind, RefreshDepth},
        Database,
    },
    error::{IntegrityFault, LedgerError, SyncResult},
    ledger::Ledger,
};

/// Outcome of an account refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountRefresh {
    Written,
    /// Full refresh skipped, the stored projection is recent enough
    Skipped,
    /// The ledger does not know the account
    Missing,
}

/// How an account's history is brought up to date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryMode {
    /// One bounded call for the newest entries. Written only when it joins
    /// the stored history; otherwise left to `Backfill`
    Recent,
    /// Paginate forward from the highest stored index
    Backfill,
}

/// Re-reads entities from the ledger and persists them through the writer.
#[derive(Clone)]
pub struct EntityRefresher {
    ledger: Ledger,
    db: Database,
    settings: RefreshSettings,
    /// Identifiers the ledger recently answered NotFound for
    missing_posts: Cache<String, ()>,
}

impl EntityRefresher {
    pub fn new(ledger: Ledger, db: Database, settings: RefreshSettings) -> Self {
        let missing_posts = Cache::builder()
            .max_capacity(10_000)
            .time_to_live(Duration::from_secs(settings.missing_post_ttl_secs))
            .build();

        Self {
            ledger,
            db,
            settings,
            missing_posts,
        }
    }

    pub fn settings(&self) -> &RefreshSettings {
        &self.settings
    }

    pub async fn refresh_account(
        &self,
        name: &str,
        depth: RefreshDepth,
    ) -> SyncResult<AccountRefresh> {
        if depth == RefreshDepth::Full {
            let min_age = chrono::Duration::seconds(self.settings.full_refresh_min_age_secs as i64);
            if let Some(existing) = self.db.store.find_account(name).await? {
                if existing.fully_refreshed_within(min_age, Utc::now()) {
                    debug!("Skipping full refresh of @{name}, refreshed recently");
                    return Ok(AccountRefresh::Skipped);
                }
            }
        }

        let snapshot = match self.ledger.get_account(name).await {
            Ok(snapshot) => snapshot,
            Err(e) if e.is_not_found() => return Ok(AccountRefresh::Missing),
            Err(e) => return Err(e.into()),
        };

        let account = match depth {
            RefreshDepth::Light => Account::light(name, &snapshot),
            RefreshDepth::Full => {
                let relations = self.ledger.get_account_relations(name).await?;
                Account::full(name, snapshot, relations.followers, relations.following)
            },
        };
        self.db.writer.upsert_account(account, depth).await?;
        Ok(AccountRefresh::Written)
    }

    /// Insert history entries above the highest stored index. Returns the
    /// number of new entries.
    pub async fn refresh_account_history(&self, name: &str, mode: HistoryMode) -> SyncResult<u64> {
        let highest = self.db.store.highest_account_operation_index(name).await?;
        let batch = self.settings.history_batch_size;

        if mode == HistoryMode::Recent {
            let recent = match self.ledger.get_account_history(name, None, batch).await {
                Ok(recent) => recent,
                Err(e) if e.is_not_found() => return Ok(0),
                Err(e) => return Err(e.into()),
            };
            let Some(&(oldest, _)) = recent.first() else {
                return Ok(0);
            };
            // stored indexes stay a gapless prefix so backfill can resume above the highest
            let contiguous = match highest {
                None => oldest == 0,
                Some(h) => oldest <= h + 1,
            };
            if !contiguous {
                debug!("@{name} history has a gap above {highest:?}, left for backfill");
                return Ok(0);
            }
            return self.insert_history(name, highest, recent).await;
        }

        let mut inserted = 0;
        let mut start = highest.map_or(0, |h| h + 1);
        loop {
            let end = start + u64::from(batch);
            let page = match self.ledger.get_account_history(name, Some(end), batch).await {
                Ok(page) => page,
                Err(e) if e.is_not_found() => break,
                Err(e) => return Err(e.into()),
            };
            let last = page.last().map(|(index, _)| *index);
            inserted += self.insert_history(name, start.checked_sub(1), page).await?;
            match last {
                Some(last) if last >= end => start = end + 1,
                _ => break,
            }
        }
        Ok(inserted)
    }

    async fn insert_history(
        &self,
        name: &str,
        above: Option<u64>,
        entries: Vec<(u64, Operation)>,
    ) -> SyncResult<u64> {
        let mut inserted = 0;
        for (index, op) in entries {
            if above.is_some_and(|a| index <= a) {
                continue;
            }
            let outcome = self
                .db
                .writer
                .insert_account_operation(AccountOperation::new(name, index, op))
                .await?;
            if outcome.is_inserted() {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    /// Refresh a post or comment and, if `recursive`, every ancestor up to
    /// the root. Returns the identifiers written, target first.
    ///
    /// The walk is bounded by `max_chain_depth`; a revisited identifier is a
    /// cycle. Both are integrity faults.
    pub async fn refresh_comment_chain(
        &self,
        identifier: &str,
        recursive: bool,
    ) -> SyncResult<Vec<String>> {
        let mut written = Vec::new();
        let mut visited = FxHashSet::default();
        let mut current = identifier.to_string();

        loop {
            if !visited.insert(current.clone()) {
                return Err(IntegrityFault::CommentCycle {
                    identifier: identifier.to_string(),
                    repeated: current,
                }
                .into());
            }
            if visited.len() > self.settings.max_chain_depth {
                return Err(IntegrityFault::ChainTooDeep {
                    identifier: identifier.to_string(),
                    max_depth: self.settings.max_chain_depth,
                }
                .into());
            }
            if self.missing_posts.contains_key(&current) {
                break;
            }

            let post = match self.ledger.get_post(&current).await {
                Ok(post) => post,
                Err(LedgerError::NotFound(_)) => {
                    let marked = self.db.writer.mark_post_deleted(&current).await?;
                    if marked > 0 {
                        info!("Marked {current} as deleted");
                    }
                    self.missing_posts.insert(current, ()).await;
                    break;
                },
                Err(e) => return Err(e.into()),
            };

            let kind = post.kind()?;
            let parent = post.parent_identifier.clone();
            self.db.writer.upsert_post(post).await?;
            written.push(current);

            match (kind, parent) {
                (PostKind::Comment, Some(parent)) if recursive => current = parent,
                _ => break,
            }
        }

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::fake::{make_post, FakeLedger};
    use serde_json::json;
    use std::sync::Arc;

    fn refresher(fake: Arc<FakeLedger>, settings: RefreshSettings) -> (EntityRefresher, Arc<crate::db::MemoryStore>) {
        let (db, memory) = Database::in_memory();
        (EntityRefresher::new(fake, db, settings), memory)
    }

    #[tokio::test]
    async fn comment_chain_walks_to_root_in_order() {
        let fake = Arc::new(FakeLedger::new());
        fake.put_post(make_post("bob/post1", None, 0));
        fake.put_post(make_post("carol/reply2", Some("bob/post1"), 1));
        let (refresher, memory) = refresher(fake, RefreshSettings::default());

        let written = refresher.refresh_comment_chain("carol/reply2", true).await.unwrap();
        assert_eq!(written, vec!["carol/reply2".to_string(), "bob/post1".to_string()]);
        assert!(memory.comment("carol/reply2").is_some());
        assert!(memory.post("bob/post1").is_some());
        assert!(memory.post("carol/reply2").is_none());
    }

    #[tokio::test]
    async fn non_recursive_refresh_stops_at_target() {
        let fake = Arc::new(FakeLedger::new());
        fake.put_post(make_post("bob/post1", None, 0));
        fake.put_post(make_post("carol/reply2", Some("bob/post1"), 1));
        let (refresher, memory) = refresher(fake, RefreshSettings::default());

        let written = refresher.refresh_comment_chain("carol/reply2", false).await.unwrap();
        assert_eq!(written, vec!["carol/reply2".to_string()]);
        assert!(memory.post("bob/post1").is_none());
    }

    #[tokio::test]
    async fn cyclic_parents_are_an_integrity_fault() {
        let fake = Arc::new(FakeLedger::new());
        fake.put_post(make_post("a/x", Some("b/y"), 1));
        fake.put_post(make_post("b/y", Some("a/x"), 1));
        let (refresher, _) = refresher(fake, RefreshSettings::default());

        let err = refresher.refresh_comment_chain("a/x", true).await.unwrap_err();
        assert!(matches!(
            err.integrity(),
            Some(IntegrityFault::CommentCycle { repeated, .. }) if repeated == "a/x"
        ));
    }

    #[tokio::test]
    async fn overly_deep_chain_is_an_integrity_fault() {
        let fake = Arc::new(FakeLedger::new());
        fake.put_post(make_post("u/0", None, 0));
        for i in 1..10u32 {
            fake.put_post(make_post(&format!("u/{i}"), Some(&format!("u/{}", i - 1)), i));
        }
        let settings = RefreshSettings {
            max_chain_depth: 4,
            ..RefreshSettings::default()
        };
        let (refresher, _) = refresher(fake, settings);

        let err = refresher.refresh_comment_chain("u/9", true).await.unwrap_err();
        assert!(matches!(err.integrity(), Some(IntegrityFault::ChainTooDeep { max_depth: 4, .. })));
    }

    #[tokio::test]
    async fn missing_post_is_marked_deleted_and_cached() {
        let fake = Arc::new(FakeLedger::new());
        fake.put_post(make_post("bob/gone", None, 0));
        let (refresher, memory) = refresher(fake.clone(), RefreshSettings::default());
        refresher.refresh_comment_chain("bob/gone", true).await.unwrap();

        let fresh = Arc::new(FakeLedger::new());
        let refresher = EntityRefresher::new(
            fresh.clone(),
            Database::from_store(memory.clone()),
            RefreshSettings::default(),
        );
        assert!(refresher.refresh_comment_chain("bob/gone", true).await.unwrap().is_empty());
        assert!(memory.post("bob/gone").unwrap().is_deleted);

        refresher.refresh_comment_chain("bob/gone", true).await.unwrap();
        let lookups = fresh.calls().iter().filter(|c| *c == "get_post bob/gone").count();
        assert_eq!(lookups, 1);
    }

    #[tokio::test]
    async fn full_refresh_is_throttled() {
        let fake = Arc::new(FakeLedger::new());
        fake.put_account("alice", json!({"name": "alice", "balance": "1.000 STEEM", "json_metadata": "{}"}));
        fake.put_relations("alice", &["bob"], &["carol"]);
        let (refresher, memory) = refresher(fake.clone(), RefreshSettings::default());

        assert_eq!(
            refresher.refresh_account("alice", RefreshDepth::Full).await.unwrap(),
            AccountRefresh::Written
        );
        assert_eq!(
            refresher.refresh_account("alice", RefreshDepth::Full).await.unwrap(),
            AccountRefresh::Skipped
        );
        let stored = memory.account("alice").unwrap();
        assert_eq!(stored.followers, Some(vec!["bob".to_string()]));

        // light refresh is never throttled and keeps relations
        assert_eq!(
            refresher.refresh_account("alice", RefreshDepth::Light).await.unwrap(),
            AccountRefresh::Written
        );
        let stored = memory.account("alice").unwrap();
        assert_eq!(stored.following, Some(vec!["carol".to_string()]));
        assert!(stored.profile.contains_key("json_metadata"));
    }

    #[tokio::test]
    async fn unknown_account_is_not_an_error() {
        let fake = Arc::new(FakeLedger::new());
        let (refresher, memory) = refresher(fake, RefreshSettings::default());
        assert_eq!(
            refresher.refresh_account("ghost", RefreshDepth::Light).await.unwrap(),
            AccountRefresh::Missing
        );
        assert!(memory.account("ghost").is_none());
    }

    #[tokio::test]
    async fn backfill_paginates_to_the_end() {
        let fake = Arc::new(FakeLedger::new());
        fake.put_history("alice", 450);
        let (refresher, memory) = refresher(fake, RefreshSettings::default());

        let inserted = refresher
            .refresh_account_history("alice", HistoryMode::Backfill)
            .await
            .unwrap();
        assert_eq!(inserted, 450);
        assert_eq!(memory.account_operation_indexes("alice"), (0..450).collect::<Vec<_>>());

        let again = refresher
            .refresh_account_history("alice", HistoryMode::Backfill)
            .await
            .unwrap();
        assert_eq!(again, 0);
    }

    #[tokio::test]
    async fn recent_mode_makes_one_bounded_call() {
        let fake = Arc::new(FakeLedger::new());
        fake.put_history("alice", 10);
        let (refresher, memory) = refresher(fake.clone(), RefreshSettings::default());
        refresher
            .refresh_account_history("alice", HistoryMode::Recent)
            .await
            .unwrap();
        assert_eq!(memory.account_operation_indexes("alice").len(), 10);

        // the account gains far more entries than one recent batch
        fake.put_history("alice", 20_000);
        let inserted = refresher
            .refresh_account_history("alice", HistoryMode::Recent)
            .await
            .unwrap();
        let history_calls = fake
            .calls()
            .iter()
            .filter(|c| c.starts_with("get_account_history alice"))
            .count();
        assert_eq!(history_calls, 2);
        assert_eq!(inserted, 0);
        assert_eq!(memory.account_operation_indexes("alice").len(), 10);

        refresher
            .refresh_account_history("alice", HistoryMode::Backfill)
            .await
            .unwrap();
        assert_eq!(memory.account_operation_indexes("alice"), (0..20_000).collect::<Vec<_>>());

        // once caught up, small increments go through the single call
        fake.put_history("alice", 20_050);
        let inserted = refresher
            .refresh_account_history("alice", HistoryMode::Recent)
            .await
            .unwrap();
        assert_eq!(inserted, 50);
    }
}
