use std::{collections::HashSet, ops::RangeInclusive};

use log::{info, warn};

use crate::{
    db::Database,
    error::SyncResult,
    ledger::Ledger,
};

/// Outcome of one validation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub blocks: u64,
    pub deleted: u64,
    pub inserted: u64,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.deleted == 0 && self.inserted == 0
    }
}

/// Reconciles persisted ranges against the ledger by replaying and diffing.
#[derive(Clone)]
pub struct Validator {
    ledger: Ledger,
    db: Database,
}

impl Validator {
    pub fn new(ledger: Ledger, db: Database) -> Self {
        Self { ledger, db }
    }

    /// Make the stored operations of every block in `range` equal to what the
    /// ledger reports: extras are deleted, missing ones inserted.
    pub async fn validate(&self, range: RangeInclusive<u64>) -> SyncResult<ValidationReport> {
        let mut report = ValidationReport::default();

        for block_num in range {
            let expected = self.ledger.get_ops_in_block(block_num).await?;
            let expected_ids: HashSet<String> = expected.iter().map(|op| op.id()).collect();
            let stored: HashSet<String> = self
                .db
                .store
                .operation_ids_in_block(block_num)
                .await?
                .into_iter()
                .collect();

            let extra: Vec<String> = stored.difference(&expected_ids).cloned().collect();
            if !extra.is_empty() {
                warn!("[validate] Block {}: removing {} unexpected operations", block_num, extra.len());
                report.deleted += self.db.writer.delete_operations(&extra).await?;
            }

            for op in expected {
                if stored.contains(&op.id()) {
                    continue;
                }
                if self.db.writer.insert_operation(op).await?.is_inserted() {
                    report.inserted += 1;
                }
            }
            report.blocks += 1;
        }

        if report.is_clean() {
            info!("[validate] {} blocks consistent", report.blocks);
        } else {
            info!(
                "[validate] {} blocks checked, {} deleted, {} inserted",
                report.blocks, report.deleted, report.inserted
            );
        }
        Ok(report)
    }

    /// Replace stored blocks in `range` whose id disagrees with the ledger.
    /// Returns the number of heights rewritten.
    pub async fn reconcile_blocks(&self, range: RangeInclusive<u64>) -> SyncResult<u64> {
        let heights: Vec<u64> = range.collect();
        if heights.is_empty() {
            return Ok(0);
        }

        let mut replaced = 0;
        for block in self.ledger.get_blocks(&heights).await? {
            let stored = self.db.store.block_ids_at(block.block_num).await?;
            if stored.len() == 1 && stored[0] == block.block_id {
                continue;
            }
            let stale: Vec<String> = stored.into_iter().filter(|id| *id != block.block_id).collect();
            warn!(
                "[validate] Block {}: replacing {} stale entries with {}",
                block.block_num,
                stale.len(),
                block.block_id
            );
            self.db.writer.delete_blocks(&stale).await?;
            self.db.writer.insert_block(block).await?;
            replaced += 1;
        }
        Ok(replaced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::fake::{chain_block, make_op, FakeLedger};
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn diffs_stored_operations_against_ledger() {
        let fake = Arc::new(FakeLedger::new());
        fake.set_head(10);
        fake.push_transfer(5, "alice", "bob");
        let mut second = make_op(5, "vote", json!({"voter": "carol", "author": "bob", "permlink": "p"}));
        second.op_in_trx = 1;
        fake.push_op(second.clone());

        let (db, memory) = Database::in_memory();
        db.writer.insert_operation(second).await.unwrap();
        let mut bogus = make_op(5, "transfer", json!({"from": "mallory", "to": "bob"}));
        bogus.trx_id = "forked".into();
        db.writer.insert_operation(bogus).await.unwrap();

        let validator = Validator::new(fake, db);
        let report = validator.validate(4..=6).await.unwrap();
        assert_eq!(
            report,
            ValidationReport {
                blocks: 3,
                deleted: 1,
                inserted: 1
            }
        );
        assert_eq!(memory.operation_count(), 2);
        assert!(memory.operations().iter().all(|op| op.trx_id != "forked"));

        let again = validator.validate(4..=6).await.unwrap();
        assert!(again.is_clean());
    }

    #[tokio::test]
    async fn replaces_forked_blocks() {
        let fake = Arc::new(FakeLedger::new());
        fake.set_head(5);
        let (db, memory) = Database::in_memory();
        for height in 1..=4 {
            db.writer.insert_block(chain_block(height)).await.unwrap();
        }
        let mut forked = chain_block(5);
        forked.block_id = "00000005ffffffffffffffffffffffffffffffff".into();
        db.writer.insert_block(forked).await.unwrap();

        let validator = Validator::new(fake, db);
        assert_eq!(validator.reconcile_blocks(1..=5).await.unwrap(), 1);
        assert_eq!(memory.block_count(), 5);
        assert_eq!(
            memory.block_at(5).map(|b| b.block_id),
            Some(chain_block(5).block_id)
        );
    }
}
