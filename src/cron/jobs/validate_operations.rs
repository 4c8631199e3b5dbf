//! Job to audit recently ingested operations against the ledger.

use std::ops::RangeInclusive;

use anyhow::Result;
use log::info;

use crate::{
    db::{Database, Stream},
    worker::{ValidationReport, Validator},
};

/// Trailing window of `window_blocks` ending at `checkpoint`, never below
/// block 1.
pub fn audit_range(checkpoint: u64, window_blocks: u64) -> Option<RangeInclusive<u64>> {
    if checkpoint == 0 || window_blocks == 0 {
        return None;
    }
    let start = checkpoint.saturating_sub(window_blocks - 1).max(1);
    Some(start..=checkpoint)
}

/// Validates the trailing window below the operations checkpoint. Blocks
/// above the checkpoint are still being ingested and are left alone.
pub async fn run(db: &Database, validator: &Validator, window_blocks: u64) -> Result<ValidationReport> {
    let checkpoint = db.checkpoints.get_height(Stream::Operations).await?;
    let Some(range) = audit_range(checkpoint, window_blocks) else {
        return Ok(ValidationReport::default());
    };

    info!("Starting validate_operations job for blocks {:?}...", range);
    let start = std::time::Instant::now();
    let report = validator.validate(range).await?;

    info!(
        "Completed validate_operations job in {:?} ({} deleted, {} inserted)",
        start.elapsed(),
        report.deleted,
        report.inserted
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db::models::Position, ledger::fake::FakeLedger};
    use std::sync::Arc;

    #[test]
    fn range_is_clamped_to_genesis() {
        assert_eq!(audit_range(1000, 100), Some(901..=1000));
        assert_eq!(audit_range(50, 100), Some(1..=50));
        assert_eq!(audit_range(10, 0), None);
    }

    #[tokio::test]
    async fn repairs_missing_operations_below_checkpoint() {
        let fake = Arc::new(FakeLedger::new());
        fake.set_head(20);
        fake.push_transfer(8, "alice", "bob");
        fake.push_transfer(15, "carol", "dave");

        let (db, memory) = Database::in_memory();
        db.checkpoints
            .set(Stream::Operations, Position::Height(10))
            .await
            .unwrap();

        let validator = Validator::new(fake, db.clone());
        let report = run(&db, &validator, 5).await.unwrap();

        assert_eq!(report.blocks, 5);
        assert_eq!(report.inserted, 1);
        assert_eq!(memory.operation_count(), 1);
        assert_eq!(memory.operations()[0].block_num, 8);
    }
}
