//! Bodies of the named workers. Each one reads its own checkpoint, does one
//! unit of work, and advances the checkpoint only after the work is stored.

pub mod accounts;
pub mod audit;
pub mod blockchain;
pub mod comments;
pub mod operations;
pub mod post_processing;
pub mod refresh_tasks;

use crate::db::{Stream, Database};

/// One block every three seconds.
pub const BLOCKS_PER_DAY: u64 = 20 * 60 * 24;

/// Whether `block_num` lies within `days` of `head`.
pub fn is_recent(block_num: u64, head: u64, days: u64) -> bool {
    block_num > head.saturating_sub(BLOCKS_PER_DAY * days)
}

/// `(start, end]` window of persisted operations for a block-driven stream.
///
/// The window never reaches past the operations checkpoint, since blocks above
/// it may still be partially ingested. `None` when there is nothing to do yet.
pub async fn operations_window(
    db: &Database,
    stream: Stream,
    batch_size: u64,
) -> anyhow::Result<Option<(u64, u64)>> {
    let start = db.checkpoints.get_height(stream).await?;
    let ingested = db.checkpoints.get_height(Stream::Operations).await?;
    let end = start.saturating_add(batch_size).min(ingested);
    Ok((end > start).then_some((start, end)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Position;

    #[test]
    fn recency_is_measured_in_blocks() {
        let head = 10_000_000;
        assert!(is_recent(head - 100, head, 1));
        assert!(!is_recent(head - BLOCKS_PER_DAY, head, 1));
        assert!(is_recent(head - BLOCKS_PER_DAY, head, 10));
        assert!(is_recent(5, 100, 10));
    }

    #[tokio::test]
    async fn window_is_capped_by_ingested_operations() {
        let (db, _) = Database::in_memory();
        assert_eq!(operations_window(&db, Stream::Comments, 250).await.unwrap(), None);

        db.checkpoints
            .set(Stream::Operations, Position::Height(100))
            .await
            .unwrap();
        assert_eq!(
            operations_window(&db, Stream::Comments, 250).await.unwrap(),
            Some((1, 100))
        );

        db.checkpoints
            .set(Stream::Operations, Position::Height(1_000))
            .await
            .unwrap();
        db.checkpoints
            .set(Stream::Comments, Position::Height(100))
            .await
            .unwrap();
        assert_eq!(
            operations_window(&db, Stream::Comments, 250).await.unwrap(),
            Some((100, 350))
        );
    }
}
