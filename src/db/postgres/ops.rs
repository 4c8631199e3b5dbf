use async_trait::async_trait;
use log::error;
use postgres_types::Json;
use serde_json::{Map, Value};
use tokio_postgres::{error::SqlState, Row};

use crate::{
    db::{
        models::{
            Account, AccountOperation, Block, Checkpoint, Operation, Position, Post, RefreshDepth,
        },
        postgres::PostgresClient,
        store::{OperationQuery, Store},
    },
    error::StoreError,
};

/// `INSERT ... ON CONFLICT DO NOTHING` affected no row.
fn ensure_inserted(affected: u64, collection: &str, key: &str) -> Result<(), StoreError> {
    if affected == 0 {
        return Err(StoreError::DuplicateKey {
            collection: collection.to_string(),
            key: key.to_string(),
        });
    }
    Ok(())
}

fn log_failure<'a>(
    what: &'a str,
    key: &'a str,
) -> impl FnOnce(tokio_postgres::Error) -> StoreError + 'a {
    move |e| {
        error!("Failed to write {} {}: {:?}", what, key, e);
        StoreError::from(e)
    }
}

#[async_trait]
impl Store for PostgresClient {
    async fn migrate(&self) -> Result<(), StoreError> {
        self.apply_schema()
            .await
            .map_err(|e| StoreError::Backend(format!("{e:#}")))
    }

    // ==================== CHECKPOINTS ====================

    async fn load_checkpoint(&self, stream: &str) -> Result<Option<Checkpoint>, StoreError> {
        let client = self.pool.get().await?;
        let query = "SELECT stream, position, updated_at FROM steem.checkpoints WHERE stream = $1";

        let row = client.query_opt(query, &[&stream]).await?;
        Ok(row.map(|r| {
            let position: Json<Position> = r.get("position");
            Checkpoint {
                stream: r.get("stream"),
                position: position.0,
                updated_at: r.get("updated_at"),
            }
        }))
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        let query = r#"
            INSERT INTO steem.checkpoints (stream, position, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (stream) DO UPDATE SET
                position = EXCLUDED.position,
                updated_at = EXCLUDED.updated_at
        "#;

        client
            .execute(
                query,
                &[
                    &checkpoint.stream,
                    &Json(&checkpoint.position),
                    &checkpoint.updated_at,
                ],
            )
            .await
            .map_err(log_failure("checkpoint", &checkpoint.stream))?;
        Ok(())
    }

    // ==================== OPERATIONS ====================

    async fn insert_operation(&self, op: &Operation) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        let query = r#"
            INSERT INTO steem.operations (
                id, block_num, trx_id, trx_in_block, op_in_trx, virtual_op,
                timestamp, op_type, author, permlink, body
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO NOTHING
        "#;

        let id = op.id();
        let affected = client
            .execute(
                query,
                &[
                    &id,
                    &(op.block_num as i64),
                    &op.trx_id,
                    &i64::from(op.trx_in_block),
                    &i64::from(op.op_in_trx),
                    &i64::from(op.virtual_op),
                    &op.timestamp,
                    &op.op_type,
                    &op.field("author"),
                    &op.field("permlink"),
                    &Json(&op.body),
                ],
            )
            .await
            .map_err(log_failure("operation", &id))?;
        ensure_inserted(affected, "operations", &id)
    }

    async fn find_operations(&self, query: &OperationQuery) -> Result<Vec<Operation>, StoreError> {
        let client = self.pool.get().await?;
        let sql = r#"
            SELECT block_num, trx_id, trx_in_block, op_in_trx, virtual_op, timestamp, op_type, body
            FROM steem.operations
            WHERE block_num > $1 AND block_num <= $2
              AND ($3::TEXT IS NULL OR op_type = $3)
            ORDER BY block_num, trx_in_block, op_in_trx, virtual_op
        "#;

        let rows = client
            .query(
                sql,
                &[
                    &(query.after_block as i64),
                    &(query.to_block as i64),
                    &query.op_type,
                ],
            )
            .await?;
        Ok(rows.iter().map(row_to_operation).collect())
    }

    async fn operation_ids_in_block(&self, block_num: u64) -> Result<Vec<String>, StoreError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT id FROM steem.operations WHERE block_num = $1",
                &[&(block_num as i64)],
            )
            .await?;
        Ok(rows.iter().map(|r| r.get("id")).collect())
    }

    async fn delete_operations(&self, ids: &[String]) -> Result<u64, StoreError> {
        let client = self.pool.get().await?;
        Ok(client
            .execute("DELETE FROM steem.operations WHERE id = ANY($1)", &[&ids])
            .await?)
    }

    // ==================== BLOCKS ====================

    async fn insert_block(&self, block: &Block) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        let query = r#"
            INSERT INTO steem.blocks (block_id, block_num, previous, timestamp, witness, payload)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (block_id) DO NOTHING
        "#;

        let affected = client
            .execute(
                query,
                &[
                    &block.block_id,
                    &(block.block_num as i64),
                    &block.previous_block_id,
                    &block.timestamp,
                    &block.witness,
                    &Json(&block.payload),
                ],
            )
            .await
            .map_err(|e| {
                // only `previous` can still collide
                if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
                    StoreError::Conflict {
                        collection: "blocks".to_string(),
                        key: format!("previous {}", block.previous_block_id),
                    }
                } else {
                    log_failure("block", &block.block_id)(e)
                }
            })?;
        ensure_inserted(affected, "blocks", &block.block_id)
    }

    async fn block_id_exists(&self, block_id: &str) -> Result<bool, StoreError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt("SELECT 1 FROM steem.blocks WHERE block_id = $1", &[&block_id])
            .await?;
        Ok(row.is_some())
    }

    async fn block_ids_at(&self, block_num: u64) -> Result<Vec<String>, StoreError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT block_id FROM steem.blocks WHERE block_num = $1",
                &[&(block_num as i64)],
            )
            .await?;
        Ok(rows.iter().map(|r| r.get("block_id")).collect())
    }

    async fn delete_blocks(&self, block_ids: &[String]) -> Result<u64, StoreError> {
        let client = self.pool.get().await?;
        Ok(client
            .execute("DELETE FROM steem.blocks WHERE block_id = ANY($1)", &[&block_ids])
            .await?)
    }

    async fn last_block_num(&self) -> Result<Option<u64>, StoreError> {
        let client = self.pool.get().await?;
        let row = client
            .query_one("SELECT MAX(block_num) AS last FROM steem.blocks", &[])
            .await?;
        let last: Option<i64> = row.get("last");
        Ok(last.map(|n| n as u64))
    }

    // ==================== ACCOUNTS ====================

    async fn upsert_account(
        &self,
        account: &Account,
        depth: RefreshDepth,
    ) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        let query = match depth {
            RefreshDepth::Light => {
                r#"
                INSERT INTO steem.accounts (name, profile, followers, following, updated_at, full_updated_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (name) DO UPDATE SET
                    profile = steem.accounts.profile || EXCLUDED.profile,
                    updated_at = EXCLUDED.updated_at
                "#
            },
            RefreshDepth::Full => {
                r#"
                INSERT INTO steem.accounts (name, profile, followers, following, updated_at, full_updated_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (name) DO UPDATE SET
                    profile = EXCLUDED.profile,
                    followers = EXCLUDED.followers,
                    following = EXCLUDED.following,
                    updated_at = EXCLUDED.updated_at,
                    full_updated_at = EXCLUDED.full_updated_at
                "#
            },
        };

        client
            .execute(
                query,
                &[
                    &account.name,
                    &Json(&account.profile),
                    &account.followers.as_ref().map(Json),
                    &account.following.as_ref().map(Json),
                    &account.updated_at,
                    &account.full_updated_at,
                ],
            )
            .await
            .map_err(log_failure("account", &account.name))?;
        Ok(())
    }

    async fn find_account(&self, name: &str) -> Result<Option<Account>, StoreError> {
        let client = self.pool.get().await?;
        let query = r#"
            SELECT name, profile, followers, following, updated_at, full_updated_at
            FROM steem.accounts WHERE name = $1
        "#;

        let row = client.query_opt(query, &[&name]).await?;
        Ok(row.map(|r| {
            let profile: Json<Map<String, Value>> = r.get("profile");
            let followers: Option<Json<Vec<String>>> = r.get("followers");
            let following: Option<Json<Vec<String>>> = r.get("following");
            Account {
                name: r.get("name"),
                profile: profile.0,
                followers: followers.map(|j| j.0),
                following: following.map(|j| j.0),
                updated_at: r.get("updated_at"),
                full_updated_at: r.get("full_updated_at"),
            }
        }))
    }

    // ==================== ACCOUNT OPERATIONS ====================

    async fn insert_account_operation(&self, op: &AccountOperation) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        let query = r#"
            INSERT INTO steem.account_operations (
                account, idx, op_type, block_num, trx_id, timestamp, body
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (account, idx) DO NOTHING
        "#;

        let key = format!("{}/{}", op.account, op.index);
        let affected = client
            .execute(
                query,
                &[
                    &op.account,
                    &(op.index as i64),
                    &op.op_type,
                    &(op.block_num as i64),
                    &op.trx_id,
                    &op.timestamp,
                    &Json(&op.body),
                ],
            )
            .await
            .map_err(log_failure("account operation", &key))?;
        ensure_inserted(affected, "account_operations", &key)
    }

    async fn highest_account_operation_index(
        &self,
        account: &str,
    ) -> Result<Option<u64>, StoreError> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "SELECT MAX(idx) AS highest FROM steem.account_operations WHERE account = $1",
                &[&account],
            )
            .await?;
        let highest: Option<i64> = row.get("highest");
        Ok(highest.map(|n| n as u64))
    }

    // ==================== POSTS / COMMENTS ====================

    async fn upsert_post(&self, post: &Post) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        let table = if post.depth == 0 { "posts" } else { "comments" };
        let query = format!(
            r#"
            INSERT INTO steem.{table} (
                identifier, author, permlink, parent_identifier, depth, is_deleted, body, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (identifier) DO UPDATE SET
                parent_identifier = EXCLUDED.parent_identifier,
                depth = EXCLUDED.depth,
                is_deleted = EXCLUDED.is_deleted,
                body = EXCLUDED.body,
                updated_at = EXCLUDED.updated_at
            "#
        );

        client
            .execute(
                &query,
                &[
                    &post.identifier,
                    &post.author,
                    &post.permlink,
                    &post.parent_identifier,
                    &i64::from(post.depth),
                    &post.is_deleted,
                    &Json(&post.body),
                    &post.updated_at,
                ],
            )
            .await
            .map_err(log_failure("post", &post.identifier))?;
        Ok(())
    }

    async fn mark_post_deleted(&self, identifier: &str) -> Result<u64, StoreError> {
        let client = self.pool.get().await?;
        let mut marked = 0;
        for table in ["posts", "comments"] {
            let query = format!(
                "UPDATE steem.{table} SET is_deleted = TRUE, updated_at = NOW() WHERE identifier = $1"
            );
            marked += client.execute(&query, &[&identifier]).await?;
        }
        Ok(marked)
    }
}

fn row_to_operation(row: &Row) -> Operation {
    let body: Json<Map<String, Value>> = row.get("body");
    Operation {
        block_num: row.get::<_, i64>("block_num") as u64,
        trx_id: row.get("trx_id"),
        trx_in_block: row.get::<_, i64>("trx_in_block") as u32,
        op_in_trx: row.get::<_, i64>("op_in_trx") as u32,
        virtual_op: row.get::<_, i64>("virtual_op") as u32,
        timestamp: row.get("timestamp"),
        op_type: row.get("op_type"),
        body: body.0,
    }
}
