//! The singleton `indexer_state` row: read once at startup, written only
//! by the sync driver at checkpoint boundaries.

use sqlx::PgPool;
use sqlx::Row;

use crate::model::IndexerState;

/// Loads the persisted state row, if one exists. Callers initialize
/// `forward_block = 0` / `backward_block = current tip` when this
/// returns `None`.
pub async fn load(pool: &PgPool) -> anyhow::Result<Option<IndexerState>> {
    let row = sqlx::query(
        "SELECT forward_block, backward_block, latest_block, is_synced FROM indexer_state WHERE id = 1",
    )
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| IndexerState {
        forward_block: row.try_get::<Option<i64>, _>("forward_block").ok().flatten().map(|v| v as u64),
        backward_block: row.try_get::<Option<i64>, _>("backward_block").ok().flatten().map(|v| v as u64),
        latest_block: row.try_get::<Option<i64>, _>("latest_block").ok().flatten().map(|v| v as u64),
        is_synced: row.try_get("is_synced").unwrap_or(false),
    }))
}

/// Upserts the singleton row at a checkpoint boundary.
pub async fn checkpoint(pool: &PgPool, state: &IndexerState) -> anyhow::Result<()> {
    sqlx::query(
        "INSERT INTO indexer_state (id, forward_block, backward_block, latest_block, is_synced, last_updated) \
         VALUES (1, $1, $2, $3, $4, now()) \
         ON CONFLICT (id) DO UPDATE SET forward_block = EXCLUDED.forward_block, \
         backward_block = EXCLUDED.backward_block, latest_block = EXCLUDED.latest_block, \
         is_synced = EXCLUDED.is_synced, last_updated = EXCLUDED.last_updated",
    )
    .bind(state.forward_block.map(|v| v as i64))
    .bind(state.backward_block.map(|v| v as i64))
    .bind(state.latest_block.map(|v| v as i64))
    .bind(state.is_synced)
    .execute(pool)
    .await?;
    Ok(())
}
