//! The checkpoint store: durable `(thread_id, checkpoint_id) -> state blob`
//! persistence backing the graph runtime's per-node checkpoint side effect.
//!
//! `thread_id` here is the mission id; one mission's checkpoints form a
//! single thread. The trait is kept narrow (put/get-latest/list/release) so
//! node code never reaches into `gator_db` directly.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;

use gator_db::queries::checkpoints as checkpoint_db;

use crate::mission::types::MissionState;

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("database error: {0}")]
    Database(#[from] anyhow::Error),

    #[error("failed to serialize mission state: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("no checkpoint found for thread {0}")]
    NotFound(String),
}

#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub checkpoint_id: uuid::Uuid,
    pub node_id: String,
    pub next_node_id: Option<String>,
    pub state: MissionState,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn put(&self, thread_id: &str, node_id: &str, next_node_id: Option<&str>, state: &MissionState) -> Result<Checkpoint, CheckpointError>;
    async fn get_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>, CheckpointError>;
    async fn list(&self, thread_id: &str) -> Result<Vec<Checkpoint>, CheckpointError>;
    /// Removes all entries for `thread_id` and returns them as of deletion.
    async fn release(&self, thread_id: &str) -> Result<Vec<Checkpoint>, CheckpointError>;
    /// Every mission id with at least one checkpoint, most recently active
    /// first. Backs `GET /missions`.
    async fn list_mission_ids(&self) -> Result<Vec<String>, CheckpointError>;
}

pub struct PgCheckpointStore {
    pool: PgPool,
}

impl PgCheckpointStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_checkpoint(row: gator_db::models::CheckpointRow) -> Result<Checkpoint, CheckpointError> {
    let state: MissionState = serde_json::from_value(row.state_blob)?;
    Ok(Checkpoint {
        checkpoint_id: row.checkpoint_id,
        node_id: row.node_id,
        next_node_id: row.next_node_id,
        state,
        created_at: row.created_at,
    })
}

#[async_trait]
impl CheckpointStore for PgCheckpointStore {
    async fn put(
        &self,
        thread_id: &str,
        node_id: &str,
        next_node_id: Option<&str>,
        state: &MissionState,
    ) -> Result<Checkpoint, CheckpointError> {
        let blob: Value = serde_json::to_value(state)?;
        let row = checkpoint_db::insert_checkpoint(&self.pool, thread_id, node_id, next_node_id, &blob).await?;
        row_to_checkpoint(row)
    }

    async fn get_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let row = checkpoint_db::get_latest(&self.pool, thread_id).await?;
        row.map(row_to_checkpoint).transpose()
    }

    async fn list(&self, thread_id: &str) -> Result<Vec<Checkpoint>, CheckpointError> {
        let rows = checkpoint_db::list_checkpoints(&self.pool, thread_id).await?;
        rows.into_iter().map(row_to_checkpoint).collect()
    }

    async fn release(&self, thread_id: &str) -> Result<Vec<Checkpoint>, CheckpointError> {
        let rows = checkpoint_db::list_checkpoints(&self.pool, thread_id).await?;
        checkpoint_db::release_thread(&self.pool, thread_id).await?;
        rows.into_iter().map(row_to_checkpoint).collect()
    }

    async fn list_mission_ids(&self) -> Result<Vec<String>, CheckpointError> {
        Ok(checkpoint_db::list_mission_ids(&self.pool).await?)
    }
}
