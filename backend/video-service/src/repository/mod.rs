//! Durable store accessors
//!
//! Narrow repository over the relational store. Reads run on the pool; the
//! aggregation scheduler's writes run inside a [`CounterTx`] so one batch
//! commits or rolls back as a unit. Writes are incremental (`x = x + delta`)
//! except the like-state upsert, which is idempotent.

mod memory;
mod postgres;

pub use memory::InMemoryCounterStore;
pub use postgres::PgCounterStore;

use crate::models::VideoRecord;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Open a transaction. Dropping it without [`CounterTx::commit`] rolls back.
    async fn begin(&self) -> StoreResult<Box<dyn CounterTx>>;

    async fn video(&self, video_id: i64) -> StoreResult<Option<VideoRecord>>;

    /// Rows for the ids that exist; order is unspecified.
    async fn videos(&self, video_ids: &[i64]) -> StoreResult<Vec<VideoRecord>>;

    /// Durable like state; `None` when the user never toggled this video.
    async fn user_video_like(&self, user_id: i64, video_id: i64) -> StoreResult<Option<bool>>;

    /// Durable affinity score, 0 when no row exists.
    async fn user_category_score(&self, user_id: i64, category_id: i64) -> StoreResult<i64>;
}

#[async_trait]
pub trait CounterTx: Send {
    async fn increment_video_views(&mut self, video_id: i64, delta: i64) -> StoreResult<()>;

    async fn increment_video_likes(&mut self, video_id: i64, delta: i64) -> StoreResult<()>;

    async fn upsert_user_category_like(
        &mut self,
        user_id: i64,
        category_id: i64,
        delta: i64,
    ) -> StoreResult<()>;

    async fn upsert_user_video_like(
        &mut self,
        user_id: i64,
        video_id: i64,
        liked: bool,
    ) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}
