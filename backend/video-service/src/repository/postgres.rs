//! PostgreSQL implementation of the counter store

use super::{CounterStore, CounterTx, StoreResult};
use crate::models::VideoRecord;
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, warn};

#[derive(Clone)]
pub struct PgCounterStore {
    pool: PgPool,
}

impl PgCounterStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl CounterStore for PgCounterStore {
    async fn begin(&self) -> StoreResult<Box<dyn CounterTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgCounterTx { tx }))
    }

    async fn video(&self, video_id: i64) -> StoreResult<Option<VideoRecord>> {
        let video = sqlx::query_as::<_, VideoRecord>(
            r#"
            SELECT id, title, category_id, thumbnail_object, views, likes, created_at
            FROM videos
            WHERE id = $1
            "#,
        )
        .bind(video_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(video)
    }

    async fn videos(&self, video_ids: &[i64]) -> StoreResult<Vec<VideoRecord>> {
        if video_ids.is_empty() {
            return Ok(Vec::new());
        }

        let videos = sqlx::query_as::<_, VideoRecord>(
            r#"
            SELECT id, title, category_id, thumbnail_object, views, likes, created_at
            FROM videos
            WHERE id = ANY($1)
            "#,
        )
        .bind(video_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(videos)
    }

    async fn user_video_like(&self, user_id: i64, video_id: i64) -> StoreResult<Option<bool>> {
        let liked: Option<bool> = sqlx::query_scalar(
            "SELECT liked FROM user_video_likes WHERE user_id = $1 AND video_id = $2",
        )
        .bind(user_id)
        .bind(video_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(liked)
    }

    async fn user_category_score(&self, user_id: i64, category_id: i64) -> StoreResult<i64> {
        let score: Option<i64> = sqlx::query_scalar(
            "SELECT score FROM user_category_likes WHERE user_id = $1 AND category_id = $2",
        )
        .bind(user_id)
        .bind(category_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(score.unwrap_or(0))
    }
}

pub struct PgCounterTx {
    tx: Transaction<'static, Postgres>,
}

impl PgCounterTx {
    async fn increment_column(
        &mut self,
        column: &'static str,
        video_id: i64,
        delta: i64,
    ) -> StoreResult<()> {
        // `column` is one of two literals below, never caller input
        let sql = format!(
            "UPDATE videos SET {column} = {column} + $2, updated_at = NOW() WHERE id = $1"
        );

        let result = sqlx::query(&sql)
            .bind(video_id)
            .bind(delta)
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() == 0 {
            // Video deleted since the delta was cached; the delta has nowhere to go.
            warn!(video_id, delta, column, "Dropping delta for missing video");
        } else {
            debug!(video_id, delta, column, "Applied video counter delta");
        }

        Ok(())
    }
}

#[async_trait]
impl CounterTx for PgCounterTx {
    async fn increment_video_views(&mut self, video_id: i64, delta: i64) -> StoreResult<()> {
        self.increment_column("views", video_id, delta).await
    }

    async fn increment_video_likes(&mut self, video_id: i64, delta: i64) -> StoreResult<()> {
        self.increment_column("likes", video_id, delta).await
    }

    async fn upsert_user_category_like(
        &mut self,
        user_id: i64,
        category_id: i64,
        delta: i64,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO user_category_likes (user_id, category_id, score, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (user_id, category_id)
            DO UPDATE SET score = user_category_likes.score + EXCLUDED.score,
                          updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(category_id)
        .bind(delta)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn upsert_user_video_like(
        &mut self,
        user_id: i64,
        video_id: i64,
        liked: bool,
    ) -> StoreResult<()> {
        // The EXISTS guard keeps a flag for a deleted video from failing the
        // foreign key and rolling back the whole batch on every cycle.
        let result = sqlx::query(
            r#"
            INSERT INTO user_video_likes (user_id, video_id, liked, updated_at)
            SELECT $1, $2, $3, NOW()
            WHERE EXISTS (SELECT 1 FROM videos WHERE id = $2)
            ON CONFLICT (user_id, video_id)
            DO UPDATE SET liked = EXCLUDED.liked, updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(video_id)
        .bind(liked)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            warn!(user_id, video_id, "Skipping like state for missing video");
        }

        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
