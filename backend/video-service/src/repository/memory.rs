//! In-process counter store with buffered transactions and fault injection

use super::{CounterStore, CounterTx, StoreError, StoreResult};
use crate::models::VideoRecord;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct State {
    videos: HashMap<i64, VideoRecord>,
    category_scores: HashMap<(i64, i64), i64>,
    video_likes: HashMap<(i64, i64), bool>,
    failing_videos: HashSet<i64>,
    fail_commits: bool,
    commits: usize,
}

#[derive(Debug, Clone)]
enum Op {
    Views { video_id: i64, delta: i64 },
    Likes { video_id: i64, delta: i64 },
    CategoryScore { user_id: i64, category_id: i64, delta: i64 },
    LikeState { user_id: i64, video_id: i64, liked: bool },
}

/// Writes inside a transaction are buffered and only become visible on commit,
/// matching the read-committed behaviour the scheduler relies on.
#[derive(Clone, Default)]
pub struct InMemoryCounterStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panicking test thread must not wedge the other assertions.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert a video with the given durable counters.
    pub fn insert_video(&self, id: i64, category_id: Option<i64>, views: i64, likes: i64) {
        self.insert_record(VideoRecord {
            id,
            title: format!("video-{}", id),
            category_id,
            thumbnail_object: None,
            views,
            likes,
            created_at: Utc::now(),
        });
    }

    pub fn insert_record(&self, record: VideoRecord) {
        self.lock().videos.insert(record.id, record);
    }

    /// Durable (views, likes) of a video.
    pub fn video_counters(&self, video_id: i64) -> Option<(i64, i64)> {
        self.lock()
            .videos
            .get(&video_id)
            .map(|v| (v.views, v.likes))
    }

    pub fn category_score(&self, user_id: i64, category_id: i64) -> i64 {
        self.lock()
            .category_scores
            .get(&(user_id, category_id))
            .copied()
            .unwrap_or(0)
    }

    pub fn like_state(&self, user_id: i64, video_id: i64) -> Option<bool> {
        self.lock().video_likes.get(&(user_id, video_id)).copied()
    }

    /// Seed a durable like row without going through a transaction.
    pub fn set_like_state(&self, user_id: i64, video_id: i64, liked: bool) {
        self.lock().video_likes.insert((user_id, video_id), liked);
    }

    /// Make any transactional write touching `video_id` fail.
    pub fn fail_on_video(&self, video_id: i64) {
        self.lock().failing_videos.insert(video_id);
    }

    pub fn clear_failures(&self) {
        let mut state = self.lock();
        state.failing_videos.clear();
        state.fail_commits = false;
    }

    /// Make every commit fail.
    pub fn fail_commits(&self, fail: bool) {
        self.lock().fail_commits = fail;
    }

    /// Number of successful commits so far.
    pub fn commit_count(&self) -> usize {
        self.lock().commits
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn begin(&self) -> StoreResult<Box<dyn CounterTx>> {
        Ok(Box::new(InMemoryTx {
            state: self.state.clone(),
            ops: Vec::new(),
        }))
    }

    async fn video(&self, video_id: i64) -> StoreResult<Option<VideoRecord>> {
        Ok(self.lock().videos.get(&video_id).cloned())
    }

    async fn videos(&self, video_ids: &[i64]) -> StoreResult<Vec<VideoRecord>> {
        let state = self.lock();
        Ok(video_ids
            .iter()
            .filter_map(|id| state.videos.get(id).cloned())
            .collect())
    }

    async fn user_video_like(&self, user_id: i64, video_id: i64) -> StoreResult<Option<bool>> {
        Ok(self.like_state(user_id, video_id))
    }

    async fn user_category_score(&self, user_id: i64, category_id: i64) -> StoreResult<i64> {
        Ok(self.category_score(user_id, category_id))
    }
}

struct InMemoryTx {
    state: Arc<Mutex<State>>,
    ops: Vec<Op>,
}

impl InMemoryTx {
    fn push(&mut self, video_id: Option<i64>, op: Op) -> StoreResult<()> {
        if let Some(video_id) = video_id {
            let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            if state.failing_videos.contains(&video_id) {
                return Err(StoreError::Unavailable(format!(
                    "injected failure for video {}",
                    video_id
                )));
            }
        }
        self.ops.push(op);
        Ok(())
    }
}

#[async_trait]
impl CounterTx for InMemoryTx {
    async fn increment_video_views(&mut self, video_id: i64, delta: i64) -> StoreResult<()> {
        self.push(Some(video_id), Op::Views { video_id, delta })
    }

    async fn increment_video_likes(&mut self, video_id: i64, delta: i64) -> StoreResult<()> {
        self.push(Some(video_id), Op::Likes { video_id, delta })
    }

    async fn upsert_user_category_like(
        &mut self,
        user_id: i64,
        category_id: i64,
        delta: i64,
    ) -> StoreResult<()> {
        self.push(
            None,
            Op::CategoryScore {
                user_id,
                category_id,
                delta,
            },
        )
    }

    async fn upsert_user_video_like(
        &mut self,
        user_id: i64,
        video_id: i64,
        liked: bool,
    ) -> StoreResult<()> {
        self.push(
            Some(video_id),
            Op::LikeState {
                user_id,
                video_id,
                liked,
            },
        )
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let InMemoryTx { state: shared, ops } = *self;
        let mut state = shared.lock().unwrap_or_else(|p| p.into_inner());
        if state.fail_commits {
            return Err(StoreError::Unavailable("injected commit failure".to_string()));
        }

        for op in ops {
            match op {
                Op::Views { video_id, delta } => {
                    if let Some(video) = state.videos.get_mut(&video_id) {
                        video.views += delta;
                    }
                }
                Op::Likes { video_id, delta } => {
                    if let Some(video) = state.videos.get_mut(&video_id) {
                        video.likes += delta;
                    }
                }
                Op::CategoryScore {
                    user_id,
                    category_id,
                    delta,
                } => {
                    *state
                        .category_scores
                        .entry((user_id, category_id))
                        .or_insert(0) += delta;
                }
                Op::LikeState {
                    user_id,
                    video_id,
                    liked,
                } => {
                    if state.videos.contains_key(&video_id) {
                        state.video_likes.insert((user_id, video_id), liked);
                    }
                }
            }
        }

        state.commits += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_uncommitted_writes_are_discarded() {
        let store = InMemoryCounterStore::new();
        store.insert_video(1, Some(10), 5, 0);

        {
            let mut tx = store.begin().await.unwrap();
            tx.increment_video_views(1, 3).await.unwrap();
            // dropped without commit
        }
        assert_eq!(store.video_counters(1), Some((5, 0)));

        let mut tx = store.begin().await.unwrap();
        tx.increment_video_views(1, 3).await.unwrap();
        tx.upsert_user_category_like(7, 10, 2).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.video_counters(1), Some((8, 0)));
        assert_eq!(store.category_score(7, 10), 2);
        assert_eq!(store.commit_count(), 1);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let store = InMemoryCounterStore::new();
        store.insert_video(2, None, 0, 0);
        store.fail_on_video(2);

        let mut tx = store.begin().await.unwrap();
        assert!(tx.increment_video_likes(2, 1).await.is_err());
    }
}
