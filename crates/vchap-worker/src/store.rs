//! Persistence traits and the in-memory store.
//!
//! The orchestrator talks to storage through narrow capability traits so
//! the pipeline and dispatcher can be tested against an in-memory fake.
//! Each job write persists the whole record in one call; readers never
//! observe a partially updated job.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use vchap_models::{Chapter, JobId, ProcessingJob, VideoId, VideoRecord};

use crate::error::{WorkerError, WorkerResult};

/// Read/write access to video records.
#[async_trait]
pub trait VideoStore: Send + Sync {
    async fn get_video(&self, video_id: &VideoId) -> WorkerResult<VideoRecord>;
    async fn update_video(&self, video: &VideoRecord) -> WorkerResult<()>;
}

/// Read/write access to processing jobs.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get_job(&self, job_id: &JobId) -> WorkerResult<ProcessingJob>;

    /// Find the live (non-terminal) job for a video, if any.
    async fn find_active_job(&self, video_id: &VideoId) -> WorkerResult<Option<ProcessingJob>>;

    /// Create `job` unless the video already has a live job.
    ///
    /// Atomic: the existence check and the insert happen under one lock,
    /// so two concurrent starts for the same video cannot both create.
    /// Returns the stored job, which is the existing one when present.
    async fn create_if_absent(&self, job: ProcessingJob) -> WorkerResult<(ProcessingJob, bool)>;

    /// Persist the full job record in one write.
    async fn update_job(&self, job: &ProcessingJob) -> WorkerResult<()>;
}

/// Write access to generated chapters.
#[async_trait]
pub trait ChapterStore: Send + Sync {
    /// Replace all chapters for a video with the given list.
    async fn replace_chapters(&self, video_id: &VideoId, chapters: &[Chapter]) -> WorkerResult<()>;

    async fn list_chapters(&self, video_id: &VideoId) -> WorkerResult<Vec<Chapter>>;
}

#[derive(Default)]
struct MemoryInner {
    videos: HashMap<VideoId, VideoRecord>,
    jobs: HashMap<JobId, ProcessingJob>,
    chapters: HashMap<VideoId, Vec<Chapter>>,
}

/// In-memory store backed by a single async mutex.
///
/// The default store for tests and single-process deployments; swap in a
/// database-backed implementation behind the same traits for anything
/// bigger.
#[derive(Default, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a video record, for tests and ingest.
    pub async fn insert_video(&self, video: VideoRecord) {
        let mut inner = self.inner.lock().await;
        inner.videos.insert(video.video_id.clone(), video);
    }
}

#[async_trait]
impl VideoStore for MemoryStore {
    async fn get_video(&self, video_id: &VideoId) -> WorkerResult<VideoRecord> {
        let inner = self.inner.lock().await;
        inner
            .videos
            .get(video_id)
            .cloned()
            .ok_or_else(|| WorkerError::not_found(format!("video {}", video_id)))
    }

    async fn update_video(&self, video: &VideoRecord) -> WorkerResult<()> {
        let mut inner = self.inner.lock().await;
        if !inner.videos.contains_key(&video.video_id) {
            return Err(WorkerError::not_found(format!("video {}", video.video_id)));
        }
        inner.videos.insert(video.video_id.clone(), video.clone());
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn get_job(&self, job_id: &JobId) -> WorkerResult<ProcessingJob> {
        let inner = self.inner.lock().await;
        inner
            .jobs
            .get(job_id)
            .cloned()
            .ok_or_else(|| WorkerError::not_found(format!("job {}", job_id)))
    }

    async fn find_active_job(&self, video_id: &VideoId) -> WorkerResult<Option<ProcessingJob>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .jobs
            .values()
            .find(|j| &j.video_id == video_id && !j.is_complete())
            .cloned())
    }

    async fn create_if_absent(&self, job: ProcessingJob) -> WorkerResult<(ProcessingJob, bool)> {
        let mut inner = self.inner.lock().await;

        if let Some(existing) = inner
            .jobs
            .values()
            .find(|j| j.video_id == job.video_id && !j.is_complete())
        {
            return Ok((existing.clone(), false));
        }

        inner.jobs.insert(job.job_id.clone(), job.clone());
        Ok((job, true))
    }

    async fn update_job(&self, job: &ProcessingJob) -> WorkerResult<()> {
        let mut inner = self.inner.lock().await;
        inner.jobs.insert(job.job_id.clone(), job.clone());
        Ok(())
    }
}

#[async_trait]
impl ChapterStore for MemoryStore {
    async fn replace_chapters(&self, video_id: &VideoId, chapters: &[Chapter]) -> WorkerResult<()> {
        let mut inner = self.inner.lock().await;
        inner.chapters.insert(video_id.clone(), chapters.to_vec());
        Ok(())
    }

    async fn list_chapters(&self, video_id: &VideoId) -> WorkerResult<Vec<Chapter>> {
        let inner = self.inner.lock().await;
        Ok(inner.chapters.get(video_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vchap_models::JobConfig;

    #[tokio::test]
    async fn test_get_missing_video_is_not_found() {
        let store = MemoryStore::new();
        let err = store.get_video(&VideoId::new()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_create_if_absent_is_single_flight() {
        let store = MemoryStore::new();
        let video_id = VideoId::new();

        let first = ProcessingJob::new(video_id.clone(), JobConfig::default());
        let (stored, created) = store.create_if_absent(first.clone()).await.unwrap();
        assert!(created);
        assert_eq!(stored.job_id, first.job_id);

        // Second create for the same video returns the existing job
        let second = ProcessingJob::new(video_id.clone(), JobConfig::default());
        let (stored, created) = store.create_if_absent(second).await.unwrap();
        assert!(!created);
        assert_eq!(stored.job_id, first.job_id);
    }

    #[tokio::test]
    async fn test_create_allowed_after_terminal() {
        let store = MemoryStore::new();
        let video_id = VideoId::new();

        let mut first = ProcessingJob::new(video_id.clone(), JobConfig::default());
        first.complete(None);
        store.update_job(&first).await.unwrap();

        let second = ProcessingJob::new(video_id.clone(), JobConfig::default());
        let (_, created) = store.create_if_absent(second).await.unwrap();
        assert!(created);
    }

    #[tokio::test]
    async fn test_replace_chapters_overwrites() {
        let store = MemoryStore::new();
        let video_id = VideoId::new();

        let a = Chapter::new(video_id.clone(), "Introduction", 0.0, Some(60.0), 0.8, 0);
        let b = Chapter::new(video_id.clone(), "Topic", 60.0, None, 0.9, 1);
        store.replace_chapters(&video_id, &[a, b]).await.unwrap();
        assert_eq!(store.list_chapters(&video_id).await.unwrap().len(), 2);

        let c = Chapter::new(video_id.clone(), "Only", 0.0, None, 0.5, 0);
        store.replace_chapters(&video_id, &[c]).await.unwrap();
        let chapters = store.list_chapters(&video_id).await.unwrap();
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].title, "Only");
    }
}
