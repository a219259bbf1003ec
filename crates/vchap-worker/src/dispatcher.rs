//! Job dispatcher: the control-plane entry points.
//!
//! Start, cancel, restart, and inspect chaptering jobs. The dispatcher
//! owns no processing logic; it creates job records, hands tasks to the
//! queue, and keeps the two consistent.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use vchap_models::{JobConfig, JobEvent, JobId, ProcessingJob, VideoId, VideoStatus};
use vchap_queue::{ChapterTask, NotificationChannel, TaskQueue};

use crate::error::{WorkerError, WorkerResult};
use crate::retry::{retry_async, RetryConfig};
use crate::store::{JobStore, VideoStore};

/// Task submission backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TaskBackend: Send + Sync {
    /// Submit a task; returns an opaque task handle.
    async fn submit(&self, task: &ChapterTask) -> WorkerResult<String>;
    /// Best-effort revocation of a submitted task.
    async fn revoke(&self, task_handle: &str) -> WorkerResult<()>;
    /// Release the per-video single-flight guard.
    async fn clear_dedup(&self, video_id: &VideoId) -> WorkerResult<()>;
}

#[async_trait]
impl TaskBackend for TaskQueue {
    async fn submit(&self, task: &ChapterTask) -> WorkerResult<String> {
        Ok(TaskQueue::submit(self, task).await?)
    }

    async fn revoke(&self, task_handle: &str) -> WorkerResult<()> {
        Ok(TaskQueue::revoke(self, task_handle).await?)
    }

    async fn clear_dedup(&self, video_id: &VideoId) -> WorkerResult<()> {
        Ok(TaskQueue::clear_dedup(self, video_id).await?)
    }
}

/// Outbound event sink. Publishing is best-effort; a failed publish is
/// logged, never propagated into job state.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn publish(&self, event: &JobEvent) -> WorkerResult<()>;
}

#[async_trait]
impl NotificationSink for NotificationChannel {
    async fn publish(&self, event: &JobEvent) -> WorkerResult<()> {
        Ok(NotificationChannel::publish(self, event).await?)
    }
}

/// Sink that drops every event. For tests and headless runs.
pub struct NullSink;

#[async_trait]
impl NotificationSink for NullSink {
    async fn publish(&self, _event: &JobEvent) -> WorkerResult<()> {
        Ok(())
    }
}

pub struct Dispatcher {
    jobs: Arc<dyn JobStore>,
    videos: Arc<dyn VideoStore>,
    backend: Arc<dyn TaskBackend>,
    notifier: Arc<dyn NotificationSink>,
}

impl Dispatcher {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        videos: Arc<dyn VideoStore>,
        backend: Arc<dyn TaskBackend>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            jobs,
            videos,
            backend,
            notifier,
        }
    }

    /// Start chaptering a video.
    ///
    /// Idempotent: if the video already has a live job, that job is
    /// returned unchanged and nothing is submitted. The existence check
    /// and creation are atomic in the store, so two concurrent starts
    /// yield one job.
    pub async fn start_processing(
        &self,
        video_id: &VideoId,
        config: JobConfig,
    ) -> WorkerResult<ProcessingJob> {
        self.videos.get_video(video_id).await?;

        let job = ProcessingJob::new(video_id.clone(), config.clone());
        let (mut job, created) = self.jobs.create_if_absent(job).await?;
        if !created {
            info!(
                "Video {} already has live job {}, returning it",
                video_id, job.job_id
            );
            return Ok(job);
        }

        let task = ChapterTask::new(job.job_id.clone(), video_id.clone(), config);
        match self.submit_with_retry(&task).await {
            Ok(handle) => {
                job.task_handle = Some(handle);
                self.jobs.update_job(&job).await?;
                self.set_video_status(video_id, VideoStatus::Processing)
                    .await;
                info!("Started job {} for video {}", job.job_id, video_id);
                Ok(job)
            }
            Err(e) => {
                // The job record must not stay live with no task behind it
                job.fail(format!("failed to submit task: {}", e), None);
                self.jobs.update_job(&job).await?;
                self.clear_dedup_best_effort(video_id).await;
                self.set_video_status(video_id, VideoStatus::Failed).await;
                self.publish_best_effort(JobEvent::failed(
                    job.job_id.clone(),
                    video_id.clone(),
                    job.error_message.clone().unwrap_or_default(),
                    None,
                ))
                .await;
                Err(e)
            }
        }
    }

    /// Cancel a live job.
    ///
    /// Terminal jobs cannot be cancelled; that is a validation error.
    /// Revocation of the queued task is best-effort: a task already
    /// running observes the terminal job at its next checkpoint and
    /// stops there.
    pub async fn cancel(&self, job_id: &JobId) -> WorkerResult<ProcessingJob> {
        let mut job = self.jobs.get_job(job_id).await?;
        if job.is_complete() {
            return Err(WorkerError::validation(format!(
                "job {} is already {}, cannot cancel",
                job_id, job.stage
            )));
        }

        if let Some(handle) = job.task_handle.clone() {
            if let Err(e) = self.backend.revoke(&handle).await {
                warn!("Failed to revoke task {} for job {}: {}", handle, job_id, e);
            }
        }

        job.fail("cancelled by user", None);
        self.jobs.update_job(&job).await?;

        self.clear_dedup_best_effort(&job.video_id).await;
        self.set_video_status(&job.video_id, VideoStatus::Failed)
            .await;
        self.publish_best_effort(JobEvent::failed(
            job.job_id.clone(),
            job.video_id.clone(),
            "cancelled by user",
            None,
        ))
        .await;

        info!("Cancelled job {}", job_id);
        Ok(job)
    }

    /// Restart a failed job.
    ///
    /// Only legal from the Error stage; anything else surfaces the state
    /// machine's typed transition error. The job keeps its identity and
    /// error history and goes back through the full pipeline.
    pub async fn restart(&self, job_id: &JobId) -> WorkerResult<ProcessingJob> {
        let mut job = self.jobs.get_job(job_id).await?;
        job.restart()?;

        let task = ChapterTask::new(
            job.job_id.clone(),
            job.video_id.clone(),
            job.config.clone(),
        );
        match self.submit_with_retry(&task).await {
            Ok(handle) => {
                job.task_handle = Some(handle);
                self.jobs.update_job(&job).await?;
                self.set_video_status(&job.video_id, VideoStatus::Processing)
                    .await;
                self.publish_best_effort(JobEvent::stage_changed(
                    job.job_id.clone(),
                    job.video_id.clone(),
                    job.stage,
                ))
                .await;
                info!("Restarted job {}", job_id);
                Ok(job)
            }
            Err(e) => {
                job.fail(format!("failed to resubmit task: {}", e), None);
                self.jobs.update_job(&job).await?;
                self.clear_dedup_best_effort(&job.video_id).await;
                self.set_video_status(&job.video_id, VideoStatus::Failed)
                    .await;
                self.publish_best_effort(JobEvent::failed(
                    job.job_id.clone(),
                    job.video_id.clone(),
                    job.error_message.clone().unwrap_or_default(),
                    None,
                ))
                .await;
                Err(e)
            }
        }
    }

    /// Current state of a job.
    pub async fn job_status(&self, job_id: &JobId) -> WorkerResult<ProcessingJob> {
        self.jobs.get_job(job_id).await
    }

    /// The live job for a video, if any.
    pub async fn active_job(&self, video_id: &VideoId) -> WorkerResult<Option<ProcessingJob>> {
        self.jobs.find_active_job(video_id).await
    }

    async fn submit_with_retry(&self, task: &ChapterTask) -> WorkerResult<String> {
        let config = RetryConfig::new("queue_submit").with_max_retries(2);
        retry_async(&config, || self.backend.submit(task))
            .await
            .into_result()
    }

    async fn clear_dedup_best_effort(&self, video_id: &VideoId) {
        if let Err(e) = self.backend.clear_dedup(video_id).await {
            warn!("Failed to clear dedup for video {}: {}", video_id, e);
        }
    }

    async fn set_video_status(&self, video_id: &VideoId, status: VideoStatus) {
        match self.videos.get_video(video_id).await {
            Ok(mut video) => {
                video.set_status(status);
                if let Err(e) = self.videos.update_video(&video).await {
                    warn!("Failed to update video {} status: {}", video_id, e);
                }
            }
            Err(e) => warn!("Failed to load video {}: {}", video_id, e),
        }
    }

    async fn publish_best_effort(&self, event: JobEvent) {
        if let Err(e) = self.notifier.publish(&event).await {
            warn!("Failed to publish {:?} event: {}", event.kind(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use vchap_models::{ProcessingStage, VideoRecord};

    async fn seeded_store() -> (MemoryStore, VideoId) {
        let store = MemoryStore::new();
        let video = VideoRecord::new(VideoId::new(), "/tmp/video.mp4");
        let video_id = video.video_id.clone();
        store.insert_video(video).await;
        (store, video_id)
    }

    fn dispatcher(store: &MemoryStore, backend: MockTaskBackend) -> Dispatcher {
        Dispatcher::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(backend),
            Arc::new(NullSink),
        )
    }

    #[tokio::test]
    async fn test_start_creates_job_and_submits() {
        let (store, video_id) = seeded_store().await;
        let mut backend = MockTaskBackend::new();
        backend
            .expect_submit()
            .times(1)
            .returning(|_| Ok("msg-1".to_string()));

        let job = dispatcher(&store, backend)
            .start_processing(&video_id, JobConfig::default())
            .await
            .unwrap();

        assert_eq!(job.stage, ProcessingStage::Uploading);
        assert_eq!(job.task_handle.as_deref(), Some("msg-1"));

        // The video is marked live as soon as the task is queued
        let video = store.get_video(&video_id).await.unwrap();
        assert_eq!(video.status, VideoStatus::Processing);
    }

    #[tokio::test]
    async fn test_start_is_idempotent_for_live_job() {
        let (store, video_id) = seeded_store().await;
        let mut backend = MockTaskBackend::new();
        // Exactly one submission across two starts
        backend
            .expect_submit()
            .times(1)
            .returning(|_| Ok("msg-1".to_string()));

        let d = dispatcher(&store, backend);
        let first = d
            .start_processing(&video_id, JobConfig::default())
            .await
            .unwrap();
        let second = d
            .start_processing(&video_id, JobConfig::default())
            .await
            .unwrap();

        assert_eq!(first.job_id, second.job_id);
    }

    #[tokio::test]
    async fn test_start_unknown_video_is_not_found() {
        let store = MemoryStore::new();
        let err = dispatcher(&store, MockTaskBackend::new())
            .start_processing(&VideoId::new(), JobConfig::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_submit_failure_fails_the_job() {
        let (store, video_id) = seeded_store().await;
        let mut backend = MockTaskBackend::new();
        backend
            .expect_submit()
            .returning(|_| Err(WorkerError::fatal("queue down")));
        // The single-flight guard is released so a later restart is not
        // locked out for the dedup key's TTL
        backend.expect_clear_dedup().times(1).returning(|_| Ok(()));

        let d = dispatcher(&store, backend);
        let err = d
            .start_processing(&video_id, JobConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Fatal(_)));

        // The job exists and is failed, not stuck live
        let job = d.active_job(&video_id).await.unwrap();
        assert!(job.is_none());

        let video = store.get_video(&video_id).await.unwrap();
        assert_eq!(video.status, VideoStatus::Failed);
    }

    #[tokio::test]
    async fn test_cancel_revokes_and_fails() {
        let (store, video_id) = seeded_store().await;
        let mut backend = MockTaskBackend::new();
        backend
            .expect_submit()
            .returning(|_| Ok("msg-1".to_string()));
        backend
            .expect_revoke()
            .times(1)
            .returning(|_| Ok(()));
        backend.expect_clear_dedup().times(1).returning(|_| Ok(()));

        let d = dispatcher(&store, backend);
        let job = d
            .start_processing(&video_id, JobConfig::default())
            .await
            .unwrap();

        let cancelled = d.cancel(&job.job_id).await.unwrap();
        assert_eq!(cancelled.stage, ProcessingStage::Error);
        assert_eq!(cancelled.error_message.as_deref(), Some("cancelled by user"));

        // Video marked failed
        let video = store.get_video(&video_id).await.unwrap();
        assert_eq!(video.status, VideoStatus::Failed);
    }

    #[tokio::test]
    async fn test_cancel_terminal_job_is_validation_error() {
        let (store, video_id) = seeded_store().await;
        let mut job = ProcessingJob::new(video_id, JobConfig::default());
        job.complete(None);
        store.update_job(&job).await.unwrap();

        let err = dispatcher(&store, MockTaskBackend::new())
            .cancel(&job.job_id)
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_restart_only_from_error() {
        let (store, video_id) = seeded_store().await;
        let mut backend = MockTaskBackend::new();
        backend
            .expect_submit()
            .times(2)
            .returning(|_| Ok("msg".to_string()));
        backend.expect_revoke().returning(|_| Ok(()));
        backend.expect_clear_dedup().returning(|_| Ok(()));

        let d = dispatcher(&store, backend);
        let job = d
            .start_processing(&video_id, JobConfig::default())
            .await
            .unwrap();

        // Live job cannot restart
        let err = d.restart(&job.job_id).await.unwrap_err();
        assert!(err.is_validation());

        d.cancel(&job.job_id).await.unwrap();
        let restarted = d.restart(&job.job_id).await.unwrap();
        assert_eq!(restarted.stage, ProcessingStage::Uploading);
        assert_eq!(restarted.progress, 0.0);
        // History from the cancellation survives
        assert_eq!(restarted.error_history.len(), 1);
    }

    #[tokio::test]
    async fn test_restart_marks_video_processing_and_notifies() {
        let (store, video_id) = seeded_store().await;
        let mut job = ProcessingJob::new(video_id.clone(), JobConfig::default());
        job.fail("model down", None);
        store.update_job(&job).await.unwrap();

        let mut backend = MockTaskBackend::new();
        backend
            .expect_submit()
            .times(1)
            .returning(|_| Ok("msg-2".to_string()));
        let mut sink = MockNotificationSink::new();
        sink.expect_publish()
            .withf(|e| e.kind() == vchap_models::JobEventKind::StageChanged)
            .times(1)
            .returning(|_| Ok(()));

        let d = Dispatcher::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(backend),
            Arc::new(sink),
        );
        let restarted = d.restart(&job.job_id).await.unwrap();
        assert_eq!(restarted.stage, ProcessingStage::Uploading);

        let video = store.get_video(&video_id).await.unwrap();
        assert_eq!(video.status, VideoStatus::Processing);
    }
}
