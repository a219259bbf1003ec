//! Task payload types for the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use vchap_models::{JobConfig, JobId, VideoId};

/// Task to transcribe a video and generate chapters.
///
/// One task corresponds to one [`vchap_models::ProcessingJob`]; the message
/// id returned by the queue on submit is stored on the job as its task
/// handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterTask {
    /// Processing job driven by this task
    pub job_id: JobId,
    /// Video to process
    pub video_id: VideoId,
    /// Job configuration snapshot
    pub config: JobConfig,
    /// When the task was created
    pub created_at: DateTime<Utc>,
}

impl ChapterTask {
    /// Create a new chapter task.
    pub fn new(job_id: JobId, video_id: VideoId, config: JobConfig) -> Self {
        Self {
            job_id,
            video_id,
            config,
            created_at: Utc::now(),
        }
    }

    /// Idempotency key for deduplication.
    ///
    /// Keyed by video only: at most one chaptering task may be live per
    /// video, which closes the dispatcher's check-then-create race at the
    /// storage layer.
    pub fn idempotency_key(&self) -> String {
        format!("chapter:{}", self.video_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idempotency_key_is_per_video() {
        let video_id = VideoId::new();
        let a = ChapterTask::new(JobId::new(), video_id.clone(), JobConfig::default());
        let b = ChapterTask::new(JobId::new(), video_id, JobConfig::default());
        // Different jobs, same video -> same key
        assert_eq!(a.idempotency_key(), b.idempotency_key());
    }

    #[test]
    fn test_task_roundtrip() {
        let task = ChapterTask::new(JobId::new(), VideoId::new(), JobConfig::default());
        let json = serde_json::to_string(&task).unwrap();
        let back: ChapterTask = serde_json::from_str(&json).unwrap();
        assert_eq!(back.job_id, task.job_id);
        assert_eq!(back.video_id, task.video_id);
    }
}
