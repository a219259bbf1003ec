//! Notification event schema.
//!
//! Events are published to subscribers keyed by job and video id.
//! Delivery is best-effort and at-most-once; the orchestrator never waits
//! for acknowledgment.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::chapter::Chapter;
use crate::job::{JobId, ProcessingStage};
use crate::video::VideoId;

/// Event kind, for routing and filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobEventKind {
    Progress,
    StageChanged,
    Completed,
    Failed,
}

/// Event payload.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEventPayload {
    /// Progress update (global 0-100 plus a human-readable message)
    Progress { progress: f64, message: String },

    /// The job entered a new stage
    StageChanged {
        #[serde(rename = "newStage")]
        new_stage: ProcessingStage,
    },

    /// Processing finished; carries the final chapter list
    Completed { chapters: Vec<Chapter> },

    /// Processing failed
    Failed {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<serde_json::Value>,
    },
}

/// Notification envelope for one job event.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobEvent {
    /// Job the event belongs to
    pub job_id: JobId,
    /// Video the job processes
    pub video_id: VideoId,
    /// Event payload
    #[serde(flatten)]
    pub payload: JobEventPayload,
    /// When the event was emitted
    pub timestamp: DateTime<Utc>,
}

impl JobEvent {
    fn new(job_id: JobId, video_id: VideoId, payload: JobEventPayload) -> Self {
        Self {
            job_id,
            video_id,
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Create a progress event.
    pub fn progress(
        job_id: JobId,
        video_id: VideoId,
        progress: f64,
        message: impl Into<String>,
    ) -> Self {
        Self::new(
            job_id,
            video_id,
            JobEventPayload::Progress {
                progress: progress.clamp(0.0, 100.0),
                message: message.into(),
            },
        )
    }

    /// Create a stage-changed event.
    pub fn stage_changed(job_id: JobId, video_id: VideoId, new_stage: ProcessingStage) -> Self {
        Self::new(
            job_id,
            video_id,
            JobEventPayload::StageChanged { new_stage },
        )
    }

    /// Create a completion event.
    pub fn completed(job_id: JobId, video_id: VideoId, chapters: Vec<Chapter>) -> Self {
        Self::new(job_id, video_id, JobEventPayload::Completed { chapters })
    }

    /// Create a failure event.
    pub fn failed(
        job_id: JobId,
        video_id: VideoId,
        error: impl Into<String>,
        details: Option<serde_json::Value>,
    ) -> Self {
        Self::new(
            job_id,
            video_id,
            JobEventPayload::Failed {
                error: error.into(),
                details,
            },
        )
    }

    /// Get the event kind.
    pub fn kind(&self) -> JobEventKind {
        match self.payload {
            JobEventPayload::Progress { .. } => JobEventKind::Progress,
            JobEventPayload::StageChanged { .. } => JobEventKind::StageChanged,
            JobEventPayload::Completed { .. } => JobEventKind::Completed,
            JobEventPayload::Failed { .. } => JobEventKind::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = JobEvent::progress(JobId::new(), VideoId::new(), 42.5, "Transcribing");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"progress\""));
        assert!(json.contains("\"progress\":42.5"));
        assert_eq!(event.kind(), JobEventKind::Progress);
    }

    #[test]
    fn test_progress_clamped() {
        let event = JobEvent::progress(JobId::new(), VideoId::new(), 120.0, "done");
        if let JobEventPayload::Progress { progress, .. } = event.payload {
            assert_eq!(progress, 100.0);
        } else {
            panic!("expected progress payload");
        }
    }

    #[test]
    fn test_stage_changed_serialization() {
        let event =
            JobEvent::stage_changed(JobId::new(), VideoId::new(), ProcessingStage::Finalizing);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"stage_changed\""));
        assert!(json.contains("\"newStage\":\"finalizing\""));
    }

    #[test]
    fn test_failed_roundtrip() {
        let event = JobEvent::failed(
            JobId::new(),
            VideoId::new(),
            "adapter timeout",
            Some(serde_json::json!({"attempts": 3})),
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: JobEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind(), JobEventKind::Failed);
    }
}
