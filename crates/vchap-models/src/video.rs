//! Video metadata models.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a video.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct VideoId(pub String);

impl VideoId {
    /// Generate a new random video ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for VideoId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for VideoId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VideoId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Video processing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum VideoStatus {
    /// Uploaded, no job started yet
    #[default]
    Pending,
    /// A processing job is active
    Processing,
    /// Chaptering completed successfully
    Completed,
    /// Processing failed
    Failed,
}

impl VideoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Pending => "pending",
            VideoStatus::Processing => "processing",
            VideoStatus::Completed => "completed",
            VideoStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Video record as seen by the orchestrator.
///
/// The full upload metadata lives elsewhere; the orchestrator only reads
/// the duration and media path and writes the processing status.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct VideoRecord {
    /// Unique video ID
    pub video_id: VideoId,

    /// Path to the media file on shared storage
    pub media_path: String,

    /// Duration in seconds (unknown until probed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,

    /// Processing status
    #[serde(default)]
    pub status: VideoStatus,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl VideoRecord {
    /// Create a new video record.
    pub fn new(video_id: VideoId, media_path: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            video_id,
            media_path: media_path.into(),
            duration: None,
            status: VideoStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the duration.
    pub fn with_duration(mut self, duration: f64) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Update the processing status.
    pub fn set_status(&mut self, status: VideoStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// Duration formatted as HH:MM:SS, or "unknown".
    pub fn duration_formatted(&self) -> String {
        match self.duration {
            Some(secs) => crate::chapter::format_timestamp(secs),
            None => "unknown".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_id_generation() {
        let id1 = VideoId::new();
        let id2 = VideoId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_video_record_status() {
        let mut video = VideoRecord::new(VideoId::new(), "/data/videos/a.mp4");
        assert_eq!(video.status, VideoStatus::Pending);

        video.set_status(VideoStatus::Processing);
        assert_eq!(video.status, VideoStatus::Processing);
    }

    #[test]
    fn test_duration_formatting() {
        let video = VideoRecord::new(VideoId::new(), "/data/videos/a.mp4").with_duration(3725.0);
        assert_eq!(video.duration_formatted(), "01:02:05");

        let unknown = VideoRecord::new(VideoId::new(), "/data/videos/b.mp4");
        assert_eq!(unknown.duration_formatted(), "unknown");
    }
}
