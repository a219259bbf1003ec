//! Chapter models.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::video::VideoId;

/// An unvalidated chapter proposal from generation or parsing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CandidateChapter {
    /// Start time in seconds
    pub start_time: f64,
    /// Chapter title
    pub title: String,
    /// Model confidence, 0-1
    pub confidence: f64,
}

impl CandidateChapter {
    pub fn new(start_time: f64, title: impl Into<String>, confidence: f64) -> Self {
        Self {
            start_time,
            title: title.into(),
            confidence,
        }
    }
}

/// A validated chapter persisted for a video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Chapter {
    /// Video this chapter belongs to
    pub video_id: VideoId,

    /// Chapter title
    pub title: String,

    /// Start time in seconds
    pub start_time: f64,

    /// End time in seconds; None means "open until end of video"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<f64>,

    /// Model confidence, 0-1
    pub confidence: f64,

    /// Whether the chapter was AI-generated
    #[serde(default = "default_ai_generated")]
    pub is_ai_generated: bool,

    /// 1-based rank in the video's start_time ordering, dense
    pub order: u32,
}

fn default_ai_generated() -> bool {
    true
}

impl Chapter {
    /// Create an AI-generated chapter.
    pub fn new(
        video_id: VideoId,
        title: impl Into<String>,
        start_time: f64,
        end_time: Option<f64>,
        confidence: f64,
        order: u32,
    ) -> Self {
        Self {
            video_id,
            title: title.into(),
            start_time,
            end_time,
            confidence,
            is_ai_generated: true,
            order,
        }
    }

    /// Start time formatted as HH:MM:SS.
    pub fn timestamp(&self) -> String {
        format_timestamp(self.start_time)
    }

    /// Chapter duration in seconds, if the end is known.
    pub fn duration(&self) -> Option<f64> {
        self.end_time.map(|end| end - self.start_time)
    }
}

/// Format seconds as HH:MM:SS.
pub fn format_timestamp(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, secs)
}

/// Format a duration in a compact human form ("1h 2m 5s").
pub fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0.0), "00:00:00");
        assert_eq!(format_timestamp(65.9), "00:01:05");
        assert_eq!(format_timestamp(3661.0), "01:01:01");
        assert_eq!(format_timestamp(-3.0), "00:00:00");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(5.0), "5s");
        assert_eq!(format_duration(125.0), "2m 5s");
        assert_eq!(format_duration(3725.0), "1h 2m 5s");
    }

    #[test]
    fn test_chapter_duration() {
        let chapter = Chapter {
            video_id: VideoId::new(),
            title: "Intro".to_string(),
            start_time: 10.0,
            end_time: Some(70.0),
            confidence: 0.9,
            is_ai_generated: true,
            order: 1,
        };
        assert_eq!(chapter.duration(), Some(60.0));
        assert_eq!(chapter.timestamp(), "00:00:10");

        let open = Chapter {
            end_time: None,
            ..chapter
        };
        assert_eq!(open.duration(), None);
    }
}
