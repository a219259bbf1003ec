//! Per-job processing configuration.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Configuration carried by a processing job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobConfig {
    /// Minimum spacing between chapter start times, in seconds
    #[serde(default = "default_min_chapter_length")]
    pub min_chapter_length: f64,

    /// Maximum number of chapters to keep
    #[serde(default = "default_max_chapters")]
    pub max_chapters: usize,

    /// Transcription language (auto-detect when unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// Initial prompt to guide transcription
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_prompt: Option<String>,
}

fn default_min_chapter_length() -> f64 {
    30.0
}

fn default_max_chapters() -> usize {
    15
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            min_chapter_length: default_min_chapter_length(),
            max_chapters: default_max_chapters(),
            language: None,
            initial_prompt: None,
        }
    }
}

impl JobConfig {
    /// Set the transcription language.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Set the minimum chapter length.
    pub fn with_min_chapter_length(mut self, seconds: f64) -> Self {
        self.min_chapter_length = seconds;
        self
    }

    /// Set the maximum chapter count.
    pub fn with_max_chapters(mut self, max: usize) -> Self {
        self.max_chapters = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = JobConfig::default();
        assert_eq!(config.min_chapter_length, 30.0);
        assert_eq!(config.max_chapters, 15);
        assert!(config.language.is_none());
    }

    #[test]
    fn test_deserialize_with_missing_fields() {
        let config: JobConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, JobConfig::default());

        let config: JobConfig =
            serde_json::from_str(r#"{"min_chapter_length": 60, "language": "en"}"#).unwrap();
        assert_eq!(config.min_chapter_length, 60.0);
        assert_eq!(config.max_chapters, 15);
        assert_eq!(config.language.as_deref(), Some("en"));
    }
}
