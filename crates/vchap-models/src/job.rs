//! Processing job model and stage state machine.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::config::JobConfig;
use crate::video::VideoId;

/// Unique identifier for a processing job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
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

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pipeline stage of a processing job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStage {
    /// Video file is being uploaded
    #[default]
    Uploading,
    /// Extracting audio from the video
    ExtractingAudio,
    /// Transcribing audio to text
    GeneratingTranscript,
    /// Analyzing transcript content
    AnalyzingContent,
    /// Generating chapters with the language model
    GeneratingChapters,
    /// Persisting results
    Finalizing,
    /// Terminal: processing succeeded
    Complete,
    /// Terminal: processing failed
    Error,
}

impl ProcessingStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStage::Uploading => "uploading",
            ProcessingStage::ExtractingAudio => "extracting_audio",
            ProcessingStage::GeneratingTranscript => "generating_transcript",
            ProcessingStage::AnalyzingContent => "analyzing_content",
            ProcessingStage::GeneratingChapters => "generating_chapters",
            ProcessingStage::Finalizing => "finalizing",
            ProcessingStage::Complete => "complete",
            ProcessingStage::Error => "error",
        }
    }

    /// Human-readable description of the stage.
    pub fn description(&self) -> &'static str {
        match self {
            ProcessingStage::Uploading => "Uploading video file",
            ProcessingStage::ExtractingAudio => "Extracting audio from video",
            ProcessingStage::GeneratingTranscript => "Generating transcript",
            ProcessingStage::AnalyzingContent => "Analyzing video content",
            ProcessingStage::GeneratingChapters => "Generating chapters",
            ProcessingStage::Finalizing => "Finalizing results",
            ProcessingStage::Complete => "Processing complete",
            ProcessingStage::Error => "Processing failed",
        }
    }

    /// Terminal stages absorb all further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessingStage::Complete | ProcessingStage::Error)
    }

    /// The non-terminal stages, in pipeline order.
    pub fn pipeline_stages() -> [ProcessingStage; 6] {
        [
            ProcessingStage::Uploading,
            ProcessingStage::ExtractingAudio,
            ProcessingStage::GeneratingTranscript,
            ProcessingStage::AnalyzingContent,
            ProcessingStage::GeneratingChapters,
            ProcessingStage::Finalizing,
        ]
    }
}

impl fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned by illegal state-machine transitions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("invalid transition: {operation} requires stage {required}, job is {actual}")]
    InvalidTransition {
        operation: &'static str,
        required: ProcessingStage,
        actual: ProcessingStage,
    },
}

/// One entry in the append-only error history.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ErrorRecord {
    /// When the failure was recorded
    pub timestamp: DateTime<Utc>,
    /// Stage the job was in when it failed
    pub stage: ProcessingStage,
    /// Human-readable message
    pub message: String,
    /// Structured details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Arguments for [`ProcessingJob::advance`].
///
/// All fields are optional; maps are shallow-merged with later keys
/// overwriting earlier ones.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub stage: Option<ProcessingStage>,
    pub progress: Option<f64>,
    pub stage_progress: Option<HashMap<ProcessingStage, f64>>,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl JobUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(mut self, stage: ProcessingStage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn stage_progress(mut self, stage: ProcessingStage, local: f64) -> Self {
        self.stage_progress
            .get_or_insert_with(HashMap::new)
            .insert(stage, local);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value);
        self
    }
}

/// One unit of orchestration state: a video chaptering job.
///
/// Created when processing starts and mutated only through the
/// state-machine operations below. Every mutation bumps `updated_at`;
/// persistence of the whole record is one logical write.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProcessingJob {
    /// Unique job ID
    pub job_id: JobId,

    /// Video this job processes
    pub video_id: VideoId,

    /// Current pipeline stage
    #[serde(default)]
    pub stage: ProcessingStage,

    /// Overall progress, 0-100
    #[serde(default)]
    pub progress: f64,

    /// Per-stage local progress, 0-100
    #[serde(default)]
    pub stage_progress: HashMap<ProcessingStage, f64>,

    /// When processing started
    pub started_at: DateTime<Utc>,

    /// When the job reached a terminal stage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,

    /// Error message (if failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Structured error details (if failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<serde_json::Value>,

    /// Append-only history of failures across restarts
    #[serde(default)]
    pub error_history: Vec<ErrorRecord>,

    /// Free-form processing metadata
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,

    /// Job configuration
    #[serde(default)]
    pub config: JobConfig,

    /// Opaque handle into the task queue
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_handle: Option<String>,
}

impl ProcessingJob {
    /// Create a new job in the initial Uploading stage.
    pub fn new(video_id: VideoId, config: JobConfig) -> Self {
        let now = Utc::now();
        Self {
            job_id: JobId::new(),
            video_id,
            stage: ProcessingStage::Uploading,
            progress: 0.0,
            stage_progress: Self::initial_stage_progress(),
            started_at: now,
            ended_at: None,
            updated_at: now,
            error_message: None,
            error_details: None,
            error_history: Vec::new(),
            metadata: HashMap::new(),
            config,
            task_handle: None,
        }
    }

    fn initial_stage_progress() -> HashMap<ProcessingStage, f64> {
        ProcessingStage::pipeline_stages()
            .into_iter()
            .map(|s| (s, 0.0))
            .collect()
    }

    /// Apply a progress update.
    ///
    /// Clamps progress to [0, 100] and shallow-merges the stage-progress
    /// and metadata maps. When the resulting progress reaches 100 and the
    /// job is not in Error, the stage auto-promotes to Complete and the
    /// end timestamp is stamped if unset. Applying the same update twice
    /// yields the same state.
    pub fn advance(&mut self, update: JobUpdate) {
        if let Some(stage) = update.stage {
            self.stage = stage;
        }

        if let Some(progress) = update.progress {
            self.progress = progress.clamp(0.0, 100.0);
        }

        if let Some(stage_progress) = update.stage_progress {
            for (stage, local) in stage_progress {
                self.stage_progress.insert(stage, local.clamp(0.0, 100.0));
            }
        }

        if let Some(metadata) = update.metadata {
            self.metadata.extend(metadata);
        }

        if self.progress >= 100.0 && self.stage != ProcessingStage::Error {
            self.stage = ProcessingStage::Complete;
            if self.ended_at.is_none() {
                self.ended_at = Some(Utc::now());
            }
        }

        self.updated_at = Utc::now();
    }

    /// Mark the job as failed.
    ///
    /// Terminal and absorbing: once in Error, further calls only append to
    /// the error history. Always records a history entry carrying the
    /// stage the job was in when the failure occurred.
    pub fn fail(&mut self, message: impl Into<String>, details: Option<serde_json::Value>) {
        let message = message.into();
        let stage_at_failure = self.stage;

        self.error_history.push(ErrorRecord {
            timestamp: Utc::now(),
            stage: stage_at_failure,
            message: message.clone(),
            details: details.clone(),
        });

        if self.stage != ProcessingStage::Error {
            self.stage = ProcessingStage::Error;
            self.error_message = Some(message);
            self.error_details = details;
            if self.ended_at.is_none() {
                self.ended_at = Some(Utc::now());
            }
        }

        self.updated_at = Utc::now();
    }

    /// Mark the job as complete.
    pub fn complete(&mut self, chapters_generated: Option<usize>) {
        self.stage = ProcessingStage::Complete;
        self.progress = 100.0;
        if self.ended_at.is_none() {
            self.ended_at = Some(Utc::now());
        }
        if let Some(count) = chapters_generated {
            self.metadata
                .insert("chapters_generated".to_string(), serde_json::json!(count));
        }
        self.updated_at = Utc::now();
    }

    /// Reset a failed job back to the initial stage.
    ///
    /// Only legal from Error; any other stage is a typed error and leaves
    /// the job untouched.
    pub fn restart(&mut self) -> Result<(), JobError> {
        if self.stage != ProcessingStage::Error {
            return Err(JobError::InvalidTransition {
                operation: "restart",
                required: ProcessingStage::Error,
                actual: self.stage,
            });
        }

        self.stage = ProcessingStage::Uploading;
        self.progress = 0.0;
        self.stage_progress = Self::initial_stage_progress();
        self.error_message = None;
        self.error_details = None;
        self.started_at = Utc::now();
        self.ended_at = None;
        self.task_handle = None;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Terminal check: Complete or Error.
    pub fn is_complete(&self) -> bool {
        self.stage.is_terminal()
    }

    /// Actively processing: past Uploading, not yet terminal.
    pub fn is_active(&self) -> bool {
        !self.is_complete() && self.stage != ProcessingStage::Uploading
    }

    /// Seconds elapsed between start and end (or now if still running).
    pub fn elapsed(&self) -> f64 {
        let end = self.ended_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds() as f64 / 1000.0
    }

    /// Estimated seconds remaining, extrapolated from current progress.
    ///
    /// None until any progress has been made.
    pub fn estimated_remaining(&self) -> Option<f64> {
        if self.progress <= 0.0 {
            return None;
        }
        let elapsed = self.elapsed();
        if elapsed <= 0.0 {
            return None;
        }
        let total = elapsed * (100.0 / self.progress);
        Some((total - elapsed).max(0.0))
    }

    /// Local progress for a single stage.
    pub fn stage_progress_for(&self, stage: ProcessingStage) -> f64 {
        self.stage_progress.get(&stage).copied().unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> ProcessingJob {
        ProcessingJob::new(VideoId::new(), JobConfig::default())
    }

    #[test]
    fn test_new_job_initial_state() {
        let job = job();
        assert_eq!(job.stage, ProcessingStage::Uploading);
        assert_eq!(job.progress, 0.0);
        assert!(!job.is_complete());
        assert!(!job.is_active());
        assert_eq!(job.stage_progress.len(), 6);
        assert!(job.stage_progress.values().all(|p| *p == 0.0));
    }

    #[test]
    fn test_advance_sets_stage_and_clamps_progress() {
        let mut job = job();
        job.advance(
            JobUpdate::new()
                .stage(ProcessingStage::GeneratingTranscript)
                .progress(150.0),
        );
        // 150 clamps to 100, which auto-promotes to Complete
        assert_eq!(job.progress, 100.0);
        assert_eq!(job.stage, ProcessingStage::Complete);
        assert!(job.ended_at.is_some());

        let mut job2 = ProcessingJob::new(VideoId::new(), JobConfig::default());
        job2.advance(JobUpdate::new().progress(-5.0));
        assert_eq!(job2.progress, 0.0);
    }

    #[test]
    fn test_advance_is_idempotent() {
        let mut job = job();
        let update = JobUpdate::new()
            .stage(ProcessingStage::GeneratingChapters)
            .progress(60.0)
            .stage_progress(ProcessingStage::GeneratingChapters, 30.0)
            .metadata("step", serde_json::json!("generation"));

        job.advance(update.clone());
        let stage = job.stage;
        let progress = job.progress;
        let stage_progress = job.stage_progress.clone();
        let metadata = job.metadata.clone();

        job.advance(update);
        assert_eq!(job.stage, stage);
        assert_eq!(job.progress, progress);
        assert_eq!(job.stage_progress, stage_progress);
        assert_eq!(job.metadata, metadata);
    }

    #[test]
    fn test_advance_merges_metadata() {
        let mut job = job();
        job.advance(JobUpdate::new().metadata("a", serde_json::json!(1)));
        job.advance(
            JobUpdate::new()
                .metadata("a", serde_json::json!(2))
                .metadata("b", serde_json::json!("x")),
        );
        assert_eq!(job.metadata["a"], serde_json::json!(2));
        assert_eq!(job.metadata["b"], serde_json::json!("x"));
    }

    #[test]
    fn test_progress_100_does_not_override_error() {
        let mut job = job();
        job.fail("boom", None);
        job.advance(JobUpdate::new().progress(100.0));
        assert_eq!(job.stage, ProcessingStage::Error);
    }

    #[test]
    fn test_fail_is_absorbing_and_appends_history() {
        let mut job = job();
        job.advance(JobUpdate::new().stage(ProcessingStage::GeneratingChapters));
        job.fail("first", Some(serde_json::json!({"code": 1})));

        assert_eq!(job.stage, ProcessingStage::Error);
        assert_eq!(job.error_message.as_deref(), Some("first"));
        assert_eq!(job.error_history.len(), 1);
        assert_eq!(
            job.error_history[0].stage,
            ProcessingStage::GeneratingChapters
        );
        let ended = job.ended_at;

        job.fail("second", None);
        // Message and end time unchanged, history grows
        assert_eq!(job.error_message.as_deref(), Some("first"));
        assert_eq!(job.ended_at, ended);
        assert_eq!(job.error_history.len(), 2);
        assert_eq!(job.error_history[1].stage, ProcessingStage::Error);
    }

    #[test]
    fn test_complete_records_chapter_count() {
        let mut job = job();
        job.complete(Some(7));
        assert_eq!(job.stage, ProcessingStage::Complete);
        assert_eq!(job.progress, 100.0);
        assert_eq!(job.metadata["chapters_generated"], serde_json::json!(7));
        assert!(job.is_complete());
    }

    #[test]
    fn test_restart_only_from_error() {
        let mut job = job();
        let err = job.restart().unwrap_err();
        assert_eq!(
            err,
            JobError::InvalidTransition {
                operation: "restart",
                required: ProcessingStage::Error,
                actual: ProcessingStage::Uploading,
            }
        );
        // No state change
        assert_eq!(job.stage, ProcessingStage::Uploading);

        job.advance(JobUpdate::new().progress(40.0));
        job.fail("boom", None);
        job.task_handle = Some("task-1".to_string());

        job.restart().unwrap();
        assert_eq!(job.stage, ProcessingStage::Uploading);
        assert_eq!(job.progress, 0.0);
        assert!(job.error_message.is_none());
        assert!(job.error_details.is_none());
        assert!(job.ended_at.is_none());
        assert!(job.task_handle.is_none());
        assert!(job.stage_progress.values().all(|p| *p == 0.0));
        // History survives restarts
        assert_eq!(job.error_history.len(), 1);
    }

    #[test]
    fn test_restart_from_complete_is_rejected() {
        let mut job = job();
        job.complete(None);
        assert!(job.restart().is_err());
        assert_eq!(job.stage, ProcessingStage::Complete);
    }

    #[test]
    fn test_is_active() {
        let mut job = job();
        assert!(!job.is_active());
        job.advance(JobUpdate::new().stage(ProcessingStage::GeneratingTranscript));
        assert!(job.is_active());
        job.complete(None);
        assert!(!job.is_active());
    }

    #[test]
    fn test_estimated_remaining() {
        let mut job = job();
        assert!(job.estimated_remaining().is_none());

        job.started_at = Utc::now() - chrono::Duration::seconds(30);
        job.advance(JobUpdate::new().progress(50.0));
        let remaining = job.estimated_remaining().unwrap();
        // 30s elapsed at 50% -> ~30s remaining
        assert!((remaining - 30.0).abs() < 2.0);
    }
}
