//! Shared data models for the VidChapter backend.
//!
//! This crate provides Serde-serializable types for:
//! - Videos and their processing status
//! - Processing jobs and the stage state machine
//! - Chapters (candidates and validated)
//! - Transcript segments
//! - Notification event schemas

pub mod chapter;
pub mod config;
pub mod event;
pub mod job;
pub mod transcript;
pub mod video;

// Re-export common types
pub use chapter::{CandidateChapter, Chapter};
pub use config::JobConfig;
pub use event::{JobEvent, JobEventKind, JobEventPayload};
pub use job::{JobError, JobId, JobUpdate, ProcessingJob, ProcessingStage};
pub use transcript::{format_transcript, transcript_stats, TranscriptSegment, TranscriptStats, WordTiming};
pub use video::{VideoId, VideoRecord, VideoStatus};
