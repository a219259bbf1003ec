//! Chapter generation engine.
//!
//! Drives the language model: builds prompts from the transcript, retries
//! flaky calls, parses the output, and falls back to deterministic
//! time-sliced chapters when the model never produces anything usable.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use vchap_models::{CandidateChapter, JobConfig};

use crate::adapters::GenerationAdapter;
use crate::error::WorkerResult;
use crate::parse;

/// Model call attempts before giving up on the model entirely.
const MAX_ATTEMPTS: u32 = 3;
/// Confidence of deterministic fallback chapters.
const FALLBACK_CONFIDENCE: f64 = 0.5;
/// Number of deterministic fallback chapters.
const FALLBACK_COUNT: usize = 5;

const SYSTEM_PROMPT: &str = "You are an expert video content analyst. You segment videos \
into coherent chapters based on their transcript. Respond with a single JSON object of the \
form {\"chapters\": [{\"start_time\": <seconds>, \"title\": \"...\", \"confidence\": <0-1>}]} \
and nothing else.";

/// Which strategy produced the candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStrategy {
    /// Parsed from the model's JSON output
    Json,
    /// Recovered by the line-based parser
    LineFallback,
    /// Deterministic time-sliced fallback, no model output used
    Deterministic,
}

/// Result of a generation run, with provenance for job metadata.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationOutcome {
    pub candidates: Vec<CandidateChapter>,
    pub strategy: GenerationStrategy,
    /// Model call attempts actually made
    pub attempts: u32,
}

pub struct ChapterEngine {
    adapter: Arc<dyn GenerationAdapter>,
}

impl ChapterEngine {
    pub fn new(adapter: Arc<dyn GenerationAdapter>) -> Self {
        Self { adapter }
    }

    /// Generate chapter candidates for a transcript.
    ///
    /// Makes up to three model calls. A call whose output parses to any
    /// candidates ends the loop. Call errors are retried; only the last
    /// attempt's error propagates. If every call succeeds but nothing
    /// parses, the deterministic fallback supplies candidates instead of
    /// failing the job.
    ///
    /// `on_progress` receives local progress in [0, 100].
    pub async fn generate(
        &self,
        transcript_text: &str,
        duration: f64,
        config: &JobConfig,
        on_progress: impl Fn(f64),
    ) -> WorkerResult<GenerationOutcome> {
        let user_prompt = build_user_prompt(transcript_text, duration, config);
        let mut attempts = 0;

        for attempt in 1..=MAX_ATTEMPTS {
            attempts = attempt;
            on_progress((attempt - 1) as f64 / MAX_ATTEMPTS as f64 * 90.0);

            let output = match self.adapter.generate(SYSTEM_PROMPT, &user_prompt).await {
                Ok(output) => output,
                Err(e) if attempt < MAX_ATTEMPTS => {
                    warn!("Generation attempt {} failed: {}", attempt, e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            let from_json = parse::parse_json_chapters(&output);
            if !from_json.is_empty() {
                on_progress(100.0);
                info!(
                    "Generated {} candidates from JSON on attempt {}",
                    from_json.len(),
                    attempt
                );
                return Ok(GenerationOutcome {
                    candidates: from_json,
                    strategy: GenerationStrategy::Json,
                    attempts,
                });
            }

            let from_lines = parse::parse_line_chapters(&output);
            if !from_lines.is_empty() {
                on_progress(100.0);
                info!(
                    "Recovered {} candidates from lines on attempt {}",
                    from_lines.len(),
                    attempt
                );
                return Ok(GenerationOutcome {
                    candidates: from_lines,
                    strategy: GenerationStrategy::LineFallback,
                    attempts,
                });
            }

            warn!("Attempt {} produced no parseable chapters", attempt);
        }

        let candidates = fallback_chapters(config.min_chapter_length);
        warn!(
            "All {} attempts unparseable, using {} deterministic chapters",
            MAX_ATTEMPTS,
            candidates.len()
        );
        on_progress(100.0);
        Ok(GenerationOutcome {
            candidates,
            strategy: GenerationStrategy::Deterministic,
            attempts,
        })
    }
}

fn build_user_prompt(transcript_text: &str, duration: f64, config: &JobConfig) -> String {
    format!(
        "Segment this {:.0}-second video into 2 to {} chapters. \
Chapters must start at least {:.0} seconds apart, the first at 0. \
Use timestamps from the transcript, not invented ones.\n\nTranscript:\n{}",
        duration,
        config.max_chapters,
        config.min_chapter_length,
        transcript_text
    )
}

/// Evenly spaced chapters used when the model yields nothing usable.
///
/// Always `FALLBACK_COUNT` chapters, one every `min_chapter_length`
/// seconds starting at 0. The validator drops any that land past the
/// video's end.
pub fn fallback_chapters(min_chapter_length: f64) -> Vec<CandidateChapter> {
    (0..FALLBACK_COUNT)
        .map(|i| {
            CandidateChapter::new(
                i as f64 * min_chapter_length,
                format!("Chapter {}", i + 1),
                FALLBACK_CONFIDENCE,
            )
        })
        .collect()
}
