//! Transcript segment models and formatting.
//!
//! Segments are ephemeral: they flow from the transcription adapter into
//! the chapter generation engine and are not persisted.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::chapter::format_timestamp;

/// Word-level timing within a segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WordTiming {
    pub word: String,
    pub start: f64,
    pub end: f64,
    /// Recognition probability, 0-1
    #[serde(default)]
    pub probability: f64,
}

/// One transcribed segment with timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TranscriptSegment {
    /// Start time in seconds
    pub start: f64,
    /// End time in seconds
    pub end: f64,
    /// Transcribed text
    pub text: String,
    /// Optional word-level timings
    #[serde(default)]
    pub words: Vec<WordTiming>,
}

/// Summary statistics over a transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TranscriptStats {
    pub total_segments: usize,
    pub total_duration: f64,
    pub total_words: usize,
    pub total_characters: usize,
    /// Words per minute
    pub speaking_rate_wpm: f64,
}

/// Format segments for language-model input: one `[HH:MM:SS] text` line
/// per non-empty segment.
pub fn format_transcript(segments: &[TranscriptSegment]) -> String {
    let mut lines = Vec::with_capacity(segments.len());
    for segment in segments {
        let text = segment.text.trim();
        if !text.is_empty() {
            lines.push(format!("[{}] {}", format_timestamp(segment.start), text));
        }
    }
    lines.join("\n")
}

/// Compute transcript statistics.
pub fn transcript_stats(segments: &[TranscriptSegment]) -> TranscriptStats {
    let total_duration = segments.iter().map(|s| s.end).fold(0.0_f64, f64::max);
    let total_words: usize = segments.iter().map(|s| s.words.len()).sum();
    let total_characters: usize = segments.iter().map(|s| s.text.len()).sum();

    let speaking_rate_wpm = if total_duration > 0.0 {
        (total_words as f64 / total_duration) * 60.0
    } else {
        0.0
    };

    TranscriptStats {
        total_segments: segments.len(),
        total_duration,
        total_words,
        total_characters,
        speaking_rate_wpm: (speaking_rate_wpm * 10.0).round() / 10.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(start: f64, end: f64, text: &str) -> TranscriptSegment {
        TranscriptSegment {
            start,
            end,
            text: text.to_string(),
            words: Vec::new(),
        }
    }

    #[test]
    fn test_format_transcript() {
        let segments = vec![
            segment(0.0, 4.2, "Hello and welcome."),
            segment(4.2, 8.0, "  "),
            segment(65.0, 70.0, "Let's get started."),
        ];
        let formatted = format_transcript(&segments);
        assert_eq!(
            formatted,
            "[00:00:00] Hello and welcome.\n[00:01:05] Let's get started."
        );
    }

    #[test]
    fn test_transcript_stats() {
        let mut seg = segment(0.0, 60.0, "one two three");
        seg.words = vec![
            WordTiming {
                word: "one".into(),
                start: 0.0,
                end: 1.0,
                probability: 0.99,
            },
            WordTiming {
                word: "two".into(),
                start: 1.0,
                end: 2.0,
                probability: 0.98,
            },
        ];
        let stats = transcript_stats(&[seg]);
        assert_eq!(stats.total_segments, 1);
        assert_eq!(stats.total_duration, 60.0);
        assert_eq!(stats.total_words, 2);
        assert_eq!(stats.speaking_rate_wpm, 2.0);
    }

    #[test]
    fn test_stats_empty() {
        let stats = transcript_stats(&[]);
        assert_eq!(stats.total_segments, 0);
        assert_eq!(stats.speaking_rate_wpm, 0.0);
    }
}
