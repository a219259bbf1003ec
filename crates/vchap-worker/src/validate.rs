//! Chapter validation and merging.
//!
//! Turns raw candidates into the final chapter list:
//! drop out-of-range candidates, sort, greedily merge near-duplicates,
//! guarantee a chapter at 0:00, cap the count, and chain end times.

use vchap_models::{CandidateChapter, Chapter, JobConfig, VideoId};

/// Confidence of a synthesized Introduction chapter.
const INTRO_CONFIDENCE: f64 = 0.8;

/// Validate, merge, and finalize candidates into persisted chapters.
///
/// Guarantees on the output:
/// - sorted by start time, starts strictly increasing
/// - the first chapter starts at 0:00
/// - adjacent starts are at least `min_chapter_length` apart
/// - at most `max_chapters` entries
/// - `end_time` equals the next chapter's start; the last is open
/// - `order` is a dense 1-based rank
pub fn validate_and_merge(
    video_id: &VideoId,
    candidates: Vec<CandidateChapter>,
    duration: Option<f64>,
    config: &JobConfig,
) -> Vec<Chapter> {
    let mut candidates: Vec<CandidateChapter> = candidates
        .into_iter()
        .filter(|c| c.start_time >= 0.0 && !c.title.trim().is_empty())
        .filter(|c| duration.map_or(true, |d| c.start_time < d))
        .map(|mut c| {
            c.confidence = c.confidence.clamp(0.0, 1.0);
            c
        })
        .collect();

    candidates.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));

    // The synthesized opener takes part in the merge like any candidate:
    // a stronger chapter within the minimum gap replaces it and absorbs
    // its 0:00 start, so the output still opens at zero.
    let mut kept = merge_close(ensure_intro(candidates), config.min_chapter_length);
    if let Some(first) = kept.first_mut() {
        if first.start_time > 0.0 {
            first.start_time = 0.0;
        }
    }

    // Cap by confidence, but the opening chapter is never dropped
    if kept.len() > config.max_chapters {
        let head = kept.remove(0);
        kept.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        kept.truncate(config.max_chapters - 1);
        kept.insert(0, head);
        kept.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
    }

    let starts: Vec<f64> = kept.iter().map(|c| c.start_time).collect();
    kept.into_iter()
        .enumerate()
        .map(|(i, c)| {
            let end_time = starts.get(i + 1).copied();
            Chapter::new(
                video_id.clone(),
                c.title,
                c.start_time,
                end_time,
                c.confidence,
                (i + 1) as u32,
            )
        })
        .collect()
}

/// Greedy single-pass merge of candidates closer than `min_gap` seconds.
///
/// A conflicting candidate replaces the one it collides with only when
/// its confidence is strictly greater; on ties the earlier one wins, so
/// the pass is deterministic for equal-confidence duplicates.
fn merge_close(sorted: Vec<CandidateChapter>, min_gap: f64) -> Vec<CandidateChapter> {
    let mut kept: Vec<CandidateChapter> = Vec::with_capacity(sorted.len());

    for candidate in sorted {
        match kept.last_mut() {
            Some(last) if candidate.start_time - last.start_time < min_gap => {
                if candidate.confidence > last.confidence {
                    *last = candidate;
                }
            }
            _ => kept.push(candidate),
        }
    }

    kept
}

/// Guarantee the list opens at 0:00, synthesizing an Introduction if the
/// model never proposed one.
fn ensure_intro(mut candidates: Vec<CandidateChapter>) -> Vec<CandidateChapter> {
    match candidates.first() {
        Some(first) if first.start_time == 0.0 => candidates,
        _ => {
            candidates.insert(
                0,
                CandidateChapter::new(0.0, "Introduction", INTRO_CONFIDENCE),
            );
            candidates
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> JobConfig {
        JobConfig::default()
    }

    fn cand(start: f64, title: &str, confidence: f64) -> CandidateChapter {
        CandidateChapter::new(start, title, confidence)
    }

    #[test]
    fn test_merge_and_end_chaining() {
        let video_id = VideoId::new();
        let candidates = vec![
            cand(0.0, "Intro", 0.9),
            cand(300.0, "Body", 0.6),
            cand(320.0, "Body2", 0.95),
            cand(2700.0, "Wrap", 0.85),
        ];

        let chapters = validate_and_merge(&video_id, candidates, Some(3000.0), &config());

        // 320 collides with 300 (gap 20 < 30) and wins on confidence
        assert_eq!(chapters.len(), 3);
        assert_eq!(chapters[0].start_time, 0.0);
        assert_eq!(chapters[0].end_time, Some(320.0));
        assert_eq!(chapters[1].start_time, 320.0);
        assert_eq!(chapters[1].title, "Body2");
        assert_eq!(chapters[1].end_time, Some(2700.0));
        assert_eq!(chapters[2].start_time, 2700.0);
        assert_eq!(chapters[2].end_time, None);
        assert_eq!(
            chapters.iter().map(|c| c.order).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_tie_keeps_earlier_candidate() {
        let video_id = VideoId::new();
        let candidates = vec![cand(0.0, "First", 0.7), cand(10.0, "Second", 0.7)];
        let chapters = validate_and_merge(&video_id, candidates, None, &config());
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].title, "First");
    }

    #[test]
    fn test_intro_synthesized_when_missing() {
        let video_id = VideoId::new();
        let candidates = vec![cand(120.0, "Deep Dive", 0.9)];
        let chapters = validate_and_merge(&video_id, candidates, Some(600.0), &config());

        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].title, "Introduction");
        assert_eq!(chapters[0].start_time, 0.0);
        assert_eq!(chapters[0].confidence, 0.8);
        assert_eq!(chapters[0].end_time, Some(120.0));
    }

    #[test]
    fn test_near_zero_candidate_absorbs_synthesized_intro() {
        let video_id = VideoId::new();
        // Stronger than the 0.8 synthetic opener and within the minimum gap
        let candidates = vec![cand(10.0, "Cold Open", 0.9)];
        let chapters = validate_and_merge(&video_id, candidates, Some(600.0), &config());

        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].title, "Cold Open");
        assert_eq!(chapters[0].start_time, 0.0);
    }

    #[test]
    fn test_weak_near_zero_candidate_loses_to_intro() {
        let video_id = VideoId::new();
        let candidates = vec![cand(10.0, "Cold Open", 0.5)];
        let chapters = validate_and_merge(&video_id, candidates, Some(600.0), &config());

        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].title, "Introduction");
        assert_eq!(chapters[0].start_time, 0.0);
    }

    #[test]
    fn test_out_of_range_candidates_dropped() {
        let video_id = VideoId::new();
        let candidates = vec![
            cand(-5.0, "Before the start", 0.9),
            cand(0.0, "Opening", 0.9),
            cand(650.0, "Past the end", 0.9),
            cand(100.0, "   ", 0.9),
        ];
        let chapters = validate_and_merge(&video_id, candidates, Some(600.0), &config());
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].title, "Opening");
    }

    #[test]
    fn test_cap_keeps_opening_chapter_and_highest_confidence() {
        let video_id = VideoId::new();
        // 20 candidates, 60s apart; the opener has the lowest confidence
        let mut candidates = vec![cand(0.0, "Opening", 0.1)];
        for i in 1..20 {
            candidates.push(cand(i as f64 * 60.0, &format!("Part {}", i), 0.5 + i as f64 / 100.0));
        }

        let chapters = validate_and_merge(&video_id, candidates, None, &config());

        assert_eq!(chapters.len(), 15);
        assert_eq!(chapters[0].start_time, 0.0);
        assert_eq!(chapters[0].title, "Opening");
        // Sorted by start with dense 1-based order
        for (i, c) in chapters.iter().enumerate() {
            assert_eq!(c.order, (i + 1) as u32);
        }
        for pair in chapters.windows(2) {
            assert!(pair[0].start_time < pair[1].start_time);
            assert_eq!(pair[0].end_time, Some(pair[1].start_time));
        }
        // The 14 highest-confidence non-opening candidates survive
        assert_eq!(chapters[1].title, "Part 6");
    }

    #[test]
    fn test_empty_candidates_yield_intro_only() {
        let video_id = VideoId::new();
        let chapters = validate_and_merge(&video_id, Vec::new(), Some(600.0), &config());
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].title, "Introduction");
        assert_eq!(chapters[0].end_time, None);
    }

    #[test]
    fn test_confidence_clamped() {
        let video_id = VideoId::new();
        let chapters =
            validate_and_merge(&video_id, vec![cand(0.0, "Hot take", 1.7)], None, &config());
        assert_eq!(chapters[0].confidence, 1.0);
    }
}
