//! Parsing of raw model output into chapter candidates.
//!
//! Two strategies run in order and the first that yields any candidates
//! wins: a JSON extractor for well-behaved model output, then a
//! line-based fallback for output that ignored the format instructions.

use regex::Regex;
use std::sync::OnceLock;

use vchap_models::CandidateChapter;

/// Confidence assigned to JSON candidates that omit the field.
const DEFAULT_JSON_CONFIDENCE: f64 = 0.8;
/// Confidence assigned to candidates recovered by the line fallback.
const LINE_FALLBACK_CONFIDENCE: f64 = 0.7;
/// Line-parsed titles this short are noise, not chapters.
const MIN_LINE_TITLE_LEN: usize = 4;

/// Parse model output with both strategies; first non-empty result wins.
pub fn parse_model_output(text: &str) -> Vec<CandidateChapter> {
    let from_json = parse_json_chapters(text);
    if !from_json.is_empty() {
        return from_json;
    }
    parse_line_chapters(text)
}

/// Parse a `{"chapters": [...]}` object embedded anywhere in the text.
///
/// Models often wrap JSON in prose or code fences, so this scans for
/// balanced objects rather than parsing the whole response.
pub fn parse_json_chapters(text: &str) -> Vec<CandidateChapter> {
    for object in balanced_objects(text) {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(object) else {
            continue;
        };
        let Some(items) = value.get("chapters").and_then(|c| c.as_array()) else {
            continue;
        };

        let mut candidates = Vec::new();
        for item in items {
            let Some(start_time) = json_start_time(item) else {
                continue;
            };
            let Some(title) = item
                .get("title")
                .and_then(|t| t.as_str())
                .map(str::trim)
                .filter(|t| !t.is_empty())
            else {
                continue;
            };
            let confidence = item
                .get("confidence")
                .and_then(|c| c.as_f64())
                .unwrap_or(DEFAULT_JSON_CONFIDENCE);

            candidates.push(CandidateChapter::new(start_time, title, confidence));
        }

        if !candidates.is_empty() {
            return candidates;
        }
    }

    Vec::new()
}

fn json_start_time(item: &serde_json::Value) -> Option<f64> {
    item.get("start_time")
        .and_then(|v| v.as_f64())
        .filter(|v| *v >= 0.0)
}

/// Yield the balanced `{...}` substrings of `text`, outermost only.
fn balanced_objects(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut objects = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' if depth > 0 => in_string = true,
            b'{' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            b'}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        objects.push(&text[start..=i]);
                    }
                }
            }
            _ => {}
        }
    }

    objects
}

fn line_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // Optional "Chapter N:" label, a MM:SS or HH:MM:SS timestamp, then the title
        Regex::new(
            r"(?i)^\s*(?:chapter\s*\d+\s*[:.\-]\s*)?\[?(\d{1,2}:\d{2}(?::\d{2})?)\]?\s*[-–—:]?\s*(.+?)\s*$",
        )
        .expect("line pattern is valid")
    })
}

/// Recover candidates from free-form lines like `03:15 - Getting Started`.
pub fn parse_line_chapters(text: &str) -> Vec<CandidateChapter> {
    let mut candidates = Vec::new();

    for line in text.lines() {
        let Some(caps) = line_pattern().captures(line) else {
            continue;
        };
        let Some(start_time) = parse_timestamp(&caps[1]) else {
            continue;
        };
        let title = caps[2].trim().trim_matches('"').trim();
        if title.len() < MIN_LINE_TITLE_LEN {
            continue;
        }

        candidates.push(CandidateChapter::new(
            start_time,
            title,
            LINE_FALLBACK_CONFIDENCE,
        ));
    }

    candidates
}

/// Parse `MM:SS` or `HH:MM:SS` into seconds.
pub fn parse_timestamp(s: &str) -> Option<f64> {
    let parts: Vec<&str> = s.trim().split(':').collect();
    let nums: Vec<u64> = parts
        .iter()
        .map(|p| p.parse::<u64>())
        .collect::<Result<_, _>>()
        .ok()?;

    match nums.as_slice() {
        [m, s] if *s < 60 => Some((m * 60 + s) as f64),
        [h, m, s] if *m < 60 && *s < 60 => Some((h * 3600 + m * 60 + s) as f64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp() {
        assert_eq!(parse_timestamp("03:15"), Some(195.0));
        assert_eq!(parse_timestamp("1:02:03"), Some(3723.0));
        assert_eq!(parse_timestamp("00:00"), Some(0.0));
        assert_eq!(parse_timestamp("3:75"), None);
        assert_eq!(parse_timestamp("abc"), None);
    }

    #[test]
    fn test_json_chapters_with_surrounding_prose() {
        let text = r#"Here are the chapters:
{"chapters": [
  {"start_time": 0, "title": "Introduction", "confidence": 0.9},
  {"start_time": 195.5, "title": "Main Topic"}
]}
Hope this helps!"#;

        let candidates = parse_json_chapters(text);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].title, "Introduction");
        assert_eq!(candidates[0].confidence, 0.9);
        // Missing confidence gets the JSON default
        assert_eq!(candidates[1].confidence, 0.8);
        assert_eq!(candidates[1].start_time, 195.5);
    }

    #[test]
    fn test_json_requires_numeric_start_time() {
        let text = r#"{"chapters": [{"start_time": "03:15", "title": "Getting Started"}]}"#;
        assert!(parse_json_chapters(text).is_empty());
    }

    #[test]
    fn test_json_skips_invalid_items() {
        let text = r#"{"chapters": [
  {"start_time": -5, "title": "Negative start"},
  {"start_time": 10, "title": "   "},
  {"start_time": 20, "title": "Valid chapter"}
]}"#;
        let candidates = parse_json_chapters(text);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].title, "Valid chapter");
    }

    #[test]
    fn test_json_accepts_short_titles() {
        // The minimum-length rule is a line-parser heuristic only
        let text = r#"{"chapters": [{"start_time": 10, "title": "Q&A"}]}"#;
        let candidates = parse_json_chapters(text);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].title, "Q&A");
    }

    #[test]
    fn test_line_fallback() {
        let text = "Chapter 1: 00:00 - Welcome and Overview\n\
                    03:15 Getting Started\n\
                    not a chapter line\n\
                    [1:02:03] Closing Thoughts";

        let candidates = parse_line_chapters(text);
        assert_eq!(candidates.len(), 3);
        assert_eq!(candidates[0].title, "Welcome and Overview");
        assert_eq!(candidates[0].start_time, 0.0);
        assert_eq!(candidates[1].start_time, 195.0);
        assert_eq!(candidates[2].start_time, 3723.0);
        assert!(candidates.iter().all(|c| c.confidence == 0.7));
    }

    #[test]
    fn test_line_fallback_rejects_short_titles() {
        let candidates = parse_line_chapters("00:30 - ok");
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_json_preferred_over_lines() {
        let text = r#"00:00 - Line Format Chapter
{"chapters": [{"start_time": 0, "title": "JSON Chapter"}]}"#;
        let candidates = parse_model_output(text);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].title, "JSON Chapter");
    }

    #[test]
    fn test_falls_back_when_json_absent() {
        let candidates = parse_model_output("05:00 - Only Line Chapters Here");
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].confidence, 0.7);
    }

    #[test]
    fn test_empty_output() {
        assert!(parse_model_output("").is_empty());
        assert!(parse_model_output("The transcript was too short.").is_empty());
    }
}
