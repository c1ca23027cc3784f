//! # Language-Specific Timing Correction
//!
//! Adjusts raw segment and word timestamps for languages whose subtitle
//! sync benefits from a fixed offset, and pushes near-touching segments
//! apart so downstream subtitle rendering never shows overlapping cues.
//!
//! Single deterministic forward pass, O(segments + words). Raw inference
//! output does not guarantee monotonic timing; after this pass it does:
//! within a segment `start <= end`, and adjacent segments never overlap.

use crate::config::CorrectionConfig;
use crate::transcription::types::TranscriptionOutput;

/// Fixed gap inserted between segments that would otherwise near-touch.
const FORCED_GAP_SECS: f64 = 0.1;

/// Whether the correction applies to this result.
///
/// Requires the feature to be enabled in configuration and the result's
/// detected language to equal the configured target language.
pub fn applies(config: &CorrectionConfig, result: &TranscriptionOutput) -> bool {
    config.enabled
        && result
            .language
            .as_deref()
            .map(|lang| lang == config.language)
            .unwrap_or(false)
}

/// Apply the timing correction in place.
///
/// 1. Shift every segment (and word, when present) by the configured
///    offset; start times are floored at zero, ends re-floored to starts.
/// 2. Walk segments in order; a segment starting closer than the
///    configured threshold to its predecessor's end is pushed to
///    `prev_end + 0.1s`.
pub fn apply(result: &mut TranscriptionOutput, config: &CorrectionConfig) {
    if result.segments.is_empty() {
        return;
    }

    let offset_sec = config.offset_ms as f64 / 1000.0;
    let threshold_sec = config.min_gap_ms as f64 / 1000.0;

    for segment in &mut result.segments {
        segment.start = (segment.start + offset_sec).max(0.0);
        segment.end = (segment.end + offset_sec).max(segment.start);

        if let Some(words) = &mut segment.words {
            for word in words {
                word.start = (word.start + offset_sec).max(0.0);
                word.end = (word.end + offset_sec).max(word.start);
            }
        }
    }

    let mut prev_end = result.segments[0].end;
    for segment in result.segments.iter_mut().skip(1) {
        if segment.start - prev_end < threshold_sec {
            segment.start = prev_end + FORCED_GAP_SECS;
            segment.end = segment.end.max(segment.start);
        }
        prev_end = segment.end;
    }
}
