//! # Result Formatting
//!
//! Serializes a (possibly timing-corrected) transcription result into one
//! of five output formats. Renderers are pure functions of
//! (result, options) and share no state.
//!
//! Unknown format tags are not an error: they collapse to plain text at
//! the parsing boundary, so the dispatch below is exhaustive over a closed
//! enum with no failure arm for bad tags.

use crate::config::SubtitleConfig;
use crate::error::AsrResult;
use crate::transcription::types::{Segment, TranscriptionOutput};
use std::fmt::Write;

/// Closed enumeration of supported output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Srt,
    Vtt,
    Tsv,
    Json,
}

impl OutputFormat {
    /// Parse a format tag. Anything outside the closed set falls back to
    /// plain text rather than failing.
    pub fn from_tag(tag: &str) -> Self {
        match tag.to_lowercase().as_str() {
            "srt" => OutputFormat::Srt,
            "vtt" => OutputFormat::Vtt,
            "tsv" => OutputFormat::Tsv,
            "json" => OutputFormat::Json,
            _ => OutputFormat::Text,
        }
    }

    /// File extension for attachment naming.
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Text => "txt",
            OutputFormat::Srt => "srt",
            OutputFormat::Vtt => "vtt",
            OutputFormat::Tsv => "tsv",
            OutputFormat::Json => "json",
        }
    }

    /// Media type for HTTP content-type selection.
    pub fn media_type(&self) -> &'static str {
        match self {
            OutputFormat::Text => "text/plain",
            OutputFormat::Srt => "text/plain",
            OutputFormat::Vtt => "text/vtt",
            OutputFormat::Tsv => "text/tab-separated-values",
            OutputFormat::Json => "application/json",
        }
    }
}

/// Render the result into the requested format.
pub fn render(
    result: &TranscriptionOutput,
    format: OutputFormat,
    options: &SubtitleConfig,
) -> AsrResult<Vec<u8>> {
    let bytes = match format {
        OutputFormat::Text => write_text(result).into_bytes(),
        OutputFormat::Srt => write_srt(result, options).into_bytes(),
        OutputFormat::Vtt => write_vtt(result, options).into_bytes(),
        OutputFormat::Tsv => write_tsv(result).into_bytes(),
        OutputFormat::Json => serde_json::to_vec(result)?,
    };
    Ok(bytes)
}

fn write_text(result: &TranscriptionOutput) -> String {
    let mut out = String::new();
    for segment in &result.segments {
        let _ = writeln!(out, "{}", segment.text.trim());
    }
    out
}

fn write_srt(result: &TranscriptionOutput, options: &SubtitleConfig) -> String {
    let mut out = String::new();
    let mut index = 1usize;

    for segment in &result.segments {
        for (start, end, text) in cues_for_segment(segment, options) {
            let _ = writeln!(out, "{}", index);
            let _ = writeln!(
                out,
                "{} --> {}",
                format_timestamp(start, ','),
                format_timestamp(end, ',')
            );
            for line in wrap_lines(&text, options) {
                let _ = writeln!(out, "{}", line);
            }
            out.push('\n');
            index += 1;
        }
    }
    out
}

fn write_vtt(result: &TranscriptionOutput, options: &SubtitleConfig) -> String {
    let mut out = String::from("WEBVTT\n\n");

    for segment in &result.segments {
        for (start, end, text) in cues_for_segment(segment, options) {
            let _ = writeln!(
                out,
                "{} --> {}",
                format_timestamp(start, '.'),
                format_timestamp(end, '.')
            );
            for line in wrap_lines(&text, options) {
                let _ = writeln!(out, "{}", line);
            }
            out.push('\n');
        }
    }
    out
}

fn write_tsv(result: &TranscriptionOutput) -> String {
    let mut out = String::from("start\tend\ttext\n");
    for segment in &result.segments {
        let _ = writeln!(
            out,
            "{}\t{}\t{}",
            (segment.start * 1000.0).round() as i64,
            (segment.end * 1000.0).round() as i64,
            segment.text.trim()
        );
    }
    out
}

/// Expand a segment into one or more cues.
///
/// Normally one cue per segment. With word highlighting enabled and word
/// timings present, one cue per word with the active word underlined.
fn cues_for_segment(segment: &Segment, options: &SubtitleConfig) -> Vec<(f64, f64, String)> {
    if options.highlight_words {
        if let Some(words) = segment.words.as_ref().filter(|w| !w.is_empty()) {
            return words
                .iter()
                .enumerate()
                .map(|(i, word)| {
                    let text = words
                        .iter()
                        .enumerate()
                        .map(|(j, w)| {
                            if i == j {
                                format!("<u>{}</u>", w.text.trim())
                            } else {
                                w.text.trim().to_string()
                            }
                        })
                        .collect::<Vec<_>>()
                        .join(" ");
                    (word.start, word.end, text)
                })
                .collect();
        }
    }
    vec![(segment.start, segment.end, segment.text.trim().to_string())]
}

/// Format seconds as `HH:MM:SS<sep>mmm`.
fn format_timestamp(seconds: f64, millis_sep: char) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let secs = (total_ms / 1000) % 60;
    let mins = (total_ms / 60_000) % 60;
    let hours = total_ms / 3_600_000;
    format!("{:02}:{:02}:{:02}{}{:03}", hours, mins, secs, millis_sep, ms)
}

/// Greedy word wrap honouring the configured width and line count.
/// Zero means unlimited for either limit.
fn wrap_lines(text: &str, options: &SubtitleConfig) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    if options.max_line_width == 0 {
        return vec![text.to_string()];
    }

    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let needed = if current.is_empty() {
            word.len()
        } else {
            current.len() + 1 + word.len()
        };
        if needed > options.max_line_width && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }

    if options.max_line_count > 0 && lines.len() > options.max_line_count {
        // Fold the overflow into the last permitted line.
        let tail = lines.split_off(options.max_line_count);
        if let Some(last) = lines.last_mut() {
            for line in tail {
                last.push(' ');
                last.push_str(&line);
            }
        }
    }
    lines
}
