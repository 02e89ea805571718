//! Locally-computed fallback summary for when the summarization collaborator
//! is unavailable.

use super::TranscriptSegment;

const MAX_LEAD_SENTENCES: usize = 3;

/// Build a heuristic summary: lead sentences of the transcript plus speaker
/// and duration facts from the diarized segments.
pub fn fallback_summary(transcript: &str, segments: &[TranscriptSegment]) -> String {
    let lead = lead_sentences(transcript, MAX_LEAD_SENTENCES);

    let mut speakers: Vec<&str> = segments
        .iter()
        .filter_map(|s| s.speaker.as_deref())
        .collect();
    speakers.sort_unstable();
    speakers.dedup();

    let duration_seconds = segments
        .iter()
        .map(|s| s.end)
        .fold(0.0_f64, f64::max)
        .round() as u64;

    let mut summary = String::new();
    if !lead.is_empty() {
        summary.push_str(&lead);
        summary.push('\n');
    }
    if !speakers.is_empty() {
        summary.push_str(&format!("Speakers: {}.\n", speakers.join(", ")));
    }
    if duration_seconds > 0 {
        summary.push_str(&format!(
            "Duration: {}m{}s.",
            duration_seconds / 60,
            duration_seconds % 60
        ));
    }

    if summary.is_empty() {
        "No transcript available.".to_string()
    } else {
        summary.trim_end().to_string()
    }
}

fn lead_sentences(text: &str, max: usize) -> String {
    let mut out = String::new();
    let mut count = 0;
    for chunk in text.split_inclusive(['.', '!', '?']) {
        let trimmed = chunk.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(trimmed);
        count += 1;
        if count >= max {
            break;
        }
    }
    out
}
