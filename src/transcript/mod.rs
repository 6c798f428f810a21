pub mod pane;
pub mod scroll;
pub mod search;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::editor::html::decode_entities;
use crate::editor::timestamp::format_time;

/// One timed unit of transcript text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptSegment {
    pub text: String,
    #[serde(alias = "offset")]
    pub offset_seconds: f64,
    #[serde(alias = "duration", default)]
    pub duration_seconds: f64,
}

impl TranscriptSegment {
    pub fn new(text: impl Into<String>, offset_seconds: f64, duration_seconds: f64) -> Self {
        Self {
            text: text.into(),
            offset_seconds,
            duration_seconds,
        }
    }

    pub fn end_seconds(&self) -> f64 {
        self.offset_seconds + self.duration_seconds.max(0.0)
    }

    /// Start time as shown next to the segment, rounded to the nearest second.
    pub fn label(&self) -> String {
        format_time(self.offset_seconds.max(0.0).round() as u32)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TranscriptError {
    #[error("segment {index} has an invalid offset or duration")]
    InvalidSegment { index: usize },
}

/// A validated, display-ready transcript: entities decoded, blank segments
/// dropped, offsets non-decreasing.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Transcript {
    segments: Vec<TranscriptSegment>,
}

impl Transcript {
    pub fn new(segments: Vec<TranscriptSegment>) -> Result<Self, TranscriptError> {
        for (index, seg) in segments.iter().enumerate() {
            let valid = seg.offset_seconds.is_finite()
                && seg.offset_seconds >= 0.0
                && seg.duration_seconds.is_finite()
                && seg.duration_seconds >= 0.0;
            if !valid {
                return Err(TranscriptError::InvalidSegment { index });
            }
        }
        let total = segments.len();
        let mut segments: Vec<TranscriptSegment> = segments
            .into_iter()
            .filter(|s| !s.text.trim().is_empty())
            .map(|s| TranscriptSegment {
                text: decode_entities(&s.text),
                ..s
            })
            .collect();
        segments.sort_by(|a, b| a.offset_seconds.total_cmp(&b.offset_seconds));
        debug!("Transcript loaded: {} segments ({} blank dropped)", segments.len(), total - segments.len());
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[TranscriptSegment] {
        &self.segments
    }

    pub fn get(&self, index: usize) -> Option<&TranscriptSegment> {
        self.segments.get(index)
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn active_at(&self, time_seconds: f64) -> Option<usize> {
        find_active_segment(&self.segments, time_seconds)
    }

    /// All segment text joined with spaces.
    pub fn full_text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn covers(segments: &[TranscriptSegment], index: usize, t: f64) -> bool {
    let Some(seg) = segments.get(index) else {
        return false;
    };
    if t < seg.offset_seconds {
        return false;
    }
    match segments.get(index + 1) {
        Some(next) => t < next.offset_seconds,
        None => t < seg.end_seconds(),
    }
}

/// Index of the segment playing at `t`: the last segment starting at or
/// before `t` and ending before the next one starts (the final segment ends
/// at offset + duration). `None` before the first segment, after the last
/// one, or for an empty list.
pub fn find_active_segment(segments: &[TranscriptSegment], t: f64) -> Option<usize> {
    if t.is_nan() {
        return None;
    }
    let after = segments.partition_point(|s| s.offset_seconds <= t);
    let index = after.checked_sub(1)?;
    covers(segments, index, t).then_some(index)
}

/// Remembers the last answer so steadily advancing playback is answered in
/// constant time; anything else falls back to the binary search.
#[derive(Debug, Default, Clone)]
pub struct ActiveSegmentTracker {
    last: Option<usize>,
}

impl ActiveSegmentTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<usize> {
        self.last
    }

    pub fn update(&mut self, segments: &[TranscriptSegment], t: f64) -> Option<usize> {
        let found = match self.last {
            Some(i) if covers(segments, i, t) => Some(i),
            Some(i) if covers(segments, i + 1, t) => Some(i + 1),
            _ => find_active_segment(segments, t),
        };
        self.last = found;
        found
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}
