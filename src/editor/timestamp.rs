use serde::{Deserialize, Serialize};

/// Attribute carried by a timestamp citation in a note.
///
/// Rendering is derived from `time_seconds` alone; no player or transcript
/// state is consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimestampMark {
    pub time_seconds: u32,
}

impl TimestampMark {
    pub fn new(time_seconds: u32) -> Self {
        Self { time_seconds }
    }

    /// Bracketed label inserted as the marked text, e.g. `[2:05]`.
    pub fn label(&self) -> String {
        format!("[{}]", format_time(self.time_seconds))
    }

    /// Value of the `data-time` attribute.
    pub fn attr_value(&self) -> String {
        self.time_seconds.to_string()
    }
}

/// Format whole seconds as `m:ss`. Minutes are unbounded (`3661 -> "61:01"`).
pub fn format_time(seconds: u32) -> String {
    let m = seconds / 60;
    let s = seconds % 60;
    format!("{m}:{s:02}")
}

/// Floor a fractional playback time and format it. Negative and non-finite
/// inputs clamp to zero.
pub fn format_time_f64(seconds: f64) -> String {
    format_time(floor_seconds(seconds))
}

/// Floor a playback time to whole seconds for use as a mark attribute.
pub fn floor_seconds(seconds: f64) -> u32 {
    if !seconds.is_finite() || seconds <= 0.0 {
        return 0;
    }
    if seconds >= u32::MAX as f64 {
        return u32::MAX;
    }
    seconds.floor() as u32
}

/// Parse a `data-time` attribute. Anything but a plain non-negative decimal
/// integer (surrounding whitespace allowed) is rejected.
pub fn parse_time_attr(raw: &str) -> Option<u32> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    trimmed.parse().ok()
}
