use std::sync::OnceLock;

use regex::Regex;

use super::ServiceError;

fn url_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?:youtube(?:-nocookie)?\.com/(?:watch\?(?:[^#]*&)?v=|embed/|shorts/|live/|v/)|youtu\.be/)([A-Za-z0-9_-]{11})",
        )
        .expect("valid video URL regex")
    })
}

fn id_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").expect("valid video id regex"))
}

/// Extract the 11-character video ID from a watch, short, embed, live or
/// `youtu.be` URL, or accept a bare ID.
pub fn extract_video_id(input: &str) -> Result<String, ServiceError> {
    let input = input.trim();
    if id_pattern().is_match(input) {
        return Ok(input.to_string());
    }
    url_pattern()
        .captures(input)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| ServiceError::InvalidUrl(input.to_string()))
}

pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={video_id}")
}
