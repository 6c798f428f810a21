use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use super::{youtube, FetchedTranscript, LocalBoxFuture, ServiceError, TranscriptSource};
use crate::transcript::TranscriptSegment;

/// Transcript cached on disk (JSON or YAML), for offline use.
///
/// Accepts the service's `{videoId, transcript}` object or a bare list of
/// segments. Segment times may be given as `offset`/`duration`,
/// `offsetSeconds`/`durationSeconds`, or `start`/`end`.
pub struct FileTranscriptSource {
    path: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FileTranscript {
    Wrapped {
        #[serde(rename = "videoId")]
        video_id: Option<String>,
        transcript: Vec<FileSegment>,
    },
    Bare(Vec<FileSegment>),
}

#[derive(Debug, Deserialize)]
struct FileSegment {
    text: Option<String>,
    #[serde(alias = "offsetSeconds", alias = "start", alias = "start_time")]
    offset: Option<f64>,
    #[serde(alias = "durationSeconds")]
    duration: Option<f64>,
    #[serde(alias = "end_time")]
    end: Option<f64>,
}

impl FileSegment {
    fn into_segment(self) -> TranscriptSegment {
        let offset = self.offset.unwrap_or(0.0);
        let duration = self
            .duration
            .or_else(|| self.end.map(|end| (end - offset).max(0.0)))
            .unwrap_or(0.0);
        TranscriptSegment::new(self.text.unwrap_or_default(), offset, duration)
    }
}

impl FileTranscriptSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn is_yaml(&self) -> bool {
        matches!(
            self.path.extension().and_then(|e| e.to_str()),
            Some("yaml" | "yml")
        )
    }

    /// Read and parse the file. `video_url` supplies the video ID when the
    /// file does not carry one.
    pub fn load(&self, video_url: &str) -> Result<FetchedTranscript, ServiceError> {
        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| ServiceError::Fetch(format!("{}: {e}", self.path.display())))?;
        let parsed: FileTranscript = if self.is_yaml() {
            serde_yaml::from_str(&content)
                .map_err(|e| ServiceError::Fetch(format!("{}: {e}", self.path.display())))?
        } else {
            serde_json::from_str(&content)
                .map_err(|e| ServiceError::Fetch(format!("{}: {e}", self.path.display())))?
        };
        let (video_id, segments) = match parsed {
            FileTranscript::Wrapped {
                video_id,
                transcript,
            } => (video_id, transcript),
            FileTranscript::Bare(segments) => (None, segments),
        };
        let video_id = match video_id {
            Some(id) => id,
            None => youtube::extract_video_id(video_url)?,
        };
        debug!("Read {} segments from {}", segments.len(), self.path.display());
        Ok(FetchedTranscript {
            video_id,
            segments: segments.into_iter().map(FileSegment::into_segment).collect(),
        })
    }

    /// Write a fetched transcript in the wrapped service shape.
    pub fn save(&self, transcript: &FetchedTranscript) -> Result<(), ServiceError> {
        let content = if self.is_yaml() {
            serde_yaml::to_string(transcript).map_err(|e| ServiceError::Service(e.to_string()))?
        } else {
            serde_json::to_string_pretty(transcript)
                .map_err(|e| ServiceError::Service(e.to_string()))?
        };
        std::fs::write(&self.path, content)
            .map_err(|e| ServiceError::Service(format!("{}: {e}", self.path.display())))
    }
}

impl TranscriptSource for FileTranscriptSource {
    fn name(&self) -> &str {
        "file"
    }

    fn fetch_transcript(
        &self,
        video_url: &str,
    ) -> LocalBoxFuture<'static, Result<FetchedTranscript, ServiceError>> {
        let result = self.load(video_url);
        Box::pin(async move { result })
    }
}
