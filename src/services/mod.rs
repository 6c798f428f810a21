pub mod file;
pub mod http;
pub mod youtube;

use serde::{Deserialize, Serialize};

use crate::transcript::TranscriptSegment;

/// Service futures need not be `Send`; everything runs on one thread.
pub use futures_util::future::LocalBoxFuture;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("invalid video URL: {0}")]
    InvalidUrl(String),
    #[error("failed to fetch transcript: {0}")]
    Fetch(String),
    #[error("service error: {0}")]
    Service(String),
}

/// Transcript as returned by the transcription endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchedTranscript {
    #[serde(rename = "videoId")]
    pub video_id: String,
    #[serde(rename = "transcript")]
    pub segments: Vec<TranscriptSegment>,
}

pub trait TranscriptSource {
    fn name(&self) -> &str;

    fn fetch_transcript(
        &self,
        video_url: &str,
    ) -> LocalBoxFuture<'static, Result<FetchedTranscript, ServiceError>>;
}

pub trait Summarizer {
    /// Markdown summary of the transcript.
    fn summarize(
        &self,
        segments: &[TranscriptSegment],
    ) -> LocalBoxFuture<'static, Result<String, ServiceError>>;
}

pub trait QuestionAnswerer {
    /// Markdown answer grounded in the transcript.
    fn answer(
        &self,
        question: &str,
        segments: &[TranscriptSegment],
    ) -> LocalBoxFuture<'static, Result<String, ServiceError>>;
}
