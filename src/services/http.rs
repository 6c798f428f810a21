use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use super::{
    youtube, FetchedTranscript, LocalBoxFuture, QuestionAnswerer, ServiceError, Summarizer,
    TranscriptSource,
};
use crate::transcript::TranscriptSegment;

pub const DEFAULT_BASE_URL: &str = "http://localhost:3000/api";

/// Client for the transcription API: transcript fetch, summary, and
/// question answering.
#[derive(Clone)]
pub struct HttpClient {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct SummaryResponse {
    summary: String,
}

#[derive(Debug, Deserialize)]
struct AnswerResponse {
    answer: String,
}

impl HttpClient {
    pub fn new(base_url: Option<String>, api_key: Option<String>) -> Self {
        let base_url = base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        Self {
            base_url,
            api_key,
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn post<T: DeserializeOwned + 'static>(
        &self,
        path: &str,
        body: serde_json::Value,
        on_transport: fn(String) -> ServiceError,
    ) -> LocalBoxFuture<'static, Result<T, ServiceError>> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(ref key) = self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }
        Box::pin(async move {
            debug!("POST {}", url);
            let resp = request
                .send()
                .await
                .map_err(|e| on_transport(format!("request to {url} failed: {e}")))?;

            let status = resp.status();
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                return Err(ServiceError::Service(format!("{url} returned {status}: {text}")));
            }

            resp.json::<T>()
                .await
                .map_err(|e| ServiceError::Service(format!("unexpected response from {url}: {e}")))
        })
    }
}

impl TranscriptSource for HttpClient {
    fn name(&self) -> &str {
        "http"
    }

    fn fetch_transcript(
        &self,
        video_url: &str,
    ) -> LocalBoxFuture<'static, Result<FetchedTranscript, ServiceError>> {
        if let Err(e) = youtube::extract_video_id(video_url) {
            return Box::pin(async move { Err(e) });
        }
        self.post(
            "/transcriptions",
            serde_json::json!({ "url": video_url }),
            ServiceError::Fetch,
        )
    }
}

impl Summarizer for HttpClient {
    fn summarize(
        &self,
        segments: &[TranscriptSegment],
    ) -> LocalBoxFuture<'static, Result<String, ServiceError>> {
        let fut = self.post::<SummaryResponse>(
            "/transcriptions/summary",
            serde_json::json!({ "transcript": wire_segments(segments) }),
            ServiceError::Service,
        );
        Box::pin(async move { fut.await.map(|r| r.summary) })
    }
}

impl QuestionAnswerer for HttpClient {
    fn answer(
        &self,
        question: &str,
        segments: &[TranscriptSegment],
    ) -> LocalBoxFuture<'static, Result<String, ServiceError>> {
        let fut = self.post::<AnswerResponse>(
            "/transcriptions/question",
            serde_json::json!({
                "question": question,
                "transcript": wire_segments(segments),
            }),
            ServiceError::Service,
        );
        Box::pin(async move { fut.await.map(|r| r.answer) })
    }
}

/// Segments in the service's `{text, offset, duration}` shape.
fn wire_segments(segments: &[TranscriptSegment]) -> serde_json::Value {
    serde_json::Value::Array(
        segments
            .iter()
            .map(|s| {
                serde_json::json!({
                    "text": s.text,
                    "offset": s.offset_seconds,
                    "duration": s.duration_seconds,
                })
            })
            .collect(),
    )
}
