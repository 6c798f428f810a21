use crate::assistant::AssistantError;
use crate::editor::markdown::RenderError;
use crate::editor::EditorError;
use crate::notes::StoreError;
use crate::services::ServiceError;
use crate::transcript::TranscriptError;

/// Any failure surfaced by the library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error(transparent)]
    Editor(#[from] EditorError),
    #[error(transparent)]
    Assistant(#[from] AssistantError),
    #[error(transparent)]
    Transcript(#[from] TranscriptError),
    #[error(transparent)]
    Render(#[from] RenderError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Rejected before any network call; show it next to the input.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            Error::Service(ServiceError::InvalidUrl(_))
                | Error::Store(StoreError::Validation(_))
                | Error::Editor(_)
                | Error::Assistant(AssistantError::InvalidInput)
                | Error::Transcript(_)
        )
    }

    /// Network or AI service failure. Not retried; the user may try again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Service(ServiceError::Fetch(_) | ServiceError::Service(_))
                | Error::Store(StoreError::Database(_))
        )
    }

    /// Short category name for machine-readable output.
    pub fn kind(&self) -> &'static str {
        if self.is_invalid_input() {
            "invalid_input"
        } else if self.is_not_found() {
            "not_found"
        } else if self.is_transient() {
            "transient"
        } else {
            "error"
        }
    }

    /// A deleted note or folder, or a transcript that was never loaded.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::Store(StoreError::NotFound { .. }) | Error::Assistant(AssistantError::NoTranscript)
        )
    }
}
