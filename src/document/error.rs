//! Error types for the load, render and download pipeline

use super::fetch::FetchError;

/// Errors from a paged-document engine
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[cfg(feature = "pdf")]
    #[error("PDF engine: {0}")]
    Pdf(#[from] mupdf::error::Error),

    #[error("InvalidPDFException: {0}")]
    Invalid(String),

    #[error("Page {page} is out of range (document has {count} pages)")]
    PageOutOfRange { page: usize, count: usize },

    #[error("Rendering cancelled")]
    Cancelled,

    #[error("{detail}")]
    Generic { detail: String },
}

impl EngineError {
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic { detail: msg.into() }
    }
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            Self::Cancelled
        } else {
            Self::generic(format!("engine task failed: {err}"))
        }
    }
}

/// Failure while resolving a reference into a loaded document
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("CORS relay {relay} could not deliver {reference}")]
    CrossOrigin { reference: String, relay: String },

    #[error("InvalidPDFException: {0}")]
    InvalidDocument(String),

    #[error("Failed to load image: Could not load image from URL")]
    ImageLoad,

    #[error(transparent)]
    Engine(EngineError),
}

impl LoadError {
    /// Failures raised while opening bytes mean the payload is not a usable document
    pub fn from_open(err: EngineError) -> Self {
        match err {
            EngineError::Invalid(detail) => Self::InvalidDocument(detail),
            #[cfg(feature = "pdf")]
            EngineError::Pdf(e) => Self::InvalidDocument(e.to_string()),
            other => Self::Engine(other),
        }
    }

    pub fn kind(&self) -> LoadErrorKind {
        LoadErrorKind::classify(&self.to_string())
    }

    /// Text stored in the loader state for display
    pub fn user_message(&self) -> String {
        let detail = self.to_string();
        let detail = if detail.is_empty() {
            "Unknown error".to_string()
        } else {
            detail
        };
        format!("Error: {}: {detail}", self.kind().description())
    }
}

/// User-facing load failure categories
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadErrorKind {
    FetchFailed,
    CorsBlocked,
    InvalidDocument,
    Unknown,
}

impl LoadErrorKind {
    /// Categorize a failure by its message text
    pub fn classify(message: &str) -> Self {
        if message.contains("fetch") {
            Self::FetchFailed
        } else if message.contains("CORS") {
            Self::CorsBlocked
        } else if message.contains("InvalidPDFException") {
            Self::InvalidDocument
        } else {
            Self::Unknown
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::FetchFailed => "Failed to fetch document - check URL or try a different document",
            Self::CorsBlocked => "CORS error - server does not allow cross-origin requests",
            Self::InvalidDocument => "Invalid PDF file or corrupted document",
            Self::Unknown => "Failed to load document",
        }
    }
}

/// Renderer failures; cancellation is never surfaced to the error sink
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Rendering cancelled")]
    Cancelled,

    #[error("Error rendering: {0}")]
    Paint(String),
}

impl RenderError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<EngineError> for RenderError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Cancelled => Self::Cancelled,
            other => Self::Paint(other.to_string()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("No URL provided")]
    NoReference,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_failures_are_categorized_first() {
        let err = LoadError::Fetch(FetchError::Status {
            url: "https://example.com/a.pdf".into(),
            status: 404,
        });
        assert_eq!(err.kind(), LoadErrorKind::FetchFailed);
        assert_eq!(
            err.user_message(),
            "Error: Failed to fetch document - check URL or try a different document: \
             Failed to fetch https://example.com/a.pdf: HTTP 404"
        );
    }

    #[test]
    fn cors_and_invalid_categories() {
        let cors = LoadError::CrossOrigin {
            reference: "https://other.host/a.pdf".into(),
            relay: "https://relay.local".into(),
        };
        assert_eq!(cors.kind(), LoadErrorKind::CorsBlocked);

        let invalid = LoadError::from_open(EngineError::Invalid("no header".into()));
        assert_eq!(invalid.kind(), LoadErrorKind::InvalidDocument);
        assert!(
            invalid
                .user_message()
                .starts_with("Error: Invalid PDF file or corrupted document: ")
        );
    }

    #[test]
    fn image_failures_pass_through_as_unknown() {
        let err = LoadError::ImageLoad;
        assert_eq!(err.kind(), LoadErrorKind::Unknown);
        assert_eq!(
            err.user_message(),
            "Error: Failed to load document: Failed to load image: Could not load image from URL"
        );
    }

    #[test]
    fn engine_cancellation_maps_to_render_cancel() {
        assert!(RenderError::from(EngineError::Cancelled).is_cancelled());
        let paint = RenderError::from(EngineError::generic("bad xref"));
        assert_eq!(paint.to_string(), "Error rendering: bad xref");
    }
}
