//! Loaded document and loader state types

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use image::RgbaImage;

use super::classify::DocumentKind;
use super::paged::PagedDocument;

/// Unique identifier for render requests
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RequestId(pub u64);

impl RequestId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

/// Cooperative cancellation flag shared between a task and its owner
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A successfully opened document
#[derive(Clone)]
pub enum LoadedDocument {
    Paged {
        handle: Arc<dyn PagedDocument>,
        /// Always at least 1
        page_count: usize,
    },
    Image {
        resource: Arc<RgbaImage>,
        width: u32,
        height: u32,
    },
}

impl LoadedDocument {
    pub fn image(resource: RgbaImage) -> Self {
        let (width, height) = resource.dimensions();
        Self::Image {
            resource: Arc::new(resource),
            width,
            height,
        }
    }

    pub fn kind(&self) -> DocumentKind {
        match self {
            Self::Paged { .. } => DocumentKind::Paged,
            Self::Image { .. } => DocumentKind::Image,
        }
    }

    /// Images count as a single page
    pub fn page_count(&self) -> usize {
        match self {
            Self::Paged { page_count, .. } => *page_count,
            Self::Image { .. } => 1,
        }
    }
}

impl fmt::Debug for LoadedDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Paged { page_count, .. } => f
                .debug_struct("Paged")
                .field("page_count", page_count)
                .finish_non_exhaustive(),
            Self::Image { width, height, .. } => f
                .debug_struct("Image")
                .field("width", width)
                .field("height", height)
                .finish_non_exhaustive(),
        }
    }
}

/// Per-viewer load state.
///
/// Either `loading` is set, or the state is terminal: `document` XOR `error`,
/// or neither when the reference is empty.
#[derive(Clone, Debug, Default)]
pub struct LoadState {
    pub document: Option<LoadedDocument>,
    pub title: Option<String>,
    pub loading: bool,
    pub error: Option<String>,
}

impl LoadState {
    pub fn loading() -> Self {
        Self {
            loading: true,
            ..Self::default()
        }
    }

    pub fn loaded(document: LoadedDocument, title: Option<String>) -> Self {
        Self {
            document: Some(document),
            title,
            loading: false,
            error: None,
        }
    }

    pub fn failed(error: String) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn is_idle(&self) -> bool {
        !self.loading && self.document.is_none() && self.error.is_none()
    }
}
