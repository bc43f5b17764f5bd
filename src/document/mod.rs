//! Document pipeline: classify, load, render, download
//!
//! A reference flows through [`classify`] into either the image or the
//! paged loader, [`loader::DocumentLoader`] tracks the outcome per viewer,
//! [`render::Renderer`] paints the current page, and
//! [`download::DownloadOrchestrator`] saves it on demand.

pub mod classify;
pub mod download;
pub mod error;
pub mod fetch;
pub mod image_loader;
pub mod loader;
#[cfg(feature = "pdf")]
pub mod mupdf_engine;
pub mod paged;
pub mod render;
pub mod surface;
pub mod types;

pub use classify::{DocumentKind, FileClassification, detect_type, extract_title};
pub use download::{
    DirectorySaver, DownloadOrchestrator, DownloadOutcome, DownloadStrategy, ExternalOpener,
    FileSaver, SystemOpener,
};
pub use error::{DownloadError, EngineError, LoadError, LoadErrorKind, RenderError};
pub use fetch::{FetchError, FetchRequest, FetchResponse, Fetcher, ReqwestFetcher};
pub use image_loader::{FetchImageDecoder, ImageDecoder, ImageLoader};
pub use loader::{DocumentLoader, LoaderEvent};
#[cfg(feature = "pdf")]
pub use mupdf_engine::MupdfEngine;
pub use paged::{EngineConfig, OpenRequest, PagedDocument, PagedDocumentLoader, PagedEngine};
pub use render::{Renderer, SharedSurface};
pub use surface::Surface;
pub use types::{CancelToken, LoadState, LoadedDocument, RequestId};
