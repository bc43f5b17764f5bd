//! Paged-document loading
//!
//! Resolves a reference into an opened [`PagedDocument`]: cross-origin
//! probe, one-shot relay fallback, fetch, engine open, title lookup.

use std::sync::Arc;

use async_trait::async_trait;
use image::RgbaImage;
use log::{debug, info, warn};

use super::classify::extract_title;
use super::error::{EngineError, LoadError};
use super::fetch::{DEFAULT_RELAY_ENDPOINT, FetchRequest, Fetcher, is_cross_host, relay_url};
use super::types::{CancelToken, LoadedDocument};

/// Base URL for engine auxiliary resources (character maps, fonts, worker)
pub const DEFAULT_ASSET_PREFIX: &str = "https://unpkg.com/pdfjs-dist@3.11.174";

const PAGED_ACCEPT: &str = "application/pdf,*/*";

/// An opened paged document. Page numbers are 1-based.
#[async_trait]
pub trait PagedDocument: Send + Sync {
    fn page_count(&self) -> usize;

    /// Embedded metadata title, if any
    async fn title(&self) -> Result<Option<String>, EngineError>;

    /// Page size in points at scale 1.0
    async fn page_size(&self, page: usize) -> Result<(f32, f32), EngineError>;

    /// Paint `page` at `scale` into an RGBA buffer
    async fn render_page(
        &self,
        page: usize,
        scale: f32,
        cancel: CancelToken,
    ) -> Result<RgbaImage, EngineError>;
}

/// Decoding engine that turns fetched bytes into a [`PagedDocument`]
#[async_trait]
pub trait PagedEngine: Send + Sync {
    async fn open(
        &self,
        bytes: Vec<u8>,
        request: &OpenRequest,
    ) -> Result<Arc<dyn PagedDocument>, EngineError>;
}

/// Engine and relay configuration threaded into the loader at construction
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    pub asset_prefix: String,
    pub relay_endpoint: Option<String>,
    /// Host the viewer is served from; remote references on other hosts are probed
    pub origin_host: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            asset_prefix: DEFAULT_ASSET_PREFIX.to_string(),
            relay_endpoint: None,
            origin_host: None,
        }
    }
}

impl EngineConfig {
    fn asset(&self, path: &str) -> String {
        format!("{}/{path}", self.asset_prefix.trim_end_matches('/'))
    }

    pub fn cmap_url(&self) -> String {
        self.asset("cmaps/")
    }

    pub fn standard_font_url(&self) -> String {
        self.asset("standard_fonts/")
    }

    pub fn worker_url(&self) -> String {
        self.asset("build/pdf.worker.min.js")
    }

    /// Relay for this request: explicit override, then configured endpoint, then the public default
    pub fn relay_for<'a>(&'a self, relay_override: Option<&'a str>) -> &'a str {
        if let Some(relay) = relay_override.or(self.relay_endpoint.as_deref()) {
            return relay;
        }
        warn!("No relay endpoint configured, using public default {DEFAULT_RELAY_ENDPOINT}");
        DEFAULT_RELAY_ENDPOINT
    }
}

/// Parameters handed to [`PagedEngine::open`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpenRequest {
    /// The reference actually fetched (possibly relayed)
    pub source: String,
    pub cmap_url: String,
    pub cmap_packed: bool,
    pub standard_font_url: String,
    pub worker_url: String,
    pub disable_stream: bool,
    pub disable_auto_fetch: bool,
    pub with_credentials: bool,
}

impl OpenRequest {
    pub fn new(source: impl Into<String>, config: &EngineConfig) -> Self {
        Self {
            source: source.into(),
            cmap_url: config.cmap_url(),
            cmap_packed: true,
            standard_font_url: config.standard_font_url(),
            worker_url: config.worker_url(),
            disable_stream: true,
            disable_auto_fetch: false,
            with_credentials: false,
        }
    }
}

pub struct PagedDocumentLoader {
    fetcher: Arc<dyn Fetcher>,
    engine: Arc<dyn PagedEngine>,
    config: EngineConfig,
}

impl PagedDocumentLoader {
    pub fn new(fetcher: Arc<dyn Fetcher>, engine: Arc<dyn PagedEngine>, config: EngineConfig) -> Self {
        Self {
            fetcher,
            engine,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Resolve `reference` into a paged document and its display title
    pub async fn load(
        &self,
        reference: &str,
        relay_override: Option<&str>,
    ) -> Result<(LoadedDocument, Option<String>), LoadError> {
        let mut source = reference.to_string();
        let mut relay = None;

        if is_cross_host(reference, self.config.origin_host.as_deref()) {
            if let Err(e) = self.fetcher.probe(reference).await {
                let endpoint = self.config.relay_for(relay_override);
                info!("Probe for {reference} failed ({e}), routing through {endpoint}");
                source = relay_url(endpoint, reference);
                relay = Some(endpoint.to_string());
            }
        }

        let request = FetchRequest::get(&source)
            .header("Accept", PAGED_ACCEPT)
            .without_credentials();
        let fetched = self
            .fetcher
            .fetch(request)
            .await
            .and_then(|response| response.error_for_status(&source));

        let response = match (fetched, relay) {
            (Ok(response), _) => response,
            (Err(e), Some(relay)) => {
                warn!("Relayed fetch of {reference} failed: {e}");
                return Err(LoadError::CrossOrigin {
                    reference: reference.to_string(),
                    relay,
                });
            }
            (Err(e), None) => return Err(e.into()),
        };

        debug!("Opening {} bytes from {source}", response.body.len());
        let handle = self
            .engine
            .open(response.body, &OpenRequest::new(&source, &self.config))
            .await
            .map_err(LoadError::from_open)?;

        let page_count = handle.page_count();
        if page_count == 0 {
            return Err(LoadError::InvalidDocument(format!(
                "{reference} has no pages"
            )));
        }

        let title = match handle.title().await {
            Ok(Some(title)) if !title.trim().is_empty() => Some(title.trim().to_string()),
            Ok(_) => extract_title(reference),
            Err(e) => {
                warn!("Could not read metadata for {reference}: {e}");
                extract_title(reference)
            }
        };

        info!("Loaded {reference}: {page_count} pages, title {title:?}");
        Ok((LoadedDocument::Paged { handle, page_count }, title))
    }
}

/// Stand-in engine for builds without PDF support
#[cfg(not(feature = "pdf"))]
pub struct DisabledEngine;

#[cfg(not(feature = "pdf"))]
#[async_trait]
impl PagedEngine for DisabledEngine {
    async fn open(
        &self,
        _bytes: Vec<u8>,
        request: &OpenRequest,
    ) -> Result<Arc<dyn PagedDocument>, EngineError> {
        Err(EngineError::Invalid(format!(
            "{}: PDF support was not compiled in",
            request.source
        )))
    }
}
