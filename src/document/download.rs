//! Download orchestration
//!
//! Strategies run in order and the first success wins:
//! direct fetch, relayed fetch, re-encoding the decoded image, and finally
//! handing the reference to an external opener.

use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};
use tempfile::NamedTempFile;

use super::classify::{FileClassification, detect_type, download_basename, download_filename};
use super::error::DownloadError;
use super::fetch::{FetchRequest, Fetcher, is_cross_host, relay_url};
use super::paged::EngineConfig;
use super::surface::Surface;
use super::types::LoadedDocument;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DownloadStrategy {
    Direct,
    Relay,
    SurfaceReencode,
    OpenExternally,
}

impl fmt::Display for DownloadStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Direct => "direct",
            Self::Relay => "relay",
            Self::SurfaceReencode => "re-encode",
            Self::OpenExternally => "open externally",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DownloadOutcome {
    Saved {
        strategy: DownloadStrategy,
        path: PathBuf,
    },
    /// Handed to the system; the user saves manually
    OpenedExternally,
}

/// Save-to-file trigger
pub trait FileSaver: Send + Sync {
    fn save(&self, filename: &str, bytes: &[u8]) -> io::Result<PathBuf>;
}

/// "Open in a new browsing context" trigger
pub trait ExternalOpener: Send + Sync {
    fn open(&self, reference: &str) -> io::Result<()>;
}

/// Writes into a directory via a temp file that is atomically renamed into place
#[derive(Clone, Debug)]
pub struct DirectorySaver {
    dir: PathBuf,
}

impl DirectorySaver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl FileSaver for DirectorySaver {
    fn save(&self, filename: &str, bytes: &[u8]) -> io::Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let mut file = NamedTempFile::new_in(&self.dir)?;
        file.write_all(bytes)?;
        let target = self.dir.join(filename);
        file.persist(&target).map_err(|e| e.error)?;
        Ok(target)
    }
}

/// Opens references with the platform handler (browser, viewer)
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemOpener;

impl ExternalOpener for SystemOpener {
    fn open(&self, reference: &str) -> io::Result<()> {
        open::that(reference)
    }
}

pub struct DownloadOrchestrator {
    fetcher: Arc<dyn Fetcher>,
    saver: Arc<dyn FileSaver>,
    opener: Arc<dyn ExternalOpener>,
    config: EngineConfig,
}

impl DownloadOrchestrator {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        saver: Arc<dyn FileSaver>,
        opener: Arc<dyn ExternalOpener>,
        config: EngineConfig,
    ) -> Self {
        Self {
            fetcher,
            saver,
            opener,
            config,
        }
    }

    /// Save `reference` to disk, or open it externally when nothing else works.
    ///
    /// Fails only when `reference` is empty.
    pub async fn download(
        &self,
        reference: &str,
        document: Option<&LoadedDocument>,
        relay_override: Option<&str>,
    ) -> Result<DownloadOutcome, DownloadError> {
        if reference.is_empty() {
            return Err(DownloadError::NoReference);
        }

        let classification = detect_type(reference);
        let filename = download_filename(reference, &classification);

        if let Some(path) = self.direct(reference, &classification, &filename).await {
            return Ok(saved(DownloadStrategy::Direct, path));
        }

        if is_cross_host(reference, self.config.origin_host.as_deref()) {
            if let Some(path) = self.relayed(reference, relay_override, &filename).await {
                return Ok(saved(DownloadStrategy::Relay, path));
            }
        }

        if let Some(LoadedDocument::Image {
            resource,
            width,
            height,
        }) = document
        {
            let mut surface = Surface::new();
            surface.resize(*width, *height);
            surface.draw_image(resource, *width, *height);
            if let Some(path) = self.reencoded(reference, &surface, &classification) {
                return Ok(saved(DownloadStrategy::SurfaceReencode, path));
            }
        }

        info!("Opening {reference} externally");
        if let Err(e) = self.opener.open(reference) {
            warn!("External open of {reference} failed: {e}");
        }
        Ok(DownloadOutcome::OpenedExternally)
    }

    async fn direct(
        &self,
        reference: &str,
        classification: &FileClassification,
        filename: &str,
    ) -> Option<PathBuf> {
        let request = FetchRequest::get(reference).header("Accept", classification.accept_header());
        self.fetch_and_save(request, filename, DownloadStrategy::Direct)
            .await
    }

    async fn relayed(
        &self,
        reference: &str,
        relay_override: Option<&str>,
        filename: &str,
    ) -> Option<PathBuf> {
        let relay = self.config.relay_for(relay_override);
        let request = FetchRequest::get(relay_url(relay, reference))
            .header("X-Requested-With", "XMLHttpRequest");
        self.fetch_and_save(request, filename, DownloadStrategy::Relay)
            .await
    }

    async fn fetch_and_save(
        &self,
        request: FetchRequest,
        filename: &str,
        strategy: DownloadStrategy,
    ) -> Option<PathBuf> {
        let url = request.url.clone();
        let response = match self.fetcher.fetch(request).await {
            Ok(response) => match response.error_for_status(&url) {
                Ok(response) => response,
                Err(e) => {
                    debug!("{strategy} download failed: {e}");
                    return None;
                }
            },
            Err(e) => {
                debug!("{strategy} download failed: {e}");
                return None;
            }
        };
        self.save(filename, &response.body, strategy)
    }

    fn reencoded(
        &self,
        reference: &str,
        surface: &Surface,
        classification: &FileClassification,
    ) -> Option<PathBuf> {
        let blob = match surface.export(&classification.media_type()) {
            Ok(blob) => blob,
            Err(e) => {
                debug!("Re-encode of {reference} failed: {e}");
                return None;
            }
        };
        let filename = if blob.media_type == classification.media_type() {
            download_filename(reference, classification)
        } else {
            format!("{}.{}", download_basename(reference), blob.extension())
        };
        self.save(&filename, &blob.bytes, DownloadStrategy::SurfaceReencode)
    }

    fn save(&self, filename: &str, bytes: &[u8], strategy: DownloadStrategy) -> Option<PathBuf> {
        match self.saver.save(filename, bytes) {
            Ok(path) => {
                info!("Saved {} bytes to {} ({strategy})", bytes.len(), path.display());
                Some(path)
            }
            Err(e) => {
                warn!("Saving {filename} failed ({strategy}): {e}");
                None
            }
        }
    }
}

fn saved(strategy: DownloadStrategy, path: PathBuf) -> DownloadOutcome {
    DownloadOutcome::Saved { strategy, path }
}
