//! MuPDF-backed paged engine
//!
//! MuPDF documents are not `Send`, so the fetched bytes are kept in an `Arc`
//! and every operation reopens them on a blocking thread.

use std::sync::Arc;

use async_trait::async_trait;
use image::RgbaImage;
use log::{debug, warn};
use mupdf::{Colorspace, Document, Matrix, MetadataName, Pixmap};

use super::error::EngineError;
use super::paged::{OpenRequest, PagedDocument, PagedEngine};
use super::types::CancelToken;

const PDF_MAGIC: &str = "application/pdf";

#[derive(Clone, Copy, Debug, Default)]
pub struct MupdfEngine;

impl MupdfEngine {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PagedEngine for MupdfEngine {
    async fn open(
        &self,
        bytes: Vec<u8>,
        request: &OpenRequest,
    ) -> Result<Arc<dyn PagedDocument>, EngineError> {
        // MuPDF ships its own CMaps and base-14 fonts; the asset URLs only matter to remote engines
        debug!(
            "Opening {} with MuPDF (cmaps {}, fonts {})",
            request.source, request.cmap_url, request.standard_font_url
        );

        let bytes: Arc<[u8]> = bytes.into();
        let probe = Arc::clone(&bytes);
        let (page_count, title) = tokio::task::spawn_blocking(move || {
            let doc = Document::from_bytes(&probe, PDF_MAGIC)?;
            let page_count = usize::try_from(doc.page_count()?).unwrap_or(0);
            let title = match doc.metadata(MetadataName::Title) {
                Ok(title) => Some(title),
                Err(e) => {
                    warn!("Failed to read PDF metadata: {e}");
                    None
                }
            };
            Ok::<_, EngineError>((page_count, title))
        })
        .await??;

        Ok(Arc::new(MupdfDocument {
            bytes,
            page_count,
            title,
        }))
    }
}

pub struct MupdfDocument {
    bytes: Arc<[u8]>,
    page_count: usize,
    title: Option<String>,
}

impl MupdfDocument {
    fn page_index(&self, page: usize) -> Result<i32, EngineError> {
        if page == 0 || page > self.page_count {
            return Err(EngineError::PageOutOfRange {
                page,
                count: self.page_count,
            });
        }
        i32::try_from(page - 1).map_err(|_| EngineError::generic("page index overflow"))
    }
}

#[async_trait]
impl PagedDocument for MupdfDocument {
    fn page_count(&self) -> usize {
        self.page_count
    }

    async fn title(&self) -> Result<Option<String>, EngineError> {
        Ok(self.title.clone())
    }

    async fn page_size(&self, page: usize) -> Result<(f32, f32), EngineError> {
        let index = self.page_index(page)?;
        let bytes = Arc::clone(&self.bytes);
        tokio::task::spawn_blocking(move || {
            let doc = Document::from_bytes(&bytes, PDF_MAGIC)?;
            let bounds = doc.load_page(index)?.bounds()?;
            Ok::<_, EngineError>((bounds.x1 - bounds.x0, bounds.y1 - bounds.y0))
        })
        .await?
    }

    async fn render_page(
        &self,
        page: usize,
        scale: f32,
        cancel: CancelToken,
    ) -> Result<RgbaImage, EngineError> {
        let index = self.page_index(page)?;
        let bytes = Arc::clone(&self.bytes);
        tokio::task::spawn_blocking(move || {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let doc = Document::from_bytes(&bytes, PDF_MAGIC)?;
            let page = doc.load_page(index)?;
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            let rgb = Colorspace::device_rgb();
            let pixmap = page.to_pixmap(&Matrix::new_scale(scale, scale), &rgb, false, false)?;
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            let pixels = pixmap_to_rgba(&pixmap)?;
            RgbaImage::from_raw(pixmap.width(), pixmap.height(), pixels)
                .ok_or_else(|| EngineError::generic("Pixmap buffer size mismatch"))
        })
        .await?
    }
}

/// Repack a MuPDF pixmap (RGB or RGBA, padded rows) into tight RGBA
fn pixmap_to_rgba(pixmap: &Pixmap) -> Result<Vec<u8>, EngineError> {
    let n = pixmap.n() as usize;
    if n < 3 {
        return Err(EngineError::generic(format!(
            "Unsupported pixmap format: {n} channels"
        )));
    }

    let width = pixmap.width() as usize;
    let height = pixmap.height() as usize;
    let stride = pixmap.stride() as usize;
    let samples = pixmap.samples();
    let row_bytes = width * n;
    if samples.len() < stride.saturating_mul(height) || row_bytes > stride {
        return Err(EngineError::generic("Pixmap buffer size mismatch"));
    }

    let mut out = Vec::with_capacity(width * height * 4);
    for row in samples.chunks(stride).take(height) {
        for px in row[..row_bytes].chunks_exact(n) {
            let alpha = if n >= 4 { px[3] } else { u8::MAX };
            out.extend_from_slice(&[px[0], px[1], px[2], alpha]);
        }
    }

    Ok(out)
}
