//! Cancellable page painting onto a shared surface
//!
//! One [`Renderer`] drives one surface. Each request cancels its predecessor
//! before starting, and every write to the surface re-checks the task's
//! cancel token under the surface lock, so the surface only ever reflects
//! the latest request.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use image::RgbaImage;
use log::{debug, warn};
use tokio::task::JoinHandle;

use super::error::RenderError;
use super::paged::PagedDocument;
use super::surface::Surface;
use super::types::{CancelToken, LoadedDocument, RequestId};

pub type SharedSurface = Arc<Mutex<Surface>>;

pub fn lock_surface(surface: &Mutex<Surface>) -> MutexGuard<'_, Surface> {
    surface.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Pixel size of `extent` at `scale`
pub fn scaled_extent(extent: f32, scale: f32) -> u32 {
    (extent * scale).round().max(0.0) as u32
}

struct RenderTask {
    id: RequestId,
    cancel: CancelToken,
    handle: JoinHandle<()>,
}

impl RenderTask {
    fn cancel(self) {
        debug!("Cancelling render {:?}", self.id);
        self.cancel.cancel();
        self.handle.abort();
    }
}

pub struct Renderer {
    surface: SharedSurface,
    current: Option<RenderTask>,
    next_id: u64,
    errors: Option<flume::Sender<RenderError>>,
}

impl Renderer {
    pub fn new(surface: SharedSurface) -> Self {
        Self {
            surface,
            current: None,
            next_id: 0,
            errors: None,
        }
    }

    /// Report non-cancellation failures to `errors`
    #[must_use]
    pub fn with_error_sink(mut self, errors: flume::Sender<RenderError>) -> Self {
        self.errors = Some(errors);
        self
    }

    pub fn surface(&self) -> SharedSurface {
        Arc::clone(&self.surface)
    }

    fn next_id(&mut self) -> RequestId {
        self.next_id += 1;
        RequestId::new(self.next_id)
    }

    /// Id of the in-flight request, if it has not finished yet
    pub fn in_flight(&self) -> Option<RequestId> {
        self.current
            .as_ref()
            .filter(|task| !task.handle.is_finished())
            .map(|task| task.id)
    }

    /// Paint `page` of `document` at `scale`, superseding any in-flight paint.
    ///
    /// Does nothing beyond cancelling when `document` is absent.
    pub fn render(
        &mut self,
        document: Option<&LoadedDocument>,
        page: usize,
        scale: f32,
    ) -> Option<RequestId> {
        self.cancel();
        let document = document?.clone();

        let id = self.next_id();
        let cancel = CancelToken::new();
        let job = PaintJob {
            id,
            document,
            page,
            scale,
            surface: Arc::clone(&self.surface),
            cancel: cancel.clone(),
            errors: self.errors.clone(),
        };
        debug!("Render {id:?}: page {page} at scale {scale}");

        let handle = tokio::spawn(job.run());
        self.current = Some(RenderTask { id, cancel, handle });
        Some(id)
    }

    /// Cancel the in-flight paint, if any
    pub fn cancel(&mut self) {
        if let Some(task) = self.current.take() {
            task.cancel();
        }
    }

    /// Detach from the surface: cancel and blank it
    pub fn clear(&mut self) {
        self.cancel();
        lock_surface(&self.surface).resize(0, 0);
    }

    /// Wait for the in-flight paint to finish. A finished task is released,
    /// so settling again without a new render returns immediately.
    pub async fn settle(&mut self) {
        if let Some(task) = self.current.take() {
            if let Err(e) = task.handle.await {
                if !e.is_cancelled() {
                    warn!("Render task {:?} ended abnormally: {e}", task.id);
                }
            }
        }
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.cancel();
    }
}

struct PaintJob {
    id: RequestId,
    document: LoadedDocument,
    page: usize,
    scale: f32,
    surface: SharedSurface,
    cancel: CancelToken,
    errors: Option<flume::Sender<RenderError>>,
}

impl PaintJob {
    async fn run(self) {
        let result = match &self.document {
            LoadedDocument::Image {
                resource,
                width,
                height,
            } => self.paint_image(Arc::clone(resource), *width, *height).await,
            LoadedDocument::Paged { handle, .. } => self.paint_page(handle.as_ref()).await,
        };

        match result {
            Ok(()) => debug!("Render {:?} complete", self.id),
            Err(RenderError::Cancelled) => debug!("Render {:?} cancelled", self.id),
            Err(e) => {
                warn!("Render {:?} failed: {e}", self.id);
                if let Some(errors) = &self.errors {
                    let _ = errors.send(e);
                }
            }
        }
    }

    fn ensure_live(&self) -> Result<(), RenderError> {
        if self.cancel.is_cancelled() {
            Err(RenderError::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn paint_image(
        &self,
        resource: Arc<RgbaImage>,
        width: u32,
        height: u32,
    ) -> Result<(), RenderError> {
        let target_w = scaled_extent(width as f32, self.scale);
        let target_h = scaled_extent(height as f32, self.scale);

        let scaled = tokio::task::spawn_blocking(move || {
            image::imageops::resize(
                resource.as_ref(),
                target_w,
                target_h,
                image::imageops::FilterType::Triangle,
            )
        })
        .await
        .map_err(|e| RenderError::Paint(e.to_string()))?;

        let mut surface = lock_surface(&self.surface);
        self.ensure_live()?;
        surface.resize(target_w, target_h);
        surface.clear();
        surface.draw_image(&scaled, target_w, target_h);
        Ok(())
    }

    async fn paint_page(&self, handle: &dyn PagedDocument) -> Result<(), RenderError> {
        self.ensure_live()?;
        let (page_w, page_h) = handle.page_size(self.page).await?;

        {
            let mut surface = lock_surface(&self.surface);
            self.ensure_live()?;
            surface.resize(
                scaled_extent(page_w, self.scale),
                scaled_extent(page_h, self.scale),
            );
            surface.clear();
        }

        let pixels = handle
            .render_page(self.page, self.scale, self.cancel.clone())
            .await?;

        let mut surface = lock_surface(&self.surface);
        self.ensure_live()?;
        surface.blit(&pixels);
        Ok(())
    }
}
