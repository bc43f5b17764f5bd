//! Viewer panels and the multi-panel container
//!
//! [`ViewerState`] is a pure state machine: commands in, effects out.
//! [`ViewerPanel`] executes those effects against a loader, a renderer and
//! the shared download orchestrator. [`ViewerSet`] owns the panels.

use std::sync::{Arc, Mutex};

use log::{debug, info, warn};

use crate::document::render::{SharedSurface, lock_surface};
use crate::document::{
    DocumentLoader, DownloadError, DownloadOrchestrator, DownloadOutcome, ImageLoader,
    LoadState, LoaderEvent, PagedDocumentLoader, RenderError, Renderer, Surface,
};
use crate::settings::Settings;

/// Zoom bounds and step
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ZoomLimits {
    pub min: f32,
    pub max: f32,
    /// Reset target; 1.0 when unset
    pub default: Option<f32>,
    pub step: f32,
}

impl Default for ZoomLimits {
    fn default() -> Self {
        Self {
            min: Self::MIN_SCALE,
            max: Self::MAX_SCALE,
            default: None,
            step: Self::STEP,
        }
    }
}

impl ZoomLimits {
    pub const MIN_SCALE: f32 = 0.25;
    pub const MAX_SCALE: f32 = 2.0;
    pub const STEP: f32 = 0.25;

    /// Clamp into `[min, max]`; non-finite values reset
    pub fn clamp(&self, scale: f32) -> f32 {
        if scale.is_finite() {
            scale.clamp(self.min, self.max)
        } else {
            self.reset_value()
        }
    }

    pub fn reset_value(&self) -> f32 {
        self.default.unwrap_or(1.0).clamp(self.min, self.max)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    SetReference(String),
    ZoomIn,
    ZoomOut,
    ZoomReset,
    SetScale(f32),
    /// 1-based page number
    GoToPage(usize),
    NextPage,
    PrevPage,
    DocumentLoaded { page_count: usize },
    DocumentCleared,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    Load(String),
    Render,
    ClearSurface,
}

/// Per-panel view state
#[derive(Clone, Debug)]
pub struct ViewerState {
    pub id: usize,
    pub reference: String,
    pub scale: f32,
    /// 1-based
    pub current_page: usize,
    /// 0 until a document is loaded
    pub page_count: usize,
    limits: ZoomLimits,
}

impl ViewerState {
    #[must_use]
    pub fn new(id: usize, limits: ZoomLimits) -> Self {
        Self {
            id,
            reference: String::new(),
            scale: limits.reset_value(),
            current_page: 1,
            page_count: 0,
            limits,
        }
    }

    pub fn limits(&self) -> ZoomLimits {
        self.limits
    }

    /// Apply a command and return resulting effects
    #[must_use]
    pub fn apply(&mut self, cmd: Command) -> Vec<Effect> {
        match cmd {
            Command::SetReference(reference) => {
                if reference == self.reference {
                    return vec![];
                }
                self.reference = reference.clone();
                self.current_page = 1;
                self.page_count = 0;
                if reference.is_empty() {
                    vec![Effect::Load(reference), Effect::ClearSurface]
                } else {
                    vec![Effect::Load(reference)]
                }
            }

            Command::ZoomIn => self.set_scale(self.scale + self.limits.step),
            Command::ZoomOut => self.set_scale(self.scale - self.limits.step),
            Command::ZoomReset => self.set_scale(self.limits.reset_value()),
            Command::SetScale(scale) => self.set_scale(scale),

            Command::GoToPage(page) => {
                if self.page_count == 0 || !(1..=self.page_count).contains(&page) {
                    return vec![];
                }
                if page == self.current_page {
                    return vec![];
                }
                self.current_page = page;
                vec![Effect::Render]
            }
            Command::NextPage => self.apply(Command::GoToPage(self.current_page + 1)),
            Command::PrevPage => self.apply(Command::GoToPage(self.current_page.saturating_sub(1))),

            Command::DocumentLoaded { page_count } => {
                self.page_count = page_count.max(1);
                self.current_page = self.current_page.clamp(1, self.page_count);
                vec![Effect::Render]
            }

            Command::DocumentCleared => {
                self.page_count = 0;
                self.current_page = 1;
                vec![Effect::ClearSurface]
            }
        }
    }

    fn set_scale(&mut self, requested: f32) -> Vec<Effect> {
        let clamped = self.limits.clamp(requested);
        if (self.scale - clamped).abs() > f32::EPSILON {
            self.scale = clamped;
            if self.page_count > 0 {
                return vec![Effect::Render];
            }
        }
        vec![]
    }
}

/// Shared collaborators every panel is built from
#[derive(Clone)]
pub struct Pipeline {
    pub images: Arc<ImageLoader>,
    pub paged: Arc<PagedDocumentLoader>,
    pub downloads: Arc<DownloadOrchestrator>,
    pub limits: ZoomLimits,
}

impl Pipeline {
    pub fn panel(&self, id: usize) -> ViewerPanel {
        ViewerPanel::new(id, self)
    }
}

/// One viewer: state machine plus its loader, renderer and surface
pub struct ViewerPanel {
    state: ViewerState,
    loader: DocumentLoader,
    renderer: Renderer,
    downloads: Arc<DownloadOrchestrator>,
    loader_events: flume::Receiver<LoaderEvent>,
    render_errors: flume::Receiver<RenderError>,
    last_render_error: Option<String>,
}

impl ViewerPanel {
    pub fn new(id: usize, pipeline: &Pipeline) -> Self {
        let (event_tx, loader_events) = flume::unbounded();
        let (error_tx, render_errors) = flume::unbounded();
        let surface: SharedSurface = Arc::new(Mutex::new(Surface::new()));

        Self {
            state: ViewerState::new(id, pipeline.limits),
            loader: DocumentLoader::new(Arc::clone(&pipeline.images), Arc::clone(&pipeline.paged))
                .with_events(event_tx),
            renderer: Renderer::new(surface).with_error_sink(error_tx),
            downloads: Arc::clone(&pipeline.downloads),
            loader_events,
            render_errors,
            last_render_error: None,
        }
    }

    pub fn id(&self) -> usize {
        self.state.id
    }

    pub fn state(&self) -> &ViewerState {
        &self.state
    }

    pub fn load_state(&self) -> LoadState {
        self.loader.state()
    }

    pub fn surface(&self) -> SharedSurface {
        self.renderer.surface()
    }

    pub fn last_render_error(&self) -> Option<&str> {
        self.last_render_error.as_deref()
    }

    pub fn set_relay_override(&mut self, relay: Option<String>) {
        self.loader.set_relay_override(relay);
    }

    pub fn dispatch(&mut self, cmd: Command) {
        let effects = self.state.apply(cmd);
        for effect in effects {
            self.run_effect(effect);
        }
    }

    fn run_effect(&mut self, effect: Effect) {
        match effect {
            Effect::Load(reference) => self.loader.load(&reference),
            Effect::Render => {
                self.last_render_error = None;
                let document = self.loader.document();
                self.renderer
                    .render(document.as_ref(), self.state.current_page, self.state.scale);
            }
            Effect::ClearSurface => self.renderer.clear(),
        }
    }

    /// Drain loader notifications and render errors into the panel state
    pub fn poll(&mut self) {
        while let Ok(event) = self.loader_events.try_recv() {
            let current = self.loader.generation();
            match event {
                LoaderEvent::Loaded {
                    generation,
                    page_count,
                    ..
                } if generation == current => {
                    self.dispatch(Command::DocumentLoaded { page_count });
                }
                LoaderEvent::Failed { generation, .. } | LoaderEvent::Reset { generation }
                    if generation == current =>
                {
                    self.dispatch(Command::DocumentCleared);
                }
                other => debug!("Viewer {}: ignoring {other:?}", self.id()),
            }
        }

        while let Ok(err) = self.render_errors.try_recv() {
            warn!("Viewer {}: {err}", self.id());
            self.last_render_error = Some(err.to_string());
        }
    }

    /// Wait for the pending load and the render it triggers
    pub async fn settle(&mut self) {
        self.loader.settle().await;
        self.poll();
        self.renderer.settle().await;
        self.poll();
    }

    pub async fn download(&self) -> Result<DownloadOutcome, DownloadError> {
        let document = self.loader.document();
        self.downloads
            .download(&self.state.reference, document.as_ref(), None)
            .await
    }

    pub fn save_surface_png(&self, path: &std::path::Path) -> Result<(), image::ImageError> {
        lock_surface(&self.surface()).save_png(path)
    }
}

/// Side-by-side viewers
pub struct ViewerSet {
    pipeline: Pipeline,
    panels: Vec<ViewerPanel>,
    max_viewers: usize,
    multiple_enabled: bool,
}

impl ViewerSet {
    /// One panel per initial reference (at least one, at most `max_viewers`)
    pub fn new(pipeline: Pipeline, settings: &Settings, initial_references: &[String]) -> Self {
        let max_viewers = if settings.enable_multiple_viewers {
            settings.max_viewers.max(1)
        } else {
            1
        };
        let mut set = Self {
            pipeline,
            panels: Vec::new(),
            max_viewers,
            multiple_enabled: settings.enable_multiple_viewers,
        };

        let references: Vec<&str> = if initial_references.is_empty() {
            vec![""]
        } else {
            initial_references.iter().map(String::as_str).collect()
        };
        for (index, reference) in references.into_iter().take(max_viewers).enumerate() {
            let mut panel = set.pipeline.panel(index + 1);
            panel.dispatch(Command::SetReference(reference.to_string()));
            set.panels.push(panel);
        }
        set
    }

    pub fn len(&self) -> usize {
        self.panels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.panels.is_empty()
    }

    pub fn max_viewers(&self) -> usize {
        self.max_viewers
    }

    pub fn can_add(&self) -> bool {
        self.multiple_enabled && self.panels.len() < self.max_viewers
    }

    pub fn ids(&self) -> Vec<usize> {
        self.panels.iter().map(ViewerPanel::id).collect()
    }

    pub fn panels(&self) -> impl Iterator<Item = &ViewerPanel> {
        self.panels.iter()
    }

    pub fn panel(&self, id: usize) -> Option<&ViewerPanel> {
        self.panels.iter().find(|panel| panel.id() == id)
    }

    pub fn panel_mut(&mut self, id: usize) -> Option<&mut ViewerPanel> {
        self.panels.iter_mut().find(|panel| panel.id() == id)
    }

    /// Add a viewer with id `max(id) + 1`; `None` when full
    pub fn add_viewer(&mut self, reference: &str) -> Option<usize> {
        if !self.can_add() {
            debug!("Viewer limit {} reached", self.max_viewers);
            return None;
        }
        let id = self.panels.iter().map(ViewerPanel::id).max().unwrap_or(0) + 1;
        let mut panel = self.pipeline.panel(id);
        panel.dispatch(Command::SetReference(reference.to_string()));
        self.panels.push(panel);
        info!("Added viewer {id}");
        Some(id)
    }

    /// Add as many of `references` as there are free slots
    pub fn add_viewers(&mut self, references: &[String]) -> Vec<usize> {
        references
            .iter()
            .map_while(|reference| self.add_viewer(reference))
            .collect()
    }

    /// Remove a viewer; the last one is never removed
    pub fn remove_viewer(&mut self, id: usize) -> bool {
        if self.panels.len() <= 1 {
            return false;
        }
        let before = self.panels.len();
        self.panels.retain(|panel| panel.id() != id);
        self.panels.len() != before
    }

    pub fn dispatch(&mut self, id: usize, cmd: Command) -> bool {
        match self.panel_mut(id) {
            Some(panel) => {
                panel.dispatch(cmd);
                true
            }
            None => false,
        }
    }

    pub async fn settle_all(&mut self) {
        for panel in &mut self.panels {
            panel.settle().await;
        }
    }
}
