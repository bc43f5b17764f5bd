//! Per-viewer document loading with generation tokens
//!
//! Every call to [`DocumentLoader::load`] with a new reference bumps the
//! generation. A completed load applies its result only if its generation is
//! still current; stale results are dropped without touching the state.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};
use tokio::task::JoinHandle;

use super::classify::{DocumentKind, detect_type};
use super::error::LoadError;
use super::image_loader::ImageLoader;
use super::paged::PagedDocumentLoader;
use super::types::{LoadState, LoadedDocument};

/// Notifications published after each applied transition
#[derive(Clone, Debug)]
pub enum LoaderEvent {
    Loading {
        generation: u64,
        reference: String,
    },
    Loaded {
        generation: u64,
        page_count: usize,
        title: Option<String>,
    },
    Failed {
        generation: u64,
        error: String,
    },
    Reset {
        generation: u64,
    },
}

#[derive(Debug, Default)]
struct Shared {
    generation: u64,
    state: LoadState,
}

type Outcome = Result<(LoadedDocument, Option<String>), LoadError>;

pub struct DocumentLoader {
    shared: Arc<Mutex<Shared>>,
    reference: String,
    relay_override: Option<String>,
    pending: Option<JoinHandle<()>>,
    images: Arc<ImageLoader>,
    paged: Arc<PagedDocumentLoader>,
    events: Option<flume::Sender<LoaderEvent>>,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DocumentLoader {
    pub fn new(images: Arc<ImageLoader>, paged: Arc<PagedDocumentLoader>) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared::default())),
            reference: String::new(),
            relay_override: None,
            pending: None,
            images,
            paged,
            events: None,
        }
    }

    #[must_use]
    pub fn with_events(mut self, events: flume::Sender<LoaderEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Relay endpoint used for this viewer instead of the configured one
    pub fn set_relay_override(&mut self, relay: Option<String>) {
        if self.relay_override != relay {
            self.relay_override = relay;
            self.reload();
        }
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn state(&self) -> LoadState {
        lock(&self.shared).state.clone()
    }

    pub fn document(&self) -> Option<LoadedDocument> {
        lock(&self.shared).state.document.clone()
    }

    pub fn generation(&self) -> u64 {
        lock(&self.shared).generation
    }

    pub fn is_pending(&self) -> bool {
        self.pending.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Point the loader at `reference`. Unchanged references are ignored.
    pub fn load(&mut self, reference: &str) {
        if reference == self.reference {
            return;
        }
        self.reference = reference.to_string();
        self.reload();
    }

    /// Start over for the current reference, superseding any pending load
    pub fn reload(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }

        let reference = self.reference.clone();
        let generation = {
            let mut shared = lock(&self.shared);
            shared.generation += 1;
            shared.state = if reference.is_empty() {
                LoadState::default()
            } else {
                LoadState::loading()
            };
            shared.generation
        };

        if reference.is_empty() {
            debug!("Loader reset (generation {generation})");
            self.emit(LoaderEvent::Reset { generation });
            return;
        }

        let classification = detect_type(&reference);
        debug!(
            "Loading {reference} as {:?} (generation {generation})",
            classification.kind
        );
        self.emit(LoaderEvent::Loading {
            generation,
            reference: reference.clone(),
        });

        let shared = Arc::clone(&self.shared);
        let events = self.events.clone();
        let images = Arc::clone(&self.images);
        let paged = Arc::clone(&self.paged);
        let relay = self.relay_override.clone();

        self.pending = Some(tokio::spawn(async move {
            let outcome = match classification.kind {
                DocumentKind::Image => images.load(&reference).await,
                DocumentKind::Paged => paged.load(&reference, relay.as_deref()).await,
            };
            apply_outcome(&shared, events.as_ref(), generation, &reference, outcome);
        }));
    }

    /// Wait for the in-flight load, if any, to finish
    pub async fn settle(&mut self) {
        if let Some(handle) = self.pending.take() {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!("Load task ended abnormally: {e}");
                }
            }
        }
    }

    fn emit(&self, event: LoaderEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

fn apply_outcome(
    shared: &Mutex<Shared>,
    events: Option<&flume::Sender<LoaderEvent>>,
    generation: u64,
    reference: &str,
    outcome: Outcome,
) {
    let mut shared = lock(shared);
    if shared.generation != generation {
        debug!(
            "Discarding stale result for {reference} (generation {generation}, current {})",
            shared.generation
        );
        return;
    }

    let event = match outcome {
        Ok((document, title)) => {
            let page_count = document.page_count();
            info!("Loaded {reference}");
            shared.state = LoadState::loaded(document, title.clone());
            LoaderEvent::Loaded {
                generation,
                page_count,
                title,
            }
        }
        Err(e) => {
            let error = e.user_message();
            warn!("Failed to load {reference}: {e}");
            shared.state = LoadState::failed(error.clone());
            LoaderEvent::Failed { generation, error }
        }
    };

    if let Some(events) = events {
        let _ = events.send(event);
    }
}

impl Drop for DocumentLoader {
    fn drop(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }
}
