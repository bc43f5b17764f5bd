pub mod test_helpers {
    use std::collections::{HashMap, HashSet};
    use std::io::{self, Cursor};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use image::{ImageFormat, Rgba, RgbaImage};
    use tokio::sync::Notify;

    use crate::document::download::{ExternalOpener, FileSaver};
    use crate::document::fetch::{FetchError, FetchRequest, FetchResponse, Fetcher};
    use crate::document::paged::{EngineConfig, OpenRequest, PagedDocument, PagedEngine};
    use crate::document::{
        CancelToken, DownloadOrchestrator, EngineError, FetchImageDecoder, ImageLoader,
        PagedDocumentLoader,
    };
    use crate::viewer::{Pipeline, ZoomLimits};

    /// Page size of every fake page, in points
    pub const FAKE_PAGE_SIZE: (f32, f32) = (100.0, 150.0);

    /// Fill colour the fake engine paints for `page`
    pub fn page_color(page: usize) -> Rgba<u8> {
        Rgba([(page * 40 % 256) as u8, 80, 160, 255])
    }

    /// Bytes the fake engine accepts as a PDF
    pub fn fake_pdf(pages: usize, title: Option<&str>) -> Vec<u8> {
        let mut text = format!("%PDF-fake pages={pages}");
        if let Some(title) = title {
            text.push_str(&format!(" title={title}"));
        }
        text.into_bytes()
    }

    pub fn png_bytes(width: u32, height: u32, color: Rgba<u8>) -> Vec<u8> {
        let image = RgbaImage::from_pixel(width, height, color);
        let mut cursor = Cursor::new(Vec::new());
        image
            .write_to(&mut cursor, ImageFormat::Png)
            .expect("encode png");
        cursor.into_inner()
    }

    fn gate() -> Arc<Notify> {
        Arc::new(Notify::new())
    }

    enum Reply {
        Respond(FetchResponse),
        Fail(String),
    }

    struct Script {
        reply: Reply,
        gate: Option<Arc<Notify>>,
    }

    /// Fetcher answering from a per-URL script; unscripted URLs fail like an unreachable host
    #[derive(Default)]
    pub struct ScriptedFetcher {
        scripts: Mutex<HashMap<String, Script>>,
        failing_probes: Mutex<HashSet<String>>,
        requests: Mutex<Vec<FetchRequest>>,
        probes: Mutex<Vec<String>>,
    }

    impl ScriptedFetcher {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn script(&self, url: &str, reply: Reply, gate: Option<Arc<Notify>>) {
            self.scripts
                .lock()
                .unwrap()
                .insert(url.to_string(), Script { reply, gate });
        }

        pub fn respond(&self, url: &str, body: Vec<u8>) {
            self.script(url, Reply::Respond(FetchResponse::ok(body)), None);
        }

        pub fn respond_status(&self, url: &str, status: u16) {
            let response = FetchResponse {
                status,
                content_type: None,
                body: Vec::new(),
            };
            self.script(url, Reply::Respond(response), None);
        }

        pub fn fail(&self, url: &str, detail: &str) {
            self.script(url, Reply::Fail(detail.to_string()), None);
        }

        /// Respond only after the returned gate is notified
        pub fn respond_gated(&self, url: &str, body: Vec<u8>) -> Arc<Notify> {
            let gate = gate();
            self.script(
                url,
                Reply::Respond(FetchResponse::ok(body)),
                Some(Arc::clone(&gate)),
            );
            gate
        }

        pub fn fail_probe(&self, url: &str) {
            self.failing_probes.lock().unwrap().insert(url.to_string());
        }

        pub fn requests(&self) -> Vec<FetchRequest> {
            self.requests.lock().unwrap().clone()
        }

        pub fn requested_urls(&self) -> Vec<String> {
            self.requests().into_iter().map(|r| r.url).collect()
        }

        pub fn probes(&self) -> Vec<String> {
            self.probes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Fetcher for ScriptedFetcher {
        async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
            self.requests.lock().unwrap().push(request.clone());

            let (gate, reply) = {
                let scripts = self.scripts.lock().unwrap();
                match scripts.get(&request.url) {
                    Some(script) => (
                        script.gate.clone(),
                        match &script.reply {
                            Reply::Respond(response) => Ok(response.clone()),
                            Reply::Fail(detail) => Err(detail.clone()),
                        },
                    ),
                    None => (None, Err("host unreachable".to_string())),
                }
            };

            if let Some(gate) = gate {
                gate.notified().await;
            }

            reply.map_err(|detail| FetchError::Transport {
                url: request.url.clone(),
                detail,
            })
        }

        async fn probe(&self, url: &str) -> Result<(), FetchError> {
            self.probes.lock().unwrap().push(url.to_string());
            if self.failing_probes.lock().unwrap().contains(url) {
                Err(FetchError::Transport {
                    url: url.to_string(),
                    detail: "opaque probe rejected".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    #[derive(Default)]
    struct EngineControls {
        gates: Mutex<HashMap<usize, Arc<Notify>>>,
        broken_pages: Mutex<HashSet<usize>>,
        broken_metadata: Mutex<bool>,
        renders_started: AtomicUsize,
        renders_finished: AtomicUsize,
        opened: Mutex<Vec<OpenRequest>>,
    }

    /// Engine that understands [`fake_pdf`] payloads and paints solid pages
    #[derive(Clone, Default)]
    pub struct FakeEngine {
        controls: Arc<EngineControls>,
    }

    impl FakeEngine {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Page renders for `page` block until the returned gate is notified
        pub fn gate_page(&self, page: usize) -> Arc<Notify> {
            let gate = gate();
            self.controls
                .gates
                .lock()
                .unwrap()
                .insert(page, Arc::clone(&gate));
            gate
        }

        pub fn break_page(&self, page: usize) {
            self.controls.broken_pages.lock().unwrap().insert(page);
        }

        pub fn break_metadata(&self) {
            *self.controls.broken_metadata.lock().unwrap() = true;
        }

        pub fn renders_started(&self) -> usize {
            self.controls.renders_started.load(Ordering::SeqCst)
        }

        pub fn renders_finished(&self) -> usize {
            self.controls.renders_finished.load(Ordering::SeqCst)
        }

        pub fn opened(&self) -> Vec<OpenRequest> {
            self.controls.opened.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PagedEngine for FakeEngine {
        async fn open(
            &self,
            bytes: Vec<u8>,
            request: &OpenRequest,
        ) -> Result<Arc<dyn PagedDocument>, EngineError> {
            self.controls.opened.lock().unwrap().push(request.clone());

            let text = String::from_utf8_lossy(&bytes);
            let Some(rest) = text.strip_prefix("%PDF-fake") else {
                return Err(EngineError::Invalid("missing %PDF header".to_string()));
            };

            let mut pages = 0;
            let mut title = None;
            for field in rest.split_whitespace() {
                if let Some(value) = field.strip_prefix("pages=") {
                    pages = value
                        .parse()
                        .map_err(|_| EngineError::Invalid("bad page count".to_string()))?;
                } else if let Some(value) = field.strip_prefix("title=") {
                    title = Some(value.replace('_', " "));
                }
            }

            Ok(Arc::new(FakeDocument {
                pages,
                title,
                controls: Arc::clone(&self.controls),
            }))
        }
    }

    pub struct FakeDocument {
        pages: usize,
        title: Option<String>,
        controls: Arc<EngineControls>,
    }

    #[async_trait]
    impl PagedDocument for FakeDocument {
        fn page_count(&self) -> usize {
            self.pages
        }

        async fn title(&self) -> Result<Option<String>, EngineError> {
            if *self.controls.broken_metadata.lock().unwrap() {
                return Err(EngineError::generic("metadata stream corrupt"));
            }
            Ok(self.title.clone())
        }

        async fn page_size(&self, page: usize) -> Result<(f32, f32), EngineError> {
            if page == 0 || page > self.pages {
                return Err(EngineError::PageOutOfRange {
                    page,
                    count: self.pages,
                });
            }
            Ok(FAKE_PAGE_SIZE)
        }

        async fn render_page(
            &self,
            page: usize,
            scale: f32,
            cancel: CancelToken,
        ) -> Result<RgbaImage, EngineError> {
            self.controls.renders_started.fetch_add(1, Ordering::SeqCst);
            let gate = self.controls.gates.lock().unwrap().get(&page).cloned();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            if self.controls.broken_pages.lock().unwrap().contains(&page) {
                return Err(EngineError::generic(format!("page {page} is damaged")));
            }

            self.controls.renders_finished.fetch_add(1, Ordering::SeqCst);
            let width = (FAKE_PAGE_SIZE.0 * scale).round() as u32;
            let height = (FAKE_PAGE_SIZE.1 * scale).round() as u32;
            Ok(RgbaImage::from_pixel(width, height, page_color(page)))
        }
    }

    /// Saver that keeps files in memory
    #[derive(Default)]
    pub struct MemorySaver {
        files: Mutex<Vec<(String, Vec<u8>)>>,
        failing: Mutex<bool>,
    }

    impl MemorySaver {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn fail_saves(&self) {
            *self.failing.lock().unwrap() = true;
        }

        pub fn files(&self) -> Vec<(String, Vec<u8>)> {
            self.files.lock().unwrap().clone()
        }
    }

    impl FileSaver for MemorySaver {
        fn save(&self, filename: &str, bytes: &[u8]) -> io::Result<PathBuf> {
            if *self.failing.lock().unwrap() {
                return Err(io::Error::other("disk full"));
            }
            self.files
                .lock()
                .unwrap()
                .push((filename.to_string(), bytes.to_vec()));
            Ok(PathBuf::from("memory").join(filename))
        }
    }

    #[derive(Default)]
    pub struct RecordingOpener {
        opened: Mutex<Vec<String>>,
    }

    impl RecordingOpener {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn opened(&self) -> Vec<String> {
            self.opened.lock().unwrap().clone()
        }
    }

    impl ExternalOpener for RecordingOpener {
        fn open(&self, reference: &str) -> io::Result<()> {
            self.opened.lock().unwrap().push(reference.to_string());
            Ok(())
        }
    }

    /// Fully faked collaborators plus a pipeline wired from them
    pub struct TestRig {
        pub fetcher: Arc<ScriptedFetcher>,
        pub engine: Arc<FakeEngine>,
        pub saver: Arc<MemorySaver>,
        pub opener: Arc<RecordingOpener>,
        pub config: EngineConfig,
    }

    impl TestRig {
        pub fn new() -> Self {
            Self::with_config(EngineConfig {
                origin_host: Some("viewer.local".to_string()),
                relay_endpoint: Some("https://relay.test".to_string()),
                ..EngineConfig::default()
            })
        }

        pub fn with_config(config: EngineConfig) -> Self {
            Self {
                fetcher: ScriptedFetcher::new(),
                engine: FakeEngine::new(),
                saver: MemorySaver::new(),
                opener: RecordingOpener::new(),
                config,
            }
        }

        pub fn image_loader(&self) -> Arc<ImageLoader> {
            let decoder = FetchImageDecoder::new(self.fetcher.clone());
            Arc::new(ImageLoader::new(Arc::new(decoder)))
        }

        pub fn paged_loader(&self) -> Arc<PagedDocumentLoader> {
            Arc::new(PagedDocumentLoader::new(
                self.fetcher.clone(),
                self.engine.clone(),
                self.config.clone(),
            ))
        }

        pub fn downloads(&self) -> Arc<DownloadOrchestrator> {
            Arc::new(DownloadOrchestrator::new(
                self.fetcher.clone(),
                self.saver.clone(),
                self.opener.clone(),
                self.config.clone(),
            ))
        }

        pub fn pipeline(&self, limits: ZoomLimits) -> Pipeline {
            Pipeline {
                images: self.image_loader(),
                paged: self.paged_loader(),
                downloads: self.downloads(),
                limits,
            }
        }
    }

    impl Default for TestRig {
        fn default() -> Self {
            Self::new()
        }
    }
}
