use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use simplelog::{Config, LevelFilter, WriteLogger};

use doccompare::document::{
    DirectorySaver, DownloadOrchestrator, DownloadOutcome, FetchImageDecoder, Fetcher,
    ImageLoader, PagedDocumentLoader, PagedEngine, ReqwestFetcher, SystemOpener,
};
use doccompare::panic_handler::initialize_panic_handler;
use doccompare::{Command, Pipeline, Settings, ViewerSet};

/// Load documents side by side and render their current pages to PNG
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Document references: http(s) URLs, data: URLs, file:// URLs or local paths
    references: Vec<String>,

    /// Page to show in every viewer (1-based)
    #[arg(short, long, default_value = "1")]
    page: usize,

    /// Zoom factor, clamped to the configured bounds
    #[arg(short, long)]
    scale: Option<f32>,

    /// Directory for rendered pages
    #[arg(short, long, default_value = ".")]
    out: PathBuf,

    /// Also download every document into this directory
    #[arg(long)]
    download: Option<PathBuf>,

    /// Relay endpoint for hosts that refuse direct access
    #[arg(long)]
    relay: Option<String>,

    /// Host the comparison is served from; remote references elsewhere are probed first
    #[arg(long)]
    origin: Option<String>,

    /// Settings file (default: <config dir>/doccompare/config.yaml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log file
    #[arg(long, default_value = "doccompare.log")]
    log_file: PathBuf,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    WriteLogger::init(
        LevelFilter::Debug,
        Config::default(),
        File::create(&args.log_file)?,
    )?;
    initialize_panic_handler();

    info!("Starting doccompare");

    let mut settings = Settings::load(args.config.as_deref());
    if args.relay.is_some() {
        settings.relay_endpoint = args.relay.clone();
    }
    if args.origin.is_some() {
        settings.origin_host = args.origin.clone();
    }
    settings.validate();

    let result = run(&args, &settings).await;
    if let Err(e) = &result {
        error!("Application error: {e:#}");
    }

    info!("Shutting down doccompare");
    result
}

#[cfg(feature = "pdf")]
fn paged_engine() -> Arc<dyn PagedEngine> {
    Arc::new(doccompare::document::MupdfEngine::new())
}

#[cfg(not(feature = "pdf"))]
fn paged_engine() -> Arc<dyn PagedEngine> {
    warn!("Built without the `pdf` feature; PDF references will fail to load");
    Arc::new(doccompare::document::paged::DisabledEngine)
}

fn build_pipeline(args: &Args, settings: &Settings) -> Result<Pipeline> {
    let fetcher: Arc<dyn Fetcher> =
        Arc::new(ReqwestFetcher::new().context("Failed to build HTTP client")?);
    let config = settings.engine_config();
    let download_dir = args.download.clone().unwrap_or_else(|| args.out.clone());

    let decoder = FetchImageDecoder::new(Arc::clone(&fetcher));
    Ok(Pipeline {
        images: Arc::new(ImageLoader::new(Arc::new(decoder))),
        paged: Arc::new(PagedDocumentLoader::new(
            Arc::clone(&fetcher),
            paged_engine(),
            config.clone(),
        )),
        downloads: Arc::new(DownloadOrchestrator::new(
            fetcher,
            Arc::new(DirectorySaver::new(download_dir)),
            Arc::new(SystemOpener),
            config,
        )),
        limits: settings.zoom_limits(),
    })
}

async fn run(args: &Args, settings: &Settings) -> Result<()> {
    let pipeline = build_pipeline(args, settings)?;

    let references = if args.references.is_empty() {
        settings.initial_references.clone()
    } else {
        args.references.clone()
    };

    let mut viewers = ViewerSet::new(pipeline, settings, &references);
    if references.len() > viewers.len() {
        warn!(
            "Only {} viewers allowed, ignoring {} references",
            viewers.max_viewers(),
            references.len() - viewers.len()
        );
    }
    viewers.settle_all().await;

    for id in viewers.ids() {
        if let Some(scale) = args.scale {
            viewers.dispatch(id, Command::SetScale(scale));
        }
        viewers.dispatch(id, Command::GoToPage(args.page));
    }
    viewers.settle_all().await;

    std::fs::create_dir_all(&args.out)
        .with_context(|| format!("Failed to create output directory {:?}", args.out))?;

    for panel in viewers.panels() {
        let view = panel.state();
        let load = panel.load_state();

        if let Some(err) = &load.error {
            println!("[{}] {}: {err}", view.id, view.reference);
            continue;
        }
        if load.document.is_none() {
            println!("[{}] (empty)", view.id);
            continue;
        }
        if args.page != view.current_page {
            warn!(
                "Viewer {}: page {} out of range (1..={})",
                view.id, args.page, view.page_count
            );
        }
        if let Some(err) = panel.last_render_error() {
            println!("[{}] {}: {err}", view.id, view.reference);
            continue;
        }

        let path = args
            .out
            .join(format!("viewer-{}-page-{}.png", view.id, view.current_page));
        panel
            .save_surface_png(&path)
            .with_context(|| format!("Failed to write {path:?}"))?;
        println!(
            "[{}] {} - page {}/{} at {:.2}x -> {}",
            view.id,
            load.title.as_deref().unwrap_or(&view.reference),
            view.current_page,
            view.page_count,
            view.scale,
            path.display()
        );
    }

    if args.download.is_some() {
        if !settings.enable_download {
            println!("Downloads are disabled in settings");
            return Ok(());
        }
        for panel in viewers.panels() {
            let view = panel.state();
            if view.reference.is_empty() {
                continue;
            }
            match panel.download().await {
                Ok(DownloadOutcome::Saved { strategy, path }) => {
                    println!("[{}] saved {} ({strategy})", view.id, path.display());
                }
                Ok(DownloadOutcome::OpenedExternally) => {
                    println!("[{}] opened {} externally", view.id, view.reference);
                }
                Err(e) => println!("[{}] download failed: {e}", view.id),
            }
        }
    }

    Ok(())
}
