use std::sync::{Arc, Mutex};

use doccompare::document::render::lock_surface;
use doccompare::document::{
    EngineConfig, LoadedDocument, OpenRequest, PagedEngine, RenderError, Renderer, SharedSurface,
    Surface,
};
use doccompare::test_utils::test_helpers::{FAKE_PAGE_SIZE, FakeEngine, fake_pdf, page_color};

async fn open(engine: &FakeEngine, pages: usize) -> LoadedDocument {
    let request = OpenRequest::new("https://viewer.local/test.pdf", &EngineConfig::default());
    let handle = engine.open(fake_pdf(pages, None), &request).await.unwrap();
    LoadedDocument::Paged {
        handle,
        page_count: pages,
    }
}

fn renderer() -> (Renderer, SharedSurface, flume::Receiver<RenderError>) {
    let surface: SharedSurface = Arc::new(Mutex::new(Surface::new()));
    let (tx, rx) = flume::unbounded();
    let renderer = Renderer::new(Arc::clone(&surface)).with_error_sink(tx);
    (renderer, surface, rx)
}

async fn let_tasks_run() {
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn paints_page_at_scale() {
    let engine = FakeEngine::new();
    let document = open(&engine, 3).await;
    let (mut renderer, surface, errors) = renderer();

    renderer.render(Some(&document), 2, 1.5);
    renderer.settle().await;

    let surface = lock_surface(&surface);
    assert_eq!(
        (surface.width(), surface.height()),
        (
            (FAKE_PAGE_SIZE.0 * 1.5) as u32,
            (FAKE_PAGE_SIZE.1 * 1.5) as u32
        )
    );
    assert_eq!(surface.pixels().get_pixel(10, 10), &page_color(2));
    assert!(errors.try_recv().is_err());
}

#[tokio::test]
async fn settling_again_after_a_finished_paint_returns_immediately() {
    let engine = FakeEngine::new();
    let document = open(&engine, 2).await;
    let (mut renderer, surface, errors) = renderer();

    let id = renderer.render(Some(&document), 2, 1.0);
    assert!(id.is_some());
    renderer.settle().await;
    renderer.settle().await;
    assert!(renderer.in_flight().is_none());

    renderer.render(Some(&document), 1, 1.0);
    renderer.settle().await;
    renderer.settle().await;

    let surface = lock_surface(&surface);
    assert_eq!(surface.pixels().get_pixel(10, 10), &page_color(1));
    assert!(errors.try_recv().is_err());
    assert_eq!(engine.renders_finished(), 2);
}

#[tokio::test]
async fn newer_request_supersedes_pending_render() {
    let engine = FakeEngine::new();
    let document = open(&engine, 3).await;
    let (mut renderer, surface, errors) = renderer();
    let page_one = engine.gate_page(1);

    let first = renderer.render(Some(&document), 1, 1.0).unwrap();
    let_tasks_run().await;
    assert_eq!(renderer.in_flight(), Some(first));
    assert_eq!(engine.renders_started(), 1);

    let second = renderer.render(Some(&document), 2, 1.0).unwrap();
    assert_ne!(first, second);
    renderer.settle().await;

    page_one.notify_one();
    let_tasks_run().await;

    let surface = lock_surface(&surface);
    assert_eq!(surface.pixels().get_pixel(5, 5), &page_color(2));
    assert_eq!(engine.renders_finished(), 1);
    assert!(
        errors.try_recv().is_err(),
        "cancellation must not be reported"
    );
}

#[tokio::test]
async fn failing_page_is_reported_and_leaves_surface_blank() {
    let engine = FakeEngine::new();
    let document = open(&engine, 3).await;
    engine.break_page(2);
    let (mut renderer, surface, errors) = renderer();

    renderer.render(Some(&document), 1, 1.0);
    renderer.settle().await;
    assert!(!lock_surface(&surface).is_blank());

    renderer.render(Some(&document), 2, 1.0);
    renderer.settle().await;

    assert!(lock_surface(&surface).is_blank());
    let err = errors.try_recv().unwrap();
    assert!(!err.is_cancelled());
    assert_eq!(err.to_string(), "Error rendering: page 2 is damaged");
}

#[tokio::test]
async fn out_of_range_page_is_a_paint_error() {
    let engine = FakeEngine::new();
    let document = open(&engine, 2).await;
    let (mut renderer, _surface, errors) = renderer();

    renderer.render(Some(&document), 9, 1.0);
    renderer.settle().await;

    let err = errors.try_recv().unwrap();
    assert!(err.to_string().starts_with("Error rendering: Page 9 is out of range"));
}

#[tokio::test]
async fn cancel_stops_in_flight_paint_silently() {
    let engine = FakeEngine::new();
    let document = open(&engine, 1).await;
    let (mut renderer, surface, errors) = renderer();
    let gate = engine.gate_page(1);

    renderer.render(Some(&document), 1, 1.0);
    let_tasks_run().await;
    renderer.cancel();
    assert!(renderer.in_flight().is_none());

    gate.notify_one();
    let_tasks_run().await;

    assert!(lock_surface(&surface).is_blank());
    assert_eq!(engine.renders_finished(), 0);
    assert!(errors.try_recv().is_err());
}

#[tokio::test]
async fn dropping_renderer_cancels_paint() {
    let engine = FakeEngine::new();
    let document = open(&engine, 1).await;
    let (mut renderer, surface, _errors) = renderer();
    let gate = engine.gate_page(1);

    renderer.render(Some(&document), 1, 1.0);
    let_tasks_run().await;
    drop(renderer);

    gate.notify_one();
    let_tasks_run().await;

    assert!(lock_surface(&surface).is_blank());
    assert_eq!(engine.renders_finished(), 0);
}

#[tokio::test]
async fn image_and_clear() {
    let (mut renderer, surface, _errors) = renderer();
    let document = LoadedDocument::image(image::RgbaImage::from_pixel(
        20,
        10,
        image::Rgba([9, 9, 9, 255]),
    ));

    renderer.render(Some(&document), 1, 0.5);
    renderer.settle().await;
    {
        let surface = lock_surface(&surface);
        assert_eq!((surface.width(), surface.height()), (10, 5));
    }

    renderer.clear();
    let surface = lock_surface(&surface);
    assert_eq!((surface.width(), surface.height()), (0, 0));
}
