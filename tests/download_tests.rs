use std::path::PathBuf;

use doccompare::document::{
    DirectorySaver, DownloadError, DownloadOrchestrator, DownloadOutcome, DownloadStrategy,
    LoadedDocument, OpenRequest, PagedEngine,
};
use doccompare::test_utils::test_helpers::{TestRig, fake_pdf};
use image::{ImageFormat, Rgba, RgbaImage};

#[tokio::test]
async fn same_origin_direct_fetch_wins_alone() {
    let rig = TestRig::new();
    let url = "https://viewer.local/docs/Annual Report 2024.pdf";
    rig.fetcher.respond(url, fake_pdf(2, None));

    let outcome = rig.downloads().download(url, None, None).await.unwrap();

    assert_eq!(
        outcome,
        DownloadOutcome::Saved {
            strategy: DownloadStrategy::Direct,
            path: PathBuf::from("memory").join("Annual_20Report_202024.pdf"),
        }
    );
    let requests = rig.fetcher.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].header_value("Accept"), Some("application/pdf"));
    assert!(rig.opener.opened().is_empty());
    assert_eq!(rig.saver.files()[0].1, fake_pdf(2, None));
}

#[tokio::test]
async fn cross_host_falls_back_to_relay() {
    let rig = TestRig::new();
    let url = "https://elsewhere.example/scan.png";
    let relayed = "https://relay.test/https://elsewhere.example/scan.png";
    rig.fetcher.fail(url, "connection reset");
    rig.fetcher.respond(relayed, b"png bytes".to_vec());

    let outcome = rig.downloads().download(url, None, None).await.unwrap();

    assert!(matches!(
        outcome,
        DownloadOutcome::Saved {
            strategy: DownloadStrategy::Relay,
            ..
        }
    ));
    let requests = rig.fetcher.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].header_value("Accept"), Some("image/*"));
    assert_eq!(
        requests[1].header_value("X-Requested-With"),
        Some("XMLHttpRequest")
    );
    assert_eq!(rig.saver.files()[0].0, "scan.png");
}

#[tokio::test]
async fn same_origin_failure_skips_relay_and_opens_externally() {
    let rig = TestRig::new();
    let url = "https://viewer.local/gone.pdf";
    rig.fetcher.respond_status(url, 500);

    let outcome = rig.downloads().download(url, None, None).await.unwrap();

    assert_eq!(outcome, DownloadOutcome::OpenedExternally);
    assert_eq!(rig.fetcher.requested_urls(), vec![url.to_string()]);
    assert_eq!(rig.opener.opened(), vec![url.to_string()]);
    assert!(rig.saver.files().is_empty());
}

#[tokio::test]
async fn image_document_is_reencoded_when_fetches_fail() {
    let rig = TestRig::new();
    let url = "https://elsewhere.example/photos/beach.jpg";
    let document = LoadedDocument::image(RgbaImage::from_pixel(6, 4, Rgba([30, 140, 220, 255])));

    let outcome = rig
        .downloads()
        .download(url, Some(&document), None)
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        DownloadOutcome::Saved {
            strategy: DownloadStrategy::SurfaceReencode,
            ..
        }
    ));
    let files = rig.saver.files();
    assert_eq!(files[0].0, "beach.jpg");
    assert_eq!(image::guess_format(&files[0].1).unwrap(), ImageFormat::Jpeg);
    let decoded = image::load_from_memory(&files[0].1).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (6, 4));
    assert!(rig.opener.opened().is_empty());
}

#[tokio::test]
async fn paged_document_is_never_reencoded() {
    let rig = TestRig::new();
    let url = "https://elsewhere.example/report.pdf";
    let request = OpenRequest::new(url, &rig.config);
    let handle = rig.engine.open(fake_pdf(2, None), &request).await.unwrap();
    let document = LoadedDocument::Paged {
        handle,
        page_count: 2,
    };

    let outcome = rig
        .downloads()
        .download(url, Some(&document), None)
        .await
        .unwrap();

    assert_eq!(outcome, DownloadOutcome::OpenedExternally);
    assert_eq!(rig.fetcher.requests().len(), 2);
    assert!(rig.saver.files().is_empty());
    assert_eq!(rig.opener.opened(), vec![url.to_string()]);
}

#[tokio::test]
async fn unencodable_format_falls_back_to_png() {
    let rig = TestRig::new();
    let url = "data:image/svg+xml;base64,PHN2Zy8+";
    let document = LoadedDocument::image(RgbaImage::new(3, 3));

    let outcome = rig
        .downloads()
        .download(url, Some(&document), None)
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        DownloadOutcome::Saved {
            strategy: DownloadStrategy::SurfaceReencode,
            ..
        }
    ));
    let files = rig.saver.files();
    assert!(files[0].0.ends_with(".png"), "{}", files[0].0);
    assert_eq!(image::guess_format(&files[0].1).unwrap(), ImageFormat::Png);
}

#[tokio::test]
async fn save_failure_moves_down_the_chain() {
    let rig = TestRig::new();
    let url = "https://viewer.local/a.pdf";
    rig.fetcher.respond(url, fake_pdf(1, None));
    rig.saver.fail_saves();

    let outcome = rig.downloads().download(url, None, None).await.unwrap();
    assert_eq!(outcome, DownloadOutcome::OpenedExternally);
}

#[tokio::test]
async fn empty_reference_is_the_only_error() {
    let rig = TestRig::new();
    let err = rig.downloads().download("", None, None).await.unwrap_err();
    assert!(matches!(err, DownloadError::NoReference));
    assert_eq!(err.to_string(), "No URL provided");
    assert!(rig.fetcher.requests().is_empty());
    assert!(rig.opener.opened().is_empty());
}

#[tokio::test]
async fn relay_override_is_used_for_downloads() {
    let rig = TestRig::new();
    let url = "https://elsewhere.example/x.pdf";
    let relayed = "https://override.relay/https://elsewhere.example/x.pdf";
    rig.fetcher.respond(relayed, fake_pdf(1, None));

    let outcome = rig
        .downloads()
        .download(url, None, Some("https://override.relay"))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        DownloadOutcome::Saved {
            strategy: DownloadStrategy::Relay,
            ..
        }
    ));
}

#[tokio::test]
async fn directory_saver_receives_direct_download() {
    let rig = TestRig::new();
    let dir = tempfile::tempdir().unwrap();
    let url = "https://viewer.local/files/contract_v2.pdf";
    rig.fetcher.respond(url, fake_pdf(3, None));

    let orchestrator = DownloadOrchestrator::new(
        rig.fetcher.clone(),
        std::sync::Arc::new(DirectorySaver::new(dir.path())),
        rig.opener.clone(),
        rig.config.clone(),
    );
    let outcome = orchestrator.download(url, None, None).await.unwrap();

    let expected = dir.path().join("contract_v2.pdf");
    assert_eq!(
        outcome,
        DownloadOutcome::Saved {
            strategy: DownloadStrategy::Direct,
            path: expected.clone(),
        }
    );
    assert_eq!(std::fs::read(expected).unwrap(), fake_pdf(3, None));
}
