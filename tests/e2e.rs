//! End-to-end tests for edgequake-doc2json.
//!
//! These bind the real pdfium library and, for the live tests, make real
//! LLM API calls. They are gated behind the `E2E_ENABLED` environment
//! variable so they do not run in CI unless explicitly requested.
//!
//! Run with:
//!   E2E_ENABLED=1 cargo test --test e2e -- --nocapture
//!
//! The live extraction tests additionally need an API key (e.g. OPENAI_API_KEY).

use edgequake_doc2json::{
    write_json, Doc2JsonError, ExtractionConfig, Extractor, PageRasterizer, PdfiumRasterizer,
    RasterOptions, UploadedFile,
};
use pdfium_render::prelude::*;
use tracing_subscriber::EnvFilter;

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Skip this test unless E2E_ENABLED is set. Installs a `RUST_LOG`-driven
/// subscriber so library logs show up with `--nocapture`.
macro_rules! e2e_skip_unless_enabled {
    () => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP — set E2E_ENABLED=1 to run e2e tests");
            return;
        }
        init_tracing();
    }};
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Skip this test unless an LLM provider key is configured as well.
macro_rules! e2e_skip_unless_live {
    () => {{
        e2e_skip_unless_enabled!();
        let has_key = ["OPENAI_API_KEY", "ANTHROPIC_API_KEY", "GEMINI_API_KEY"]
            .iter()
            .any(|k| std::env::var(k).is_ok_and(|v| !v.is_empty()));
        if !has_key {
            println!("SKIP — no LLM API key in the environment");
            return;
        }
    }};
}

/// Build an in-memory PDF with `pages` blank A4 pages.
fn blank_pdf(pages: usize) -> Vec<u8> {
    let pdfium = pdfium_auto::bind_pdfium_silent().expect("pdfium should bind");
    let mut document = pdfium.create_new_pdf().expect("create pdf");
    for _ in 0..pages {
        document
            .pages_mut()
            .create_page_at_end(PdfPagePaperSize::a4())
            .expect("add page");
    }
    document.save_to_bytes().expect("save pdf")
}

fn options(limit: usize) -> RasterOptions {
    RasterOptions {
        limit,
        scale: 2.0,
        jpeg_quality: 95,
    }
}

// ── Rasterizer (no LLM) ──────────────────────────────────────────────────────

#[test]
fn test_rasterize_respects_limit_and_order() {
    e2e_skip_unless_enabled!();
    let pdf = blank_pdf(4);

    let pages = PdfiumRasterizer::new()
        .rasterize("blank.pdf", &pdf, options(2))
        .expect("rasterize should succeed");

    assert_eq!(pages.len(), 2);
    assert_eq!(pages[0].page_number, 1);
    assert_eq!(pages[1].page_number, 2);
    for page in &pages {
        assert!(page.jpeg.starts_with(&[0xFF, 0xD8]), "not a JPEG");
        // A4 is 595×842 pt; at 2× the bitmap is roughly 1190×1684.
        assert!(page.width > 1000 && page.height > 1500, "{}×{}", page.width, page.height);
    }
}

#[test]
fn test_rendered_page_is_opaque_white() {
    e2e_skip_unless_enabled!();
    let pdf = blank_pdf(1);
    let pages = PdfiumRasterizer::new()
        .rasterize("blank.pdf", &pdf, options(1))
        .expect("rasterize should succeed");

    let img = image::load_from_memory(&pages[0].jpeg).expect("decode jpeg").to_rgb8();
    let px = img.get_pixel(img.width() / 2, img.height() / 2);
    assert!(px.0.iter().all(|&c| c > 240), "expected white, got {:?}", px);
}

#[test]
fn test_corrupt_pdf_is_classified() {
    e2e_skip_unless_enabled!();
    let err = PdfiumRasterizer::new()
        .rasterize("broken.pdf", b"%PDF-1.7 this is not a pdf", options(3))
        .unwrap_err();
    assert!(matches!(err, Doc2JsonError::CorruptPdf { .. }), "got {err:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_process_files_with_real_pdfium() {
    e2e_skip_unless_enabled!();
    let config = ExtractionConfig::builder().max_pages(3).build().unwrap();
    let extractor = Extractor::new(config);

    let files = vec![
        UploadedFile::new("first.pdf", "application/pdf", blank_pdf(2)),
        UploadedFile::new("second.pdf", "application/pdf", blank_pdf(5)),
    ];
    let pages = extractor.process_files(&files).await.expect("process_files");

    let labels: Vec<_> = pages.iter().map(|p| p.label.as_str()).collect();
    assert_eq!(
        labels,
        vec!["first.pdf (page 1)", "first.pdf (page 2)", "second.pdf (page 1)"]
    );
}

// ── Live extraction ──────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn test_live_extraction_on_blank_page_returns_json() {
    e2e_skip_unless_live!();
    let config = ExtractionConfig::builder().max_pages(1).build().unwrap();
    let extractor = Extractor::new(config);

    let files = vec![UploadedFile::new("blank.pdf", "application/pdf", blank_pdf(1))];
    let output = extractor
        .extract_files("the document title, or null if there is none", &files)
        .await
        .expect("live extraction should succeed");

    assert!(output.document.is_object() || output.document.is_array());
    assert!(!extractor.sessions().is_live(), "session must be reset");
    println!("stage: {}  document: {}", output.stats.stage, output.document);

    let dir = tempfile::tempdir().unwrap();
    let path = write_json(dir.path().join("blank"), &output.document).await.unwrap();
    let text = std::fs::read_to_string(path).unwrap();
    assert_eq!(serde_json::from_str::<serde_json::Value>(&text).unwrap(), output.document);
}
