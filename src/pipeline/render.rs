//! PDF rasterisation: render pages to opaque JPEG images via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! `tokio::task::spawn_blocking` moves the work onto a dedicated blocking
//! thread so the async executor never stalls during rendering.
//!
//! ## One page at a time
//!
//! Pages are rendered and encoded strictly in sequence and each bitmap is
//! dropped as soon as its JPEG bytes exist, so only one rendering surface is
//! ever alive. Pages beyond the limit are never rendered at all.

use crate::error::Doc2JsonError;
use crate::pipeline::encode::encode_jpeg;
use pdfium_render::prelude::*;
use std::sync::Arc;
use tracing::{debug, info};

/// Render settings for one PDF.
#[derive(Debug, Clone, Copy)]
pub struct RasterOptions {
    /// Maximum number of pages to render, counted from the first page.
    pub limit: usize,
    /// Upscale factor relative to the nominal page size.
    pub scale: f32,
    /// JPEG quality 1–100.
    pub jpeg_quality: u8,
}

/// One rendered page.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    /// 1-indexed page number within the source PDF.
    pub page_number: usize,
    /// JPEG-encoded bytes.
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Turns one PDF into page images.
///
/// Implementations must return pages in document order, never more than
/// `options.limit`, and must fail the whole file if any page fails.
pub trait PageRasterizer: Send + Sync {
    fn rasterize(
        &self,
        file_name: &str,
        pdf: &[u8],
        options: RasterOptions,
    ) -> Result<Vec<RenderedPage>, Doc2JsonError>;
}

/// Run a rasterizer on the blocking pool.
pub async fn rasterize_pdf(
    rasterizer: Arc<dyn PageRasterizer>,
    file_name: &str,
    pdf: Arc<[u8]>,
    options: RasterOptions,
) -> Result<Vec<RenderedPage>, Doc2JsonError> {
    let name = file_name.to_string();
    tokio::task::spawn_blocking(move || rasterizer.rasterize(&name, &pdf, options))
        .await
        .map_err(|e| Doc2JsonError::Internal(format!("Render task panicked: {}", e)))?
}

/// The pdfium-backed rasterizer.
///
/// Binds to the pdfium shared library on each call; `pdfium-auto` downloads
/// and caches it on first use (or honours `PDFIUM_LIB_PATH`).
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfiumRasterizer;

impl PdfiumRasterizer {
    pub fn new() -> Self {
        Self
    }
}

impl PageRasterizer for PdfiumRasterizer {
    fn rasterize(
        &self,
        file_name: &str,
        pdf: &[u8],
        options: RasterOptions,
    ) -> Result<Vec<RenderedPage>, Doc2JsonError> {
        let pdfium = pdfium_auto::bind_pdfium_silent()
            .map_err(|e| Doc2JsonError::PdfiumBindingFailed(e.to_string()))?;

        let document = pdfium
            .load_pdf_from_byte_slice(pdf, None)
            .map_err(|e| Doc2JsonError::CorruptPdf {
                file: file_name.to_string(),
                detail: format!("{:?}", e),
            })?;

        let pages = document.pages();
        let total_pages = pages.len() as usize;
        let to_render = total_pages.min(options.limit);
        info!(
            "PDF '{}' loaded: {} pages, rendering {}",
            file_name, total_pages, to_render
        );

        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(options.scale)
            .set_clear_color(PdfColor::new(255, 255, 255, 255));

        let mut results = Vec::with_capacity(to_render);

        for idx in 0..to_render {
            let page_number = idx + 1;
            let fail = |detail: String| Doc2JsonError::RasterisationFailed {
                file: file_name.to_string(),
                page: page_number,
                detail,
            };

            let page = pages.get(idx as u16).map_err(|e| fail(format!("{:?}", e)))?;

            let jpeg_and_size = {
                let bitmap = page
                    .render_with_config(&render_config)
                    .map_err(|e| fail(format!("{:?}", e)))?;
                let image = bitmap.as_image();
                let size = (image.width(), image.height());
                let jpeg = encode_jpeg(&image, options.jpeg_quality)
                    .map_err(|e| fail(format!("JPEG encoding failed: {}", e)))?;
                (jpeg, size)
            };
            let (jpeg, (width, height)) = jpeg_and_size;

            debug!(
                "Rendered '{}' page {} → {}x{} px, {} bytes",
                file_name,
                page_number,
                width,
                height,
                jpeg.len()
            );

            results.push(RenderedPage {
                page_number,
                jpeg,
                width,
                height,
            });
        }

        Ok(results)
    }
}
