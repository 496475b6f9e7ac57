//! File classification and page-budget enforcement.
//!
//! Every uploaded file becomes zero or more [`PageArtifact`]s:
//!
//! * images pass through untouched as a single page,
//! * PDFs are rasterised, one artifact per page,
//! * anything else is skipped with a warning.
//!
//! The page budget caps the *combined* output. Artifacts are admitted in
//! upload order (and page order within a PDF) through a [`PageSequence`],
//! which stamps each one with its ordinal and refuses anything past the
//! budget. A PDF that arrives after the budget is full is never opened.
//!
//! A rasterisation failure aborts the whole batch, naming the file, even if
//! earlier files already produced pages.

use crate::config::ExtractionConfig;
use crate::error::Doc2JsonError;
use crate::pipeline::input::{validate_upload, MediaKind, UploadedFile};
use crate::pipeline::render::{rasterize_pdf, PageRasterizer, RasterOptions};
use serde::Serialize;
use std::io::Cursor;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One page image, ready for the model.
#[derive(Debug, Clone, Serialize)]
pub struct PageArtifact {
    /// 0-based position in the overall sequence.
    pub ordinal: usize,
    /// 0-based index of the uploaded file this page came from.
    pub source_index: usize,
    /// Source file name, with the page number for PDF pages.
    pub label: String,
    /// 1-indexed page within the source PDF; `None` for images.
    pub page_number: Option<usize>,
    pub media_type: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    #[serde(skip)]
    data: Arc<[u8]>,
}

impl PageArtifact {
    pub fn new(
        ordinal: usize,
        source_index: usize,
        label: impl Into<String>,
        page_number: Option<usize>,
        media_type: impl Into<String>,
        data: Arc<[u8]>,
        dimensions: Option<(u32, u32)>,
    ) -> Self {
        Self {
            ordinal,
            source_index,
            label: label.into(),
            page_number,
            media_type: media_type.into(),
            width: dimensions.map(|d| d.0),
            height: dimensions.map(|d| d.1),
            data,
        }
    }

    /// Encoded image bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// A page waiting to be admitted into a [`PageSequence`].
#[derive(Debug)]
pub struct PendingPage {
    pub source_index: usize,
    pub label: String,
    pub page_number: Option<usize>,
    pub media_type: String,
    pub data: Arc<[u8]>,
    pub dimensions: Option<(u32, u32)>,
}

/// Order-preserving, budget-bounded artifact builder.
#[derive(Debug)]
pub struct PageSequence {
    budget: usize,
    artifacts: Vec<PageArtifact>,
    dropped: usize,
}

impl PageSequence {
    pub fn new(budget: usize) -> Self {
        Self {
            budget,
            artifacts: Vec::with_capacity(budget),
            dropped: 0,
        }
    }

    pub fn remaining(&self) -> usize {
        self.budget.saturating_sub(self.artifacts.len())
    }

    pub fn is_full(&self) -> bool {
        self.remaining() == 0
    }

    /// Pages refused because the budget was already spent.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Admit a page, returning its ordinal, or `None` when the budget is full.
    ///
    /// Pages must arrive in non-decreasing `source_index` order.
    pub fn push(&mut self, page: PendingPage) -> Option<usize> {
        if self.is_full() {
            self.dropped += 1;
            return None;
        }
        debug_assert!(self
            .artifacts
            .last()
            .is_none_or(|prev| prev.source_index <= page.source_index));

        let ordinal = self.artifacts.len();
        self.artifacts.push(PageArtifact::new(
            ordinal,
            page.source_index,
            page.label,
            page.page_number,
            page.media_type,
            page.data,
            page.dimensions,
        ));
        Some(ordinal)
    }

    pub fn finish(self) -> Vec<PageArtifact> {
        self.artifacts
    }
}

/// Classify, rasterise and truncate a batch of uploads.
pub async fn process_files(
    files: &[UploadedFile],
    rasterizer: Arc<dyn PageRasterizer>,
    config: &ExtractionConfig,
) -> Result<Vec<PageArtifact>, Doc2JsonError> {
    if files.is_empty() {
        return Err(Doc2JsonError::EmptyRequest("no files were uploaded".into()));
    }

    let cb = config.progress_callback.as_ref();
    let mut sequence = PageSequence::new(config.max_pages);

    for (index, file) in files.iter().enumerate() {
        if let Some(cb) = cb {
            cb.on_file_start(index, file.name());
        }

        let kind = match validate_upload(file, config) {
            Ok(kind) => kind,
            Err(e) if e.is_input_rejection() => {
                warn!("Skipping '{}': {}", file.name(), e);
                if let Some(cb) = cb {
                    cb.on_file_skipped(file.name(), &e.to_string());
                }
                continue;
            }
            Err(e) => return Err(e),
        };

        match kind {
            MediaKind::Image => {
                let page = PendingPage {
                    source_index: index,
                    label: file.name().to_string(),
                    page_number: None,
                    media_type: file.media_type().to_string(),
                    data: file.shared_data(),
                    dimensions: image_dimensions(file.data()),
                };
                admit(&mut sequence, page, config);
            }
            MediaKind::Pdf => {
                if sequence.is_full() {
                    debug!("Budget full; not opening '{}'", file.name());
                    continue;
                }
                let options = RasterOptions {
                    limit: sequence.remaining(),
                    scale: config.render_scale,
                    jpeg_quality: config.jpeg_quality,
                };
                let rendered =
                    rasterize_pdf(Arc::clone(&rasterizer), file.name(), file.shared_data(), options)
                        .await?;
                for page in rendered {
                    let pending = PendingPage {
                        source_index: index,
                        label: format!("{} (page {})", file.name(), page.page_number),
                        page_number: Some(page.page_number),
                        media_type: "image/jpeg".to_string(),
                        data: Arc::from(page.jpeg),
                        dimensions: Some((page.width, page.height)),
                    };
                    admit(&mut sequence, pending, config);
                }
            }
            MediaKind::Unsupported => continue,
        }
    }

    if sequence.dropped() > 0 {
        info!(
            "Page budget of {} reached; {} page(s) dropped",
            config.max_pages,
            sequence.dropped()
        );
    }

    let artifacts = sequence.finish();
    info!("Prepared {} page artifact(s) from {} file(s)", artifacts.len(), files.len());
    Ok(artifacts)
}

fn admit(sequence: &mut PageSequence, page: PendingPage, config: &ExtractionConfig) {
    let label = page.label.clone();
    match sequence.push(page) {
        Some(ordinal) => {
            debug!("Page {} admitted: {}", ordinal + 1, label);
            if let Some(ref cb) = config.progress_callback {
                cb.on_page_ready(&label, ordinal, config.max_pages);
            }
        }
        None => debug!("Page dropped (budget {}): {}", config.max_pages, label),
    }
}

/// Best-effort pixel size of an encoded image.
fn image_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}
