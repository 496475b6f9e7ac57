//! # edgequake-doc2json
//!
//! Extract structured JSON from scanned documents, photos and PDFs using
//! Vision Language Models (VLMs).
//!
//! ## Why this crate?
//!
//! Invoices, forms and receipts rarely come with a text layer worth
//! trusting. This crate turns every upload into page images, sends them to a
//! VLM together with the caller's plain-language request ("invoice number,
//! date and line items") and guarantees that what comes back is valid JSON,
//! or a classified error explaining why not.
//!
//! ## Pipeline Overview
//!
//! ```text
//! files
//!  │
//!  ├─ 1. Classify  images pass through, PDFs are rasterised, page budget enforced
//!  ├─ 2. Render    PDF pages → JPEG via pdfium (CPU-bound, spawn_blocking)
//!  ├─ 3. Request   instruction + ordered page images in one message
//!  ├─ 4. Model     one call on a lazily created session
//!  ├─ 5. Recover   sanitize → syntax repair → model-assisted repair
//!  └─ 6. Reset     the session is destroyed after every attempt
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_doc2json::{extract_paths, ExtractionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = ExtractionConfig::default();
//!     let output = extract_paths(&["invoice.pdf"], "invoice number and total", &config).await?;
//!     println!("{}", output.to_pretty_json());
//!     eprintln!("resolved by: {}", output.stats.stage);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature   | Default | Description |
//! |-----------|---------|-------------|
//! | `cli`     | on      | Enables the `doc2json` binary (clap + anyhow + tracing-subscriber) |
//! | `bundled` | off     | Embeds the pdfium library in the binary |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-doc2json = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod provider;
pub mod session;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExtractionConfig, ExtractionConfigBuilder, MAX_PAGE_BUDGET};
pub use error::{Doc2JsonError, ModelError, RecoveryError};
pub use extract::{extract_files, extract_paths, extract_structured_data, extract_sync, write_json, Extractor};
pub use output::{ExtractionOutput, ExtractionStats, RecoveryStage};
pub use pipeline::classify::{process_files, PageArtifact};
pub use pipeline::input::{load_upload, UploadedFile};
pub use pipeline::render::{PageRasterizer, PdfiumRasterizer, RasterOptions, RenderedPage};
pub use progress::{event_channel, ExtractionProgressCallback, ProgressCallback, ProgressEvent};
pub use provider::LlmCapability;
pub use session::{Availability, ModelCapability, ModelSession, SessionManager, SessionOptions, SessionUsage};
