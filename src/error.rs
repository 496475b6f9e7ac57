//! Error types for the edgequake-doc2json library.
//!
//! Three error types map onto three boundaries:
//!
//! * [`Doc2JsonError`] — **Classified, caller-facing**: every public
//!   operation returns it. Low-level failures (pdfium errors, serde parse
//!   errors, provider errors) are caught at the component boundary and
//!   re-expressed as one of these variants with a short human-readable
//!   message plus the failing file / page where one is known.
//!
//! * [`ModelError`] — what the external model capability may report from a
//!   `prompt` or `create_session` call: unsupported input, quota exceeded,
//!   or anything else.
//!
//! * [`RecoveryError`] — the outcome of a single local JSON recovery stage.
//!   These are pure values so each stage can be unit-tested on its own.

use std::path::PathBuf;
use thiserror::Error;

/// All classified errors returned by the edgequake-doc2json library.
#[derive(Debug, Error)]
pub enum Doc2JsonError {
    // ── Input rejection ───────────────────────────────────────────────────
    /// Declared media type is not on the allow-list (images + PDF).
    #[error("Unsupported file type '{media_type}' for '{file}'\nAccepted: PNG, JPEG, WebP, GIF, BMP images and PDF documents.")]
    UnsupportedMediaType { file: String, media_type: String },

    /// File exceeds the per-file size limit.
    #[error("File '{file}' is too large ({size} bytes, limit {limit} bytes)")]
    FileTooLarge { file: String, size: usize, limit: usize },

    /// File has no content.
    #[error("File '{file}' is empty")]
    EmptyFile { file: String },

    /// Nothing to extract from: no files, no usable pages, or a blank instruction.
    #[error("Nothing to extract: {0}")]
    EmptyRequest(String),

    /// Local input path does not exist or is unreadable.
    #[error("File not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Rasterisation ─────────────────────────────────────────────────────
    /// PDF could not be opened at all.
    #[error("PDF '{file}' could not be opened: {detail}")]
    CorruptPdf { file: String, detail: String },

    /// A specific page failed to render; the whole file is abandoned.
    #[error("Rasterisation failed for '{file}' page {page}: {detail}")]
    RasterisationFailed {
        file: String,
        page: usize,
        detail: String,
    },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
PDFium is normally downloaded automatically on first run.\n\
If the auto-download failed, set PDFIUM_LIB_PATH=/path/to/libpdfium to use an existing copy.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Model capability ──────────────────────────────────────────────────
    /// The external model is not usable in this environment.
    #[error("Language model unavailable (status: {status}).\n{hint}")]
    CapabilityUnavailable { status: String, hint: String },

    /// The capability was available but refused to open a session.
    #[error("Could not create a model session: {detail}")]
    SessionCreationFailed { detail: String },

    /// The model rejected the request as unsupported or too large.
    #[error("The model could not accept this input ({detail}).\nTry fewer pages, smaller files, or a lower page limit.")]
    ModelInputRejected { detail: String },

    /// Any other failure while prompting the model.
    #[error("Model call failed: {detail}")]
    ModelInvocationFailed { detail: String },

    // ── Response recovery ─────────────────────────────────────────────────
    /// The model returned nothing but whitespace.
    #[error("The model returned an empty response")]
    EmptyResponse,

    /// Every recovery stage failed; no partial structure is returned.
    #[error("The model response is not valid JSON and could not be repaired: {detail}")]
    UnrecoverableJson { detail: String },

    // ── Output ────────────────────────────────────────────────────────────
    /// Could not create or write the output JSON file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config ────────────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Doc2JsonError {
    /// `true` for the per-file input rejections that the classifier skips
    /// rather than propagating.
    pub fn is_input_rejection(&self) -> bool {
        matches!(
            self,
            Doc2JsonError::UnsupportedMediaType { .. }
                | Doc2JsonError::FileTooLarge { .. }
                | Doc2JsonError::EmptyFile { .. }
        )
    }
}

/// Failure reported by the external model capability.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// The input contained something the model cannot consume.
    #[error("unsupported input: {0}")]
    UnsupportedInput(String),

    /// The request exceeded the session's remaining capacity.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Anything else.
    #[error("{0}")]
    Other(String),
}

impl From<ModelError> for Doc2JsonError {
    fn from(e: ModelError) -> Self {
        match e {
            ModelError::UnsupportedInput(_) | ModelError::QuotaExceeded(_) => {
                Doc2JsonError::ModelInputRejected {
                    detail: e.to_string(),
                }
            }
            ModelError::Other(detail) => Doc2JsonError::ModelInvocationFailed { detail },
        }
    }
}

/// Failure of a single local recovery stage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecoveryError {
    /// Input was empty or whitespace only.
    #[error("empty response")]
    EmptyResponse,

    /// No `{` or `[` anywhere in the text.
    #[error("no JSON object or array found in response")]
    NoJsonFound,

    /// A candidate was found but did not parse.
    #[error("invalid JSON: {detail}")]
    InvalidJson { detail: String },
}
