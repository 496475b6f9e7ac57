//! Uploaded files: media-type routing, boundary limits, and loading.
//!
//! An [`UploadedFile`] is immutable once constructed; the pipeline only reads
//! it. Routing is decided by the *declared* media type. When a file is loaded
//! from disk or a URL, the declared type is inferred from the extension and
//! falls back to sniffing magic bytes.

use crate::config::ExtractionConfig;
use crate::error::Doc2JsonError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Image media types passed through to the model untouched.
pub const ACCEPTED_IMAGE_TYPES: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/webp",
    "image/gif",
    "image/bmp",
];

/// Media types routed to the PDF rasterizer.
pub const ACCEPTED_PDF_TYPES: &[&str] = &["application/pdf", "application/x-pdf"];

/// An uploaded file: raw bytes plus declared media type and name.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    name: String,
    media_type: String,
    data: Arc<[u8]>,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, media_type: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            media_type: media_type.into().trim().to_ascii_lowercase(),
            data: Arc::from(data.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Cheap shared handle to the bytes (no copy).
    pub fn shared_data(&self) -> Arc<[u8]> {
        Arc::clone(&self.data)
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// How a file is routed by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// One page, passed through as-is.
    Image,
    /// Rasterised, one page per PDF page.
    Pdf,
    /// Skipped.
    Unsupported,
}

/// Classify a declared media type.
pub fn classify_media_type(media_type: &str) -> MediaKind {
    let mt = media_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    if mt == "image/jpg" || ACCEPTED_IMAGE_TYPES.contains(&mt.as_str()) {
        MediaKind::Image
    } else if ACCEPTED_PDF_TYPES.contains(&mt.as_str()) {
        MediaKind::Pdf
    } else {
        MediaKind::Unsupported
    }
}

/// Check a file against the boundary limits and return its routing.
///
/// Rejections are per-file; the classifier skips rejected files.
pub fn validate_upload(file: &UploadedFile, config: &ExtractionConfig) -> Result<MediaKind, Doc2JsonError> {
    if file.size() == 0 {
        return Err(Doc2JsonError::EmptyFile {
            file: file.name().to_string(),
        });
    }
    if file.size() > config.max_file_bytes {
        return Err(Doc2JsonError::FileTooLarge {
            file: file.name().to_string(),
            size: file.size(),
            limit: config.max_file_bytes,
        });
    }
    match classify_media_type(file.media_type()) {
        MediaKind::Unsupported => Err(Doc2JsonError::UnsupportedMediaType {
            file: file.name().to_string(),
            media_type: file.media_type().to_string(),
        }),
        kind => Ok(kind),
    }
}

/// Guess a media type from a file name's extension.
pub fn media_type_from_extension(name: &str) -> Option<&'static str> {
    let ext = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
    let mt = match ext.as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        _ => return None,
    };
    Some(mt)
}

/// Guess a media type from the leading bytes.
pub fn sniff_media_type(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"%PDF") {
        Some("application/pdf")
    } else if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        Some("image/png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.starts_with(b"GIF8") {
        Some("image/gif")
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else if bytes.starts_with(b"BM") {
        Some("image/bmp")
    } else {
        None
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Load an upload from a local path or an HTTP/HTTPS URL.
///
/// The declared media type comes from the extension, then from magic bytes,
/// and is `application/octet-stream` when neither matches (the classifier
/// will then skip it).
pub async fn load_upload(input: &str, timeout_secs: u64) -> Result<UploadedFile, Doc2JsonError> {
    let (name, bytes) = if is_url(input) {
        download_url(input, timeout_secs).await?
    } else {
        read_local(input).await?
    };

    let media_type = media_type_from_extension(&name)
        .or_else(|| sniff_media_type(&bytes))
        .unwrap_or("application/octet-stream");
    debug!("Loaded '{}' ({} bytes, {})", name, bytes.len(), media_type);

    Ok(UploadedFile::new(name, media_type, bytes))
}

async fn read_local(path_str: &str) -> Result<(String, Vec<u8>), Doc2JsonError> {
    let path = PathBuf::from(path_str);
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| Doc2JsonError::FileNotFound { path: path.clone() })?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path_str.to_string());
    Ok((name, bytes))
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<(String, Vec<u8>), Doc2JsonError> {
    info!("Downloading: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| Doc2JsonError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            Doc2JsonError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            Doc2JsonError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(Doc2JsonError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| Doc2JsonError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    Ok((filename_from_url(url), bytes.to_vec()))
}

/// Last path segment of the URL, or `"download"` when there is none.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() {
                    return last.to_string();
                }
            }
        }
    }
    "download".to_string()
}
