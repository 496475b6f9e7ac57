//! Configuration types for document-to-JSON extraction.
//!
//! All extraction behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. Setters clamp out-of-range values;
//! [`ExtractionConfigBuilder::build`] rejects combinations that cannot work.

use crate::error::Doc2JsonError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::sync::Arc;

/// Upper bound for the page budget regardless of what the caller asks for.
pub const MAX_PAGE_BUDGET: usize = 10;

/// Configuration for a document-to-JSON extraction.
///
/// # Example
/// ```rust
/// use edgequake_doc2json::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .max_pages(5)
///     .model("gpt-4.1-mini")
///     .build()
///     .unwrap();
/// assert_eq!(config.max_pages, 5);
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Page budget: maximum number of page images forwarded to the model,
    /// counted across all uploaded files. Range: 1–10. Default: 3.
    ///
    /// The first `max_pages` pages in upload order are kept; the rest are
    /// dropped and PDF pages past the budget are never rendered.
    pub max_pages: usize,

    /// Maximum accepted size of a single uploaded file in bytes. Default: 50 MiB.
    pub max_file_bytes: usize,

    /// Upscale factor applied to the nominal PDF page size. Default: 2.0.
    ///
    /// The model reads pixels, not vector text; at 1× fine print and table
    /// gridlines blur together.
    pub render_scale: f32,

    /// JPEG quality for rasterised pages (1–100). Default: 95.
    pub jpeg_quality: u8,

    /// Ceiling on the model availability probe in seconds. Default: 5.
    ///
    /// A probe that has not answered by then is treated as failed. The
    /// extraction call itself has no timeout.
    pub availability_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// LLM model identifier, e.g. "gpt-4.1-nano". If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens the model may generate per call. Default: 4096.
    pub max_tokens: usize,

    /// Token capacity of one model session, reported by the usage snapshot.
    /// Default: 128 000.
    pub session_token_quota: u64,

    /// Custom system instruction. If None, uses the built-in extraction persona.
    pub system_prompt: Option<String>,

    /// Ask the model to fix its own output when local repair fails. Default: true.
    pub model_repair: bool,

    /// Optional observer for file, page, session and recovery events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_pages: 3,
            max_file_bytes: 50 * 1024 * 1024,
            render_scale: 2.0,
            jpeg_quality: 95,
            availability_timeout_secs: 5,
            download_timeout_secs: 120,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 4096,
            session_token_quota: 128_000,
            system_prompt: None,
            model_repair: true,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("max_pages", &self.max_pages)
            .field("max_file_bytes", &self.max_file_bytes)
            .field("render_scale", &self.render_scale)
            .field("jpeg_quality", &self.jpeg_quality)
            .field("availability_timeout_secs", &self.availability_timeout_secs)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("session_token_quota", &self.session_token_quota)
            .field("model_repair", &self.model_repair)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<callback>"),
            )
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn max_pages(mut self, n: usize) -> Self {
        self.config.max_pages = n.clamp(1, MAX_PAGE_BUDGET);
        self
    }

    pub fn max_file_bytes(mut self, n: usize) -> Self {
        self.config.max_file_bytes = n;
        self
    }

    pub fn render_scale(mut self, scale: f32) -> Self {
        self.config.render_scale = scale.clamp(0.5, 4.0);
        self
    }

    pub fn jpeg_quality(mut self, q: u8) -> Self {
        self.config.jpeg_quality = q.clamp(1, 100);
        self
    }

    pub fn availability_timeout_secs(mut self, secs: u64) -> Self {
        self.config.availability_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn session_token_quota(mut self, n: u64) -> Self {
        self.config.session_token_quota = n;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn model_repair(mut self, v: bool) -> Self {
        self.config.model_repair = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, Doc2JsonError> {
        let c = &self.config;
        if c.max_file_bytes == 0 {
            return Err(Doc2JsonError::InvalidConfig(
                "max_file_bytes must be > 0".into(),
            ));
        }
        if c.availability_timeout_secs == 0 {
            return Err(Doc2JsonError::InvalidConfig(
                "availability timeout must be ≥ 1s".into(),
            ));
        }
        if c.session_token_quota == 0 {
            return Err(Doc2JsonError::InvalidConfig(
                "session token quota must be > 0".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = ExtractionConfig::default();
        assert_eq!(c.max_pages, 3);
        assert_eq!(c.max_file_bytes, 50 * 1024 * 1024);
        assert_eq!(c.render_scale, 2.0);
        assert_eq!(c.jpeg_quality, 95);
        assert_eq!(c.availability_timeout_secs, 5);
        assert!(c.model_repair);
    }

    #[test]
    fn builder_clamps_page_budget() {
        let c = ExtractionConfig::builder().max_pages(0).build().unwrap();
        assert_eq!(c.max_pages, 1);
        let c = ExtractionConfig::builder().max_pages(50).build().unwrap();
        assert_eq!(c.max_pages, MAX_PAGE_BUDGET);
    }

    #[test]
    fn builder_rejects_zero_timeout() {
        let err = ExtractionConfig::builder()
            .availability_timeout_secs(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, Doc2JsonError::InvalidConfig(_)));
    }

    #[test]
    fn debug_hides_provider() {
        let c = ExtractionConfig::default();
        let s = format!("{c:?}");
        assert!(s.contains("max_pages: 3"));
    }
}
