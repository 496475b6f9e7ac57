//! Extraction entry points.
//!
//! [`extract_structured_data`] is the core operation: send one request,
//! recover JSON from the reply, reset the session. [`Extractor`] bundles a
//! rasterizer, a session manager and a config so callers can go from files
//! to JSON in one call.

use crate::config::ExtractionConfig;
use crate::error::{Doc2JsonError, RecoveryError};
use crate::output::{ExtractionOutput, ExtractionStats, RecoveryStage};
use crate::pipeline::classify::{process_files, PageArtifact};
use crate::pipeline::input::{load_upload, UploadedFile};
use crate::pipeline::recover::{recover_local_observed, sanitize_then_parse};
use crate::pipeline::render::{PageRasterizer, PdfiumRasterizer};
use crate::pipeline::request::{build_repair_request, build_request};
use crate::prompts::DEFAULT_SYSTEM_PROMPT;
use crate::provider::LlmCapability;
use crate::session::{ModelCapability, ModelSession, SessionManager, SessionOptions, SessionUsage};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Run one extraction attempt against `manager`'s session.
///
/// The session is reset when the attempt ends, whatever the outcome, so the
/// next call starts from a freshly created session.
///
/// # Errors
/// - [`Doc2JsonError::EmptyRequest`] for a blank instruction or no pages
/// - [`Doc2JsonError::CapabilityUnavailable`] / [`Doc2JsonError::SessionCreationFailed`]
/// - [`Doc2JsonError::ModelInputRejected`] when the model refuses the input size or type
/// - [`Doc2JsonError::EmptyResponse`] when the model returns nothing
/// - [`Doc2JsonError::UnrecoverableJson`] when every recovery stage fails
pub async fn extract_structured_data(
    manager: &SessionManager,
    instruction: &str,
    pages: &[PageArtifact],
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, Doc2JsonError> {
    let start = Instant::now();
    info!("Extracting from {} page image(s)", pages.len());

    let attempt = run_attempt(manager, instruction, pages, config).await;

    let usage = manager.usage_snapshot();
    manager.reset().await;
    if let Some(ref cb) = config.progress_callback {
        cb.on_extraction_complete(attempt.is_ok());
    }

    let (document, stage, model_calls) = attempt?;
    info!("Extraction succeeded at stage: {}", stage);

    Ok(ExtractionOutput {
        document,
        stats: ExtractionStats {
            page_count: pages.len(),
            stage,
            model_calls,
            usage,
            duration_ms: start.elapsed().as_millis() as u64,
        },
    })
}

async fn run_attempt(
    manager: &SessionManager,
    instruction: &str,
    pages: &[PageArtifact],
    config: &ExtractionConfig,
) -> Result<(Value, RecoveryStage, usize), Doc2JsonError> {
    let request = build_request(instruction, pages)?;
    let session = manager.acquire().await?;
    let raw = session.prompt(&request).await?;

    let cb = config.progress_callback.as_ref();
    let local = recover_local_observed(&raw, |stage| {
        if let Some(cb) = cb {
            cb.on_recovery_stage(stage);
        }
    });

    let err = match local {
        Ok(recovered) => return Ok((recovered.document, recovered.stage, 1)),
        Err(RecoveryError::EmptyResponse) => return Err(Doc2JsonError::EmptyResponse),
        Err(e) => e,
    };

    if !config.model_repair {
        return Err(Doc2JsonError::UnrecoverableJson {
            detail: err.to_string(),
        });
    }

    warn!("Local recovery failed ({}); asking the model to repair", err);
    if let Some(cb) = cb {
        cb.on_recovery_stage(RecoveryStage::ModelRepair);
    }
    let document = model_repair(session.as_ref(), &raw).await?;
    Ok((document, RecoveryStage::ModelRepair, 2))
}

/// One bounded round-trip asking the model to fix `broken`, then
/// sanitize-then-parse on the answer. Every failure is terminal.
async fn model_repair(session: &dyn ModelSession, broken: &str) -> Result<Value, Doc2JsonError> {
    let reply = session
        .prompt(&build_repair_request(broken))
        .await
        .map_err(|e| Doc2JsonError::UnrecoverableJson {
            detail: format!("repair request failed: {e}"),
        })?;
    sanitize_then_parse(&reply).map_err(|e| Doc2JsonError::UnrecoverableJson {
        detail: format!("repaired output still invalid: {e}"),
    })
}

// ── Extractor ────────────────────────────────────────────────────────────────

/// Files-to-JSON front end owning a rasterizer and a session manager.
///
/// # Example
/// ```rust,no_run
/// use edgequake_doc2json::{Extractor, ExtractionConfig, UploadedFile};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let extractor = Extractor::new(ExtractionConfig::default());
/// let file = UploadedFile::new("invoice.pdf", "application/pdf", std::fs::read("invoice.pdf")?);
/// let output = extractor.extract_files("invoice number and line items", &[file]).await?;
/// println!("{}", output.to_pretty_json());
/// # Ok(())
/// # }
/// ```
pub struct Extractor {
    rasterizer: Arc<dyn PageRasterizer>,
    sessions: SessionManager,
    config: ExtractionConfig,
}

impl std::fmt::Debug for Extractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extractor")
            .field("sessions", &self.sessions)
            .field("config", &self.config)
            .finish()
    }
}

impl Extractor {
    /// pdfium rasterizer plus the provider resolved from `config`.
    pub fn new(config: ExtractionConfig) -> Self {
        let capability = Arc::new(LlmCapability::from_config(&config));
        Self::with_parts(capability, Arc::new(PdfiumRasterizer::new()), config)
    }

    pub fn with_parts(
        capability: Arc<dyn ModelCapability>,
        rasterizer: Arc<dyn PageRasterizer>,
        config: ExtractionConfig,
    ) -> Self {
        let system_prompt = config
            .system_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
        let sessions = SessionManager::new(capability, SessionOptions::multimodal(system_prompt))
            .with_probe_timeout(Duration::from_secs(config.availability_timeout_secs))
            .with_progress(config.progress_callback.clone());
        Self {
            rasterizer,
            sessions,
            config,
        }
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Usage of the live session, `None` between attempts.
    pub fn usage_snapshot(&self) -> Option<SessionUsage> {
        self.sessions.usage_snapshot()
    }

    /// Classify, rasterise and truncate `files` to the page budget.
    pub async fn process_files(&self, files: &[UploadedFile]) -> Result<Vec<PageArtifact>, Doc2JsonError> {
        process_files(files, Arc::clone(&self.rasterizer), &self.config).await
    }

    /// See [`extract_structured_data`].
    pub async fn extract(&self, instruction: &str, pages: &[PageArtifact]) -> Result<ExtractionOutput, Doc2JsonError> {
        extract_structured_data(&self.sessions, instruction, pages, &self.config).await
    }

    /// [`Self::process_files`] followed by [`Self::extract`].
    pub async fn extract_files(
        &self,
        instruction: &str,
        files: &[UploadedFile],
    ) -> Result<ExtractionOutput, Doc2JsonError> {
        let pages = self.process_files(files).await?;
        self.extract(instruction, &pages).await
    }
}

// ── Convenience entry points ─────────────────────────────────────────────────

/// Extract from in-memory uploads with a one-off [`Extractor`].
pub async fn extract_files(
    files: &[UploadedFile],
    instruction: &str,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, Doc2JsonError> {
    Extractor::new(config.clone()).extract_files(instruction, files).await
}

/// Load each input (local path or HTTP(S) URL), then extract.
pub async fn extract_paths(
    inputs: &[impl AsRef<str>],
    instruction: &str,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, Doc2JsonError> {
    let mut files = Vec::with_capacity(inputs.len());
    for input in inputs {
        files.push(load_upload(input.as_ref(), config.download_timeout_secs).await?);
    }
    extract_files(&files, instruction, config).await
}

/// Synchronous wrapper around [`extract_paths`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_sync(
    inputs: &[impl AsRef<str>],
    instruction: &str,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, Doc2JsonError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Doc2JsonError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(extract_paths(inputs, instruction, config))
}

/// Write `value` as pretty-printed UTF-8 JSON with a trailing newline.
///
/// The `.json` extension is enforced and the write is atomic (temp file +
/// rename). Returns the path actually written.
pub async fn write_json(path: impl AsRef<Path>, value: &Value) -> Result<PathBuf, Doc2JsonError> {
    let path = path.as_ref().with_extension("json");
    let write_err = |e: std::io::Error| Doc2JsonError::OutputWriteFailed {
        path: path.clone(),
        source: e,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
    }

    let mut text = serde_json::to_string_pretty(value)
        .map_err(|e| Doc2JsonError::Internal(format!("JSON serialisation: {e}")))?;
    text.push('\n');

    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, text).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, &path).await.map_err(write_err)?;

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use crate::pipeline::request::ModelMessage;
    use crate::progress::event_channel;
    use crate::progress::ProgressEvent;
    use crate::session::{Availability, SessionPhase};
    use async_trait::async_trait;
    use futures::StreamExt;
    use serde_json::json;
    use std::sync::Mutex;

    /// Replies with scripted answers in order and records each request.
    struct ScriptedSession {
        replies: Mutex<Vec<Result<String, ModelError>>>,
        requests: Arc<Mutex<Vec<Vec<ModelMessage>>>>,
    }

    #[async_trait]
    impl ModelSession for ScriptedSession {
        async fn prompt(&self, messages: &[ModelMessage]) -> Result<String, ModelError> {
            self.requests.lock().unwrap().push(messages.to_vec());
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                return Err(ModelError::Other("no scripted reply".into()));
            }
            replies.remove(0)
        }

        fn usage(&self) -> SessionUsage {
            SessionUsage::new(self.requests.lock().unwrap().len() as u64 * 100, 1000)
        }

        async fn fork(&self) -> Result<Arc<dyn ModelSession>, ModelError> {
            Err(ModelError::Other("not supported".into()))
        }

        async fn destroy(&self) {}
    }

    struct ScriptedCapability {
        status: Availability,
        replies: Vec<Result<String, ModelError>>,
        requests: Arc<Mutex<Vec<Vec<ModelMessage>>>>,
    }

    impl ScriptedCapability {
        fn new(replies: Vec<Result<String, ModelError>>) -> Self {
            Self {
                status: Availability::Ready,
                replies,
                requests: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl ModelCapability for ScriptedCapability {
        async fn check_availability(&self) -> Availability {
            self.status
        }

        async fn create_session(&self, _options: &SessionOptions) -> Result<Arc<dyn ModelSession>, ModelError> {
            Ok(Arc::new(ScriptedSession {
                replies: Mutex::new(self.replies.clone()),
                requests: Arc::clone(&self.requests),
            }))
        }
    }

    fn pages(n: usize) -> Vec<PageArtifact> {
        (0..n)
            .map(|i| PageArtifact::new(i, 0, format!("p{i}"), None, "image/png", Arc::from(vec![i as u8]), None))
            .collect()
    }

    fn manager(cap: ScriptedCapability) -> SessionManager {
        SessionManager::new(Arc::new(cap), SessionOptions::multimodal(DEFAULT_SYSTEM_PROMPT))
    }

    #[tokio::test]
    async fn clean_reply_resolves_at_stage_one() {
        let cap = ScriptedCapability::new(vec![Ok("```json\n{\"total\": 12}\n```".into())]);
        let requests = Arc::clone(&cap.requests);
        let mgr = manager(cap);
        let config = ExtractionConfig::default();

        let out = extract_structured_data(&mgr, "totals", &pages(2), &config).await.unwrap();
        assert_eq!(out.document, json!({"total": 12}));
        assert_eq!(out.stats.stage, RecoveryStage::Sanitized);
        assert_eq!(out.stats.model_calls, 1);
        assert_eq!(out.stats.page_count, 2);
        assert_eq!(out.stats.usage.map(|u| u.consumed), Some(100));
        assert_eq!(requests.lock().unwrap()[0][0].images().count(), 2);
        assert_eq!(mgr.phase(), SessionPhase::Absent);
    }

    #[tokio::test]
    async fn trailing_comma_resolves_at_stage_two() {
        let mgr = manager(ScriptedCapability::new(vec![Ok("{\"a\":1,}".into())]));
        let out = extract_structured_data(&mgr, "a", &pages(1), &ExtractionConfig::default())
            .await
            .unwrap();
        assert_eq!(out.document, json!({"a": 1}));
        assert_eq!(out.stats.stage, RecoveryStage::SyntaxRepair);
    }

    #[tokio::test]
    async fn model_repair_uses_same_session() {
        let cap = ScriptedCapability::new(vec![
            Ok("no data found".into()),
            Ok("Here is the corrected JSON: {\"a\": null}".into()),
        ]);
        let requests = Arc::clone(&cap.requests);
        let mgr = manager(cap);

        let out = extract_structured_data(&mgr, "a", &pages(1), &ExtractionConfig::default())
            .await
            .unwrap();
        assert_eq!(out.document, json!({"a": null}));
        assert_eq!(out.stats.stage, RecoveryStage::ModelRepair);
        assert_eq!(out.stats.model_calls, 2);

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests[1][0].text().contains("no data found"));
        assert_eq!(requests[1][0].images().count(), 0);
        assert!(!mgr.is_live());
    }

    #[tokio::test]
    async fn failed_model_repair_is_terminal() {
        let mgr = manager(ScriptedCapability::new(vec![
            Ok("{\"a\": [1, 2".into()),
            Ok("still broken {".into()),
        ]));
        let err = extract_structured_data(&mgr, "a", &pages(1), &ExtractionConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Doc2JsonError::UnrecoverableJson { .. }));
        assert!(!mgr.is_live());
    }

    #[tokio::test]
    async fn repair_disabled_stops_after_local_stages() {
        let cap = ScriptedCapability::new(vec![Ok("no data found".into())]);
        let requests = Arc::clone(&cap.requests);
        let mgr = manager(cap);
        let config = ExtractionConfig::builder().model_repair(false).build().unwrap();

        let err = extract_structured_data(&mgr, "a", &pages(1), &config).await.unwrap_err();
        assert!(matches!(err, Doc2JsonError::UnrecoverableJson { .. }));
        assert_eq!(requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_reply_is_terminal_without_repair() {
        let cap = ScriptedCapability::new(vec![Ok("   ".into())]);
        let requests = Arc::clone(&cap.requests);
        let mgr = manager(cap);

        let err = extract_structured_data(&mgr, "a", &pages(1), &ExtractionConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Doc2JsonError::EmptyResponse));
        assert_eq!(requests.lock().unwrap().len(), 1);
        assert!(!mgr.is_live());
    }

    #[tokio::test]
    async fn quota_error_suggests_fewer_pages_and_resets() {
        let mgr = manager(ScriptedCapability::new(vec![Err(ModelError::QuotaExceeded(
            "input too large".into(),
        ))]));
        let err = extract_structured_data(&mgr, "a", &pages(3), &ExtractionConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Doc2JsonError::ModelInputRejected { .. }));
        assert!(err.to_string().contains("fewer pages"));
        assert!(!mgr.is_live());
    }

    #[tokio::test]
    async fn unavailable_capability_fails_fast() {
        let mut cap = ScriptedCapability::new(vec![]);
        cap.status = Availability::Unsupported;
        let requests = Arc::clone(&cap.requests);
        let mgr = manager(cap);

        let err = extract_structured_data(&mgr, "a", &pages(1), &ExtractionConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Doc2JsonError::CapabilityUnavailable { .. }));
        assert!(requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn each_attempt_creates_a_fresh_session() {
        let cap = ScriptedCapability::new(vec![Ok("{}".into())]);
        let requests = Arc::clone(&cap.requests);
        let mgr = manager(cap);
        let config = ExtractionConfig::default();

        // The scripted reply list is per session, so both succeed only if the
        // second attempt got a new session.
        extract_structured_data(&mgr, "a", &pages(1), &config).await.unwrap();
        extract_structured_data(&mgr, "a", &pages(1), &config).await.unwrap();
        assert_eq!(requests.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn progress_reports_stages_and_completion() {
        let (cb, events) = event_channel();
        let config = ExtractionConfig::builder().progress_callback(cb).build().unwrap();
        let mgr = manager(ScriptedCapability::new(vec![Ok("{\"a\":1,}".into())]));

        extract_structured_data(&mgr, "a", &pages(1), &config).await.unwrap();
        drop(config);

        let events: Vec<ProgressEvent> = events.collect().await;
        assert_eq!(
            events,
            vec![
                ProgressEvent::RecoveryStage(RecoveryStage::Sanitized),
                ProgressEvent::RecoveryStage(RecoveryStage::SyntaxRepair),
                ProgressEvent::Completed { success: true },
            ]
        );
    }

    #[tokio::test]
    async fn write_json_is_pretty_and_forces_extension() {
        let dir = tempfile::tempdir().unwrap();
        let written = write_json(dir.path().join("out/result.txt"), &json!({"a": [1, 2]}))
            .await
            .unwrap();
        assert_eq!(written.extension().unwrap(), "json");

        let text = std::fs::read_to_string(&written).unwrap();
        assert!(text.ends_with("}\n"));
        assert!(text.contains("\n  \"a\": ["));
        assert!(!written.with_extension("json.tmp").exists());
    }
}
