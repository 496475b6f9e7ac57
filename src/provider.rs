//! [`ModelCapability`] backed by an `edgequake-llm` vision provider.
//!
//! This is the only module that speaks the provider's message types. The
//! provider itself is stateless, so the "session" is local state: the system
//! instruction, completion options, the running token count and a destroyed
//! flag.

use crate::config::ExtractionConfig;
use crate::error::{Doc2JsonError, ModelError};
use crate::pipeline::request::{MessagePart, ModelMessage, Role};
use crate::session::{Availability, ModelCapability, ModelSession, SessionOptions, SessionUsage};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Model used when the caller names a provider but no model.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Capability over a resolved provider. `None` reports
/// [`Availability::Unavailable`].
#[derive(Clone)]
pub struct LlmCapability {
    provider: Option<Arc<dyn LLMProvider>>,
    unresolved_reason: Option<String>,
    options: Arc<CompletionOptions>,
    quota: u64,
}

impl fmt::Debug for LlmCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmCapability")
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("unresolved_reason", &self.unresolved_reason)
            .field("quota", &self.quota)
            .finish()
    }
}

impl LlmCapability {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ExtractionConfig) -> Self {
        Self {
            provider: Some(provider),
            unresolved_reason: None,
            options: Arc::new(build_options(config)),
            quota: config.session_token_quota,
        }
    }

    /// Resolve a provider from the config and environment. Failure to
    /// resolve is not an error here; it surfaces as an `Unavailable` probe.
    pub fn from_config(config: &ExtractionConfig) -> Self {
        match resolve_provider(config) {
            Ok(provider) => Self::new(provider, config),
            Err(e) => {
                warn!("No model provider resolved: {}", e);
                Self {
                    provider: None,
                    unresolved_reason: Some(e.to_string()),
                    options: Arc::new(build_options(config)),
                    quota: config.session_token_quota,
                }
            }
        }
    }
}

#[async_trait]
impl ModelCapability for LlmCapability {
    async fn check_availability(&self) -> Availability {
        if self.provider.is_some() {
            Availability::Ready
        } else {
            Availability::Unavailable
        }
    }

    async fn create_session(&self, options: &SessionOptions) -> Result<Arc<dyn ModelSession>, ModelError> {
        let provider = self.provider.as_ref().ok_or_else(|| {
            ModelError::Other(
                self.unresolved_reason
                    .clone()
                    .unwrap_or_else(|| "no provider".to_string()),
            )
        })?;
        Ok(Arc::new(LlmSession {
            provider: Arc::clone(provider),
            system_instruction: options.system_instruction.clone(),
            options: Arc::clone(&self.options),
            quota: self.quota,
            consumed: Mutex::new(0),
            destroyed: AtomicBool::new(false),
        }))
    }
}

/// One conversation with the provider.
pub struct LlmSession {
    provider: Arc<dyn LLMProvider>,
    system_instruction: String,
    options: Arc<CompletionOptions>,
    quota: u64,
    consumed: Mutex<u64>,
    destroyed: AtomicBool,
}

impl fmt::Debug for LlmSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmSession")
            .field("usage", &self.usage())
            .field("destroyed", &self.destroyed.load(Ordering::SeqCst))
            .finish()
    }
}

impl LlmSession {
    fn consumed(&self) -> u64 {
        *self.consumed.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// The system instruction followed by the caller's messages.
    fn transcript(&self, messages: &[ModelMessage]) -> Vec<ModelMessage> {
        let mut all = Vec::with_capacity(messages.len() + 1);
        all.push(ModelMessage::system(self.system_instruction.clone()));
        all.extend_from_slice(messages);
        all
    }
}

#[async_trait]
impl ModelSession for LlmSession {
    async fn prompt(&self, messages: &[ModelMessage]) -> Result<String, ModelError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(ModelError::Other("session was destroyed".into()));
        }
        if self.consumed() >= self.quota {
            return Err(ModelError::QuotaExceeded(format!(
                "session token quota of {} is used up",
                self.quota
            )));
        }

        let chat: Vec<ChatMessage> = self.transcript(messages).iter().map(to_chat_message).collect();

        let response = self
            .provider
            .chat(&chat, Some(self.options.as_ref()))
            .await
            .map_err(|e| classify_provider_error(&e.to_string()))?;

        let used = (response.prompt_tokens + response.completion_tokens) as u64;
        *self.consumed.lock().unwrap_or_else(|p| p.into_inner()) += used;
        debug!(
            "{} input tokens, {} output tokens",
            response.prompt_tokens, response.completion_tokens
        );

        Ok(response.content)
    }

    fn usage(&self) -> SessionUsage {
        SessionUsage::new(self.consumed(), self.quota)
    }

    async fn fork(&self) -> Result<Arc<dyn ModelSession>, ModelError> {
        Ok(Arc::new(LlmSession {
            provider: Arc::clone(&self.provider),
            system_instruction: self.system_instruction.clone(),
            options: Arc::clone(&self.options),
            quota: self.quota,
            consumed: Mutex::new(self.consumed()),
            destroyed: AtomicBool::new(false),
        }))
    }

    async fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
    }
}

// ── Internal helpers ─────────────────────────────────────────────────────────

fn to_chat_message(message: &ModelMessage) -> ChatMessage {
    let text = message.text();
    match message.role {
        Role::System => ChatMessage::system(&text),
        Role::User => {
            let images: Vec<ImageData> = message
                .parts
                .iter()
                .filter_map(|p| match p {
                    MessagePart::Image(img) => {
                        Some(ImageData::new(img.data.clone(), img.mime_type.clone()).with_detail("high"))
                    }
                    MessagePart::Text(_) => None,
                })
                .collect();
            if images.is_empty() {
                ChatMessage::user(&text)
            } else {
                ChatMessage::user_with_images(&text, images)
            }
        }
    }
}

/// Map a provider failure onto the model error taxonomy by its message.
fn classify_provider_error(message: &str) -> ModelError {
    let lower = message.to_lowercase();
    if ["context length", "context window", "too large", "too long", "quota", "maximum tokens", "token limit"]
        .iter()
        .any(|needle| lower.contains(needle))
    {
        ModelError::QuotaExceeded(message.to_string())
    } else if ["image", "unsupported", "invalid content"]
        .iter()
        .any(|needle| lower.contains(needle))
    {
        ModelError::UnsupportedInput(message.to_string())
    } else {
        ModelError::Other(message.to_string())
    }
}

fn build_options(config: &ExtractionConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

fn create_vision_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, Doc2JsonError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        Doc2JsonError::CapabilityUnavailable {
            status: format!("provider '{provider_name}' could not be created"),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the provider, from most-specific to least-specific:
///
/// 1. `config.provider`, used as-is.
/// 2. `config.provider_name` with `config.model` (or [`DEFAULT_MODEL`]).
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, when both are set.
/// 4. OpenAI when `OPENAI_API_KEY` is set.
/// 5. [`ProviderFactory::from_env`] auto-detection.
pub fn resolve_provider(config: &ExtractionConfig) -> Result<Arc<dyn LLMProvider>, Doc2JsonError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| Doc2JsonError::CapabilityUnavailable {
            status: Availability::Unavailable.to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
