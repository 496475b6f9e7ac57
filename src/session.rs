//! Model session lifecycle.
//!
//! The external model is reached through two traits: [`ModelCapability`]
//! (availability probe + session factory) and [`ModelSession`] (a live,
//! stateful conversation handle). [`SessionManager`] owns at most one live
//! handle and moves through three phases:
//!
//! ```text
//!            acquire()                  ok
//!   Absent ───────────▶ Creating ───────────────▶ Ready ──┐
//!     ▲                    │ unavailable / error           │ acquire() reuses
//!     │                    ▼                               │
//!     └──────────────── Absent ◀──────── reset() ──────────┘
//! ```
//!
//! Creation is lazy and serialised: a second `acquire()` that arrives while
//! the first is still creating waits and then reuses the same handle.
//! Every extraction attempt ends with [`SessionManager::reset`], which
//! destroys the handle so the next attempt starts from a clean context.

use crate::error::{Doc2JsonError, ModelError};
use crate::pipeline::request::ModelMessage;
use crate::progress::ProgressCallback;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// What the capability reports about model readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Ready,
    Downloadable,
    Downloading,
    Unavailable,
    Unsupported,
    Error,
}

impl Availability {
    /// Whether a session may be created in this state. A downloadable or
    /// downloading model becomes usable once creation completes.
    pub fn permits_session(self) -> bool {
        matches!(
            self,
            Availability::Ready | Availability::Downloadable | Availability::Downloading
        )
    }

    fn hint(self) -> &'static str {
        match self {
            Availability::Unavailable => {
                "No model is configured. Set OPENAI_API_KEY, ANTHROPIC_API_KEY, GEMINI_API_KEY, or pass --provider."
            }
            Availability::Unsupported => "This environment cannot run the model.",
            _ => "The model did not report a usable state; try again shortly.",
        }
    }
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Availability::Ready => "ready",
            Availability::Downloadable => "downloadable",
            Availability::Downloading => "downloading",
            Availability::Unavailable => "unavailable",
            Availability::Unsupported => "unsupported",
            Availability::Error => "error",
        };
        f.write_str(s)
    }
}

/// Input/output kinds declared when creating a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Text,
    Image,
}

/// Everything a capability needs to open a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    pub system_instruction: String,
    pub inputs: Vec<Modality>,
    pub outputs: Vec<Modality>,
}

impl SessionOptions {
    /// Text+image in, text out.
    pub fn multimodal(system_instruction: impl Into<String>) -> Self {
        Self {
            system_instruction: system_instruction.into(),
            inputs: vec![Modality::Text, Modality::Image],
            outputs: vec![Modality::Text],
        }
    }
}

/// Consumed vs. available session capacity, in tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionUsage {
    pub consumed: u64,
    pub quota: u64,
    pub percent_used: f64,
}

impl SessionUsage {
    pub fn new(consumed: u64, quota: u64) -> Self {
        let percent_used = if quota == 0 {
            100.0
        } else {
            (consumed as f64 / quota as f64) * 100.0
        };
        Self {
            consumed,
            quota,
            percent_used,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.quota.saturating_sub(self.consumed)
    }
}

/// Availability probe and session factory for an external model.
#[async_trait]
pub trait ModelCapability: Send + Sync {
    async fn check_availability(&self) -> Availability;

    async fn create_session(&self, options: &SessionOptions) -> Result<Arc<dyn ModelSession>, ModelError>;
}

/// A live conversation with the model.
#[async_trait]
pub trait ModelSession: Send + Sync {
    /// Send an ordered message sequence and return the model's text.
    async fn prompt(&self, messages: &[ModelMessage]) -> Result<String, ModelError>;

    /// Current usage of this session.
    fn usage(&self) -> SessionUsage;

    /// An independent copy of this session. Not used by the extraction path.
    async fn fork(&self) -> Result<Arc<dyn ModelSession>, ModelError>;

    /// Release the session. Further prompts fail.
    async fn destroy(&self);
}

/// Observable lifecycle phase of a [`SessionManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Absent,
    Creating,
    Ready,
}

enum SessionState {
    Absent,
    Creating,
    Ready(Arc<dyn ModelSession>),
}

/// Owns the single live model session.
pub struct SessionManager {
    capability: Arc<dyn ModelCapability>,
    options: SessionOptions,
    probe_timeout: Duration,
    progress: Option<ProgressCallback>,
    state: Mutex<SessionState>,
    creation: tokio::sync::Mutex<()>,
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("phase", &self.phase())
            .field("probe_timeout", &self.probe_timeout)
            .finish()
    }
}

impl SessionManager {
    pub fn new(capability: Arc<dyn ModelCapability>, options: SessionOptions) -> Self {
        Self {
            capability,
            options,
            probe_timeout: Duration::from_secs(5),
            progress: None,
            state: Mutex::new(SessionState::Absent),
            creation: tokio::sync::Mutex::new(()),
        }
    }

    /// Ceiling on the availability probe.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_progress(mut self, progress: Option<ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn phase(&self) -> SessionPhase {
        match &*self.lock_state() {
            SessionState::Absent => SessionPhase::Absent,
            SessionState::Creating => SessionPhase::Creating,
            SessionState::Ready(_) => SessionPhase::Ready,
        }
    }

    /// `true` while a handle exists.
    pub fn is_live(&self) -> bool {
        self.phase() == SessionPhase::Ready
    }

    /// Usage of the live session, or `None` when there is none.
    pub fn usage_snapshot(&self) -> Option<SessionUsage> {
        match &*self.lock_state() {
            SessionState::Ready(handle) => Some(handle.usage()),
            _ => None,
        }
    }

    /// Return the live handle, creating it first if needed.
    pub async fn acquire(&self) -> Result<Arc<dyn ModelSession>, Doc2JsonError> {
        let _creation = self.creation.lock().await;

        if let SessionState::Ready(handle) = &*self.lock_state() {
            debug!("Reusing live model session");
            return Ok(Arc::clone(handle));
        }

        *self.lock_state() = SessionState::Creating;
        match self.create().await {
            Ok(handle) => {
                *self.lock_state() = SessionState::Ready(Arc::clone(&handle));
                info!("Model session created");
                Ok(handle)
            }
            Err(e) => {
                *self.lock_state() = SessionState::Absent;
                Err(e)
            }
        }
    }

    async fn create(&self) -> Result<Arc<dyn ModelSession>, Doc2JsonError> {
        let status = match tokio::time::timeout(self.probe_timeout, self.capability.check_availability()).await {
            Ok(status) => status,
            Err(_) => {
                warn!("Availability probe timed out after {:?}", self.probe_timeout);
                if let Some(ref cb) = self.progress {
                    cb.on_availability(Availability::Error);
                }
                return Err(Doc2JsonError::CapabilityUnavailable {
                    status: format!("no answer within {:?}", self.probe_timeout),
                    hint: Availability::Error.hint().to_string(),
                });
            }
        };

        if let Some(ref cb) = self.progress {
            cb.on_availability(status);
        }
        debug!("Model availability: {}", status);

        if !status.permits_session() {
            return Err(Doc2JsonError::CapabilityUnavailable {
                status: status.to_string(),
                hint: status.hint().to_string(),
            });
        }

        self.capability
            .create_session(&self.options)
            .await
            .map_err(|e| Doc2JsonError::SessionCreationFailed {
                detail: e.to_string(),
            })
    }

    /// Destroy and clear the live handle, if any.
    pub async fn reset(&self) {
        let previous = std::mem::replace(&mut *self.lock_state(), SessionState::Absent);
        if let SessionState::Ready(handle) = previous {
            handle.destroy().await;
            debug!("Model session destroyed");
        }
    }
}
