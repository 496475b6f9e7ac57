//! Progress-callback trait for extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to observe
//! files being classified, pages being rendered, the availability probe and
//! the recovery stages. Nothing in the pipeline depends on what the callback
//! does with these events.
//!
//! Callers who prefer a stream over a callback can use [`event_channel`],
//! which returns a ready-made callback plus a [`ProgressEventStream`].
//!
//! # Example
//!
//! ```rust
//! use edgequake_doc2json::{ExtractionConfig, ExtractionProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct PageCounter(AtomicUsize);
//!
//! impl ExtractionProgressCallback for PageCounter {
//!     fn on_page_ready(&self, label: &str, ordinal: usize, budget: usize) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{}/{}: {}", ordinal + 1, budget, label);
//!     }
//! }
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(Arc::new(PageCounter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use crate::output::RecoveryStage;
use crate::session::Availability;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;

/// Called by the pipeline as it works. All methods default to no-ops so
/// implementors only override what they care about.
pub trait ExtractionProgressCallback: Send + Sync {
    /// A file is about to be classified.
    ///
    /// # Arguments
    /// * `index` — 0-based position of the file in the upload
    /// * `name`  — file name as uploaded
    fn on_file_start(&self, index: usize, name: &str) {
        let _ = (index, name);
    }

    /// A file was skipped (unsupported type, empty, oversized).
    fn on_file_skipped(&self, name: &str, reason: &str) {
        let _ = (name, reason);
    }

    /// A page artifact was admitted to the sequence.
    ///
    /// # Arguments
    /// * `label`   — human-readable page label
    /// * `ordinal` — 0-based position in the overall sequence
    /// * `budget`  — configured page budget
    fn on_page_ready(&self, label: &str, ordinal: usize, budget: usize) {
        let _ = (label, ordinal, budget);
    }

    /// The availability probe answered (or timed out, reported as `Error`).
    fn on_availability(&self, status: Availability) {
        let _ = status;
    }

    /// A recovery stage is about to run.
    fn on_recovery_stage(&self, stage: RecoveryStage) {
        let _ = stage;
    }

    /// The extraction attempt finished and the session was reset.
    fn on_extraction_complete(&self, success: bool) {
        let _ = success;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;

/// One progress event, as delivered by [`event_channel`].
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    FileStarted { index: usize, name: String },
    FileSkipped { name: String, reason: String },
    PageReady { label: String, ordinal: usize, budget: usize },
    Availability(Availability),
    RecoveryStage(RecoveryStage),
    Completed { success: bool },
}

/// A boxed stream of progress events.
pub type ProgressEventStream = Pin<Box<dyn Stream<Item = ProgressEvent> + Send>>;

/// Callback that forwards every event into an unbounded channel.
pub struct ChannelProgress {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelProgress {
    fn send(&self, event: ProgressEvent) {
        // A dropped receiver just means nobody is listening.
        let _ = self.tx.send(event);
    }
}

impl ExtractionProgressCallback for ChannelProgress {
    fn on_file_start(&self, index: usize, name: &str) {
        self.send(ProgressEvent::FileStarted {
            index,
            name: name.to_string(),
        });
    }

    fn on_file_skipped(&self, name: &str, reason: &str) {
        self.send(ProgressEvent::FileSkipped {
            name: name.to_string(),
            reason: reason.to_string(),
        });
    }

    fn on_page_ready(&self, label: &str, ordinal: usize, budget: usize) {
        self.send(ProgressEvent::PageReady {
            label: label.to_string(),
            ordinal,
            budget,
        });
    }

    fn on_availability(&self, status: Availability) {
        self.send(ProgressEvent::Availability(status));
    }

    fn on_recovery_stage(&self, stage: RecoveryStage) {
        self.send(ProgressEvent::RecoveryStage(stage));
    }

    fn on_extraction_complete(&self, success: bool) {
        self.send(ProgressEvent::Completed { success });
    }
}

/// Create a callback/stream pair. Install the callback in the config and
/// consume events from the stream; the stream ends once every clone of the
/// callback has been dropped.
pub fn event_channel() -> (ProgressCallback, ProgressEventStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    let cb: ProgressCallback = Arc::new(ChannelProgress { tx });
    (cb, Box::pin(UnboundedReceiverStream::new(rx)))
}
