//! Progress-callback trait for pipeline stage events.
//!
//! Inject an [`Arc<dyn PipelineObserver>`] via
//! [`crate::config::SettingsBuilder::progress_callback`] to hear about each
//! stage as the run moves through it. The library never prints; the CLI uses
//! this hook to drive its spinner.
//!
//! # Example
//!
//! ```rust
//! use hsds_extract::{PipelineObserver, Settings, Stage};
//! use std::sync::{Arc, Mutex};
//!
//! #[derive(Default)]
//! struct Recorder {
//!     stages: Mutex<Vec<Stage>>,
//! }
//!
//! impl PipelineObserver for Recorder {
//!     fn on_stage_complete(&self, stage: Stage, _elapsed_ms: u64) {
//!         self.stages.lock().unwrap().push(stage);
//!     }
//! }
//!
//! let settings = Settings::builder()
//!     .progress_callback(Arc::new(Recorder::default()))
//!     .build()
//!     .unwrap();
//! ```

use std::fmt;
use std::sync::Arc;

/// One step of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    LoadMedia,
    Ocr,
    Extract,
    Persist,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::LoadMedia => "Loading image",
            Stage::Ocr => "Running OCR",
            Stage::Extract => "Extracting HSDS data",
            Stage::Persist => "Saving outputs",
        })
    }
}

/// Where a run currently is.
///
/// ```text
/// Idle → MediaLoaded → (OcrComplete) → Extracted → Persisted
///   └──────────┴─────────────┴─────────────┴──→ Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    Idle,
    MediaLoaded,
    OcrComplete,
    Extracted,
    Persisted,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Persisted | PipelineState::Failed)
    }
}

/// Called by the orchestrator around every stage.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Stages run strictly one after another, but the
/// trait is `Send + Sync` so an observer can be shared with other tasks.
pub trait PipelineObserver: Send + Sync {
    /// Called right before a stage starts.
    fn on_stage_start(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called when a stage finished successfully.
    fn on_stage_complete(&self, stage: Stage, elapsed_ms: u64) {
        let _ = (stage, elapsed_ms);
    }

    /// Called when a stage failed. The run stops after this.
    fn on_stage_error(&self, stage: Stage, error: &str) {
        let _ = (stage, error);
    }

    /// Called on every state transition.
    fn on_transition(&self, from: PipelineState, to: PipelineState) {
        let _ = (from, to);
    }

    /// Called once the OCR text is on disk, before extraction starts.
    fn on_ocr_saved(&self, path: &std::path::Path, chars: usize) {
        let _ = (path, chars);
    }
}

/// Shared observer handle stored in [`crate::config::Settings`].
pub type ProgressCallback = Arc<dyn PipelineObserver>;

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}
