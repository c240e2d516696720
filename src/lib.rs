//! # hsds-extract
//!
//! Turn a photo of a community-services flyer into a structured,
//! HSDS-style record (organization, services, schedules, phones, locations,
//! addresses) using OCR and large language models.
//!
//! ## Pipeline Overview
//!
//! ```text
//! flyer image
//!  │
//!  ├─ 1. Load     read + base64-encode, media type from the extension
//!  ├─ 2. OCR      DeepSeek-OCR server → markdown text   (ocr-then-text only)
//!  ├─ 3. Extract  one LLM call → JSON → StructuredRecord (validation gate)
//!  └─ 4. Report   console summary + indented JSON file (+ OCR text file)
//! ```
//!
//! Two strategies share the same orchestrator:
//!
//! | Strategy        | Stage 1 | Stage 2 | Default provider |
//! |-----------------|---------|---------|------------------|
//! | `direct`        | image → vision LLM | | `openai` |
//! | `ocr-then-text` | image → DeepSeek-OCR | text → local LLM | `ollama` |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hsds_extract::{render_summary, Pipeline, Settings, Strategy};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = Settings::builder()
//!         .strategy(Strategy::OcrThenText)
//!         .build()?;
//!     let pipeline = Pipeline::from_settings(settings)?;
//!     let output = pipeline.run("flyer.jpg").await?.into_result()?;
//!     print!("{}", render_summary(&output.record));
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `hsds-extract` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod check;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod schema;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use check::{verify_setup, CheckResult, CheckStatus, SetupReport};
pub use config::{OcrPreset, OcrSettings, Settings, SettingsBuilder, Strategy};
pub use error::HsdsError;
pub use orchestrator::{ocr_result_path, run_ocr_only, OcrOnlyOutput, Pipeline, RunOutput, RunStats};
pub use pipeline::extract::{parse_record, ExtractionModel, Extractor};
pub use pipeline::ocr::{Device, HttpOcrEngine, OcrEngine, OcrRequest, OcrText};
pub use pipeline::report::{render_summary, save_json, save_ocr_text};
pub use progress::{NoopObserver, PipelineObserver, PipelineState, ProgressCallback, Stage};
pub use schema::StructuredRecord;
