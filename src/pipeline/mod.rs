//! Pipeline stages for flyer extraction.
//!
//! Each submodule implements exactly one step, so each can be tested alone
//! and swapped without touching the others (e.g. a different OCR server).
//!
//! ## Data Flow
//!
//! ```text
//! media ──▶ (ocr) ──▶ extract ──▶ report
//! (base64)  (markdown) (LLM + schema gate) (summary, JSON)
//! ```
//!
//! 1. [`media`]: resolve the image path, pick a media type, base64-encode
//! 2. [`ocr`]: image → markdown via an OCR server (two-stage only)
//! 3. [`extract`]: prompt the model and validate its answer against the
//!    schema; the only stage that talks to an LLM
//! 4. [`report`]: render the operator summary and write artifacts

pub mod extract;
pub mod media;
pub mod ocr;
pub mod report;
