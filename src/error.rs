//! Error types for the hsds-extract library.
//!
//! Every stage either returns a fully valid value or fails with one
//! [`HsdsError`]. There is no page-level or field-level partial result: a
//! flyer either yields a schema-valid record or the run stops.
//!
//! The variants group into the failure classes an operator cares about:
//!
//! * input: [`HsdsError::NotFound`], [`HsdsError::ReadFailed`]
//! * configuration: [`HsdsError::Configuration`], [`HsdsError::InvalidConfig`]
//! * OCR: [`HsdsError::OcrFailed`]
//! * extraction: [`HsdsError::SchemaValidation`], [`HsdsError::ExtractionFailed`]
//! * persistence: [`HsdsError::OutputWriteFailed`]
//! * interrupt: [`HsdsError::Cancelled`]

use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the hsds-extract library.
#[derive(Debug, Error)]
pub enum HsdsError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input image was not found at the given path.
    #[error("Image file not found: '{path}'\nCheck the path exists and is readable.")]
    NotFound { path: PathBuf },

    /// The file exists but could not be read.
    #[error("Failed to read image '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// The extraction provider is missing its credential or endpoint.
    #[error("Extraction provider '{provider}' is not configured.\n{hint}")]
    Configuration { provider: String, hint: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── OCR errors ────────────────────────────────────────────────────────
    /// The OCR inference call failed.
    #[error("OCR failed at '{endpoint}': {detail}")]
    OcrFailed { endpoint: String, detail: String },

    // ── Extraction errors ─────────────────────────────────────────────────
    /// The model answered, but the answer does not conform to the schema.
    #[error("Extraction output does not match the HSDS schema: {detail}\nResponse starts with: {excerpt:?}")]
    SchemaValidation { detail: String, excerpt: String },

    /// The extraction call itself failed (network, auth, provider error).
    #[error("Extraction call to '{provider}' failed: {message}")]
    ExtractionFailed { provider: String, message: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output artifact.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Interrupt ─────────────────────────────────────────────────────────
    /// The user interrupted a blocking stage.
    #[error("Cancelled by user")]
    Cancelled,
}

impl HsdsError {
    /// True for [`HsdsError::Cancelled`], which takes the quiet exit path.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, HsdsError::Cancelled)
    }

    /// True for failures that happen after a record was already extracted.
    pub fn is_persistence(&self) -> bool {
        matches!(self, HsdsError::OutputWriteFailed { .. })
    }
}
