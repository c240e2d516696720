//! OCR stage: flyer image → raw markdown text.
//!
//! The OCR model (DeepSeek-OCR) runs out of process behind an HTTP endpoint.
//! This module picks the inference knobs from an [`OcrPreset`], picks a
//! compute device hint, sends one request, and hands back the text exactly as
//! the model produced it. There is no post-processing and no retry: a failed
//! OCR call is expensive enough that deciding to try again is left to the
//! operator.
//!
//! ## Wire format
//!
//! ```text
//! POST {endpoint}
//! { "model", "prompt", "image" (base64), "mime_type",
//!   "base_size", "image_size", "crop_mode", "device" }
//! → 200 { "text": "..." }
//! ```

use crate::config::{OcrPreset, OcrSettings};
use crate::error::HsdsError;
use crate::pipeline::media::EncodedImage;
use crate::prompts::OCR_PROMPT;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Compute device the OCR server should run on.
///
/// Only affects speed; the text produced is the same on every device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    /// Dedicated NVIDIA accelerator.
    Cuda,
    /// Apple Silicon integrated GPU.
    #[serde(rename = "mps")]
    Metal,
    Cpu,
}

impl Device {
    /// Priority order: dedicated accelerator, integrated accelerator, CPU.
    pub fn select(dedicated: bool, integrated: bool) -> Device {
        if dedicated {
            Device::Cuda
        } else if integrated {
            Device::Metal
        } else {
            Device::Cpu
        }
    }

    /// Probe the local machine.
    pub fn detect() -> Device {
        let dedicated = std::env::var("CUDA_VISIBLE_DEVICES")
            .map(|v| !v.trim().is_empty() && v.trim() != "-1")
            .unwrap_or(false)
            || Path::new("/dev/nvidia0").exists();
        let integrated = cfg!(all(target_os = "macos", target_arch = "aarch64"));
        Device::select(dedicated, integrated)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Device::Cuda => "cuda",
            Device::Metal => "mps",
            Device::Cpu => "cpu",
        }
    }

    /// Human-readable name for logs and the setup check.
    pub fn label(self) -> &'static str {
        match self {
            Device::Cuda => "CUDA GPU",
            Device::Metal => "Apple Metal (MPS)",
            Device::Cpu => "CPU",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw text produced by the OCR stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcrText(String);

impl OcrText {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Length in characters, not bytes.
    pub fn char_count(&self) -> usize {
        self.0.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

/// Everything an OCR backend needs for one call.
#[derive(Debug, Clone, Copy)]
pub struct OcrRequest<'a> {
    pub image: &'a EncodedImage,
    pub prompt: &'a str,
    pub model: &'a str,
    pub settings: OcrSettings,
    pub device: Device,
}

/// An OCR capability.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Where requests go, for logs and error messages.
    fn endpoint(&self) -> &str;

    /// Run OCR and return the model's text unmodified.
    async fn recognize(&self, request: &OcrRequest<'_>) -> Result<String, HsdsError>;
}

/// OCR backend talking JSON over HTTP.
#[derive(Debug, Clone)]
pub struct HttpOcrEngine {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Debug, Serialize)]
struct OcrPayload<'a> {
    model: &'a str,
    prompt: &'a str,
    image: &'a str,
    mime_type: &'a str,
    base_size: u32,
    image_size: u32,
    crop_mode: bool,
    device: Device,
}

impl<'a> From<&OcrRequest<'a>> for OcrPayload<'a> {
    fn from(req: &OcrRequest<'a>) -> Self {
        let image: &'a EncodedImage = req.image;
        OcrPayload {
            model: req.model,
            prompt: req.prompt,
            image: &image.data,
            mime_type: image.media_type,
            base_size: req.settings.base_size,
            image_size: req.settings.image_size,
            crop_mode: req.settings.crop_mode,
            device: req.device,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OcrResponse {
    text: String,
}

impl HttpOcrEngine {
    pub fn new(endpoint: impl Into<String>, timeout_secs: u64) -> Result<Self, HsdsError> {
        let endpoint = endpoint.into();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| HsdsError::OcrFailed {
                endpoint: endpoint.clone(),
                detail: format!("could not build HTTP client: {e}"),
            })?;
        Ok(Self { client, endpoint })
    }

    fn fail(&self, detail: impl Into<String>) -> HsdsError {
        HsdsError::OcrFailed {
            endpoint: self.endpoint.clone(),
            detail: detail.into(),
        }
    }
}

#[async_trait]
impl OcrEngine for HttpOcrEngine {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn recognize(&self, request: &OcrRequest<'_>) -> Result<String, HsdsError> {
        let payload = OcrPayload::from(request);
        let response = self
            .client
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    self.fail(format!("request timed out: {e}"))
                } else {
                    self.fail(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let excerpt: String = body.chars().take(200).collect();
            return Err(self.fail(format!("HTTP {status}: {excerpt}")));
        }

        let parsed: OcrResponse = response
            .json()
            .await
            .map_err(|e| self.fail(format!("unreadable response body: {e}")))?;
        Ok(parsed.text)
    }
}

/// Run the OCR stage for one image.
///
/// # Errors
/// Any backend failure, surfaced as [`HsdsError::OcrFailed`].
pub async fn run_ocr(
    engine: &dyn OcrEngine,
    image: &EncodedImage,
    preset: OcrPreset,
    model: &str,
) -> Result<OcrText, HsdsError> {
    let settings = preset.settings();
    let device = Device::detect();
    info!(
        "OCR preset '{}': base_size={}, image_size={}, crop_mode={}, device={} ({})",
        preset,
        settings.base_size,
        settings.image_size,
        settings.crop_mode,
        device,
        device.label()
    );

    let request = OcrRequest {
        image,
        prompt: OCR_PROMPT,
        model,
        settings,
        device,
    };

    let start = Instant::now();
    let text = engine.recognize(&request).await.map_err(|e| match e {
        e @ HsdsError::OcrFailed { .. } => e,
        other => HsdsError::OcrFailed {
            endpoint: engine.endpoint().to_string(),
            detail: other.to_string(),
        },
    })?;
    let text = OcrText::new(text);

    info!(
        "OCR completed in {:.1}s ({} characters)",
        start.elapsed().as_secs_f64(),
        text.char_count()
    );
    debug!(
        "OCR text starts with: {:?}",
        text.as_str().chars().take(120).collect::<String>()
    );
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn sample_image() -> EncodedImage {
        EncodedImage {
            path: "/tmp/flyer.jpg".into(),
            media_type: "image/jpeg",
            data: "QUJD".into(),
            byte_len: 3,
        }
    }

    #[derive(Default)]
    struct RecordingEngine {
        seen: Mutex<Option<(OcrSettings, String)>>,
    }

    #[async_trait]
    impl OcrEngine for RecordingEngine {
        fn endpoint(&self) -> &str {
            "test://ocr"
        }

        async fn recognize(&self, request: &OcrRequest<'_>) -> Result<String, HsdsError> {
            *self.seen.lock().unwrap() = Some((request.settings, request.prompt.to_string()));
            Ok("  # Flyer\n\nraw text  ".to_string())
        }
    }

    struct FailingEngine;

    #[async_trait]
    impl OcrEngine for FailingEngine {
        fn endpoint(&self) -> &str {
            "test://down"
        }

        async fn recognize(&self, _request: &OcrRequest<'_>) -> Result<String, HsdsError> {
            Err(HsdsError::InvalidConfig("model crashed".into()))
        }
    }

    #[test]
    fn device_priority() {
        assert_eq!(Device::select(true, true), Device::Cuda);
        assert_eq!(Device::select(false, true), Device::Metal);
        assert_eq!(Device::select(false, false), Device::Cpu);
    }

    #[test]
    fn payload_carries_preset_knobs() {
        let image = sample_image();
        let req = OcrRequest {
            image: &image,
            prompt: OCR_PROMPT,
            model: "deepseek-ai/DeepSeek-OCR",
            settings: OcrPreset::Gundam.settings(),
            device: Device::Metal,
        };
        let json = serde_json::to_value(OcrPayload::from(&req)).unwrap();
        assert_eq!(json["base_size"], 1024);
        assert_eq!(json["image_size"], 640);
        assert_eq!(json["crop_mode"], true);
        assert_eq!(json["device"], "mps");
        assert_eq!(json["image"], "QUJD");
        assert_eq!(json["mime_type"], "image/jpeg");
    }

    #[tokio::test]
    async fn run_ocr_returns_text_unmodified() {
        let engine = RecordingEngine::default();
        let text = run_ocr(&engine, &sample_image(), OcrPreset::Small, "m")
            .await
            .unwrap();
        assert_eq!(text.as_str(), "  # Flyer\n\nraw text  ");

        let (settings, prompt) = engine.seen.lock().unwrap().clone().unwrap();
        assert_eq!(settings, OcrPreset::Small.settings());
        assert_eq!(prompt, OCR_PROMPT);
    }

    #[tokio::test]
    async fn backend_errors_become_ocr_failures() {
        let err = run_ocr(&FailingEngine, &sample_image(), OcrPreset::Tiny, "m")
            .await
            .unwrap_err();
        match err {
            HsdsError::OcrFailed { endpoint, detail } => {
                assert_eq!(endpoint, "test://down");
                assert!(detail.contains("model crashed"));
            }
            other => panic!("expected OcrFailed, got {other:?}"),
        }
    }

    #[test]
    fn ocr_text_helpers() {
        let t = OcrText::new("héllo");
        assert_eq!(t.char_count(), 5);
        assert!(!t.is_empty());
        assert!(OcrText::new(" \n").is_empty());
    }
}
