//! Configuration types for flyer extraction.
//!
//! Everything a run needs lives in one [`Settings`] value, built once at
//! process start through [`SettingsBuilder`] and passed by reference to every
//! stage. The extraction credential is captured here too, so whether a run
//! can reach its model is decided before any file is read or request sent.

use crate::error::HsdsError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::warn;

/// Default flyer image used when no path is given.
pub const DEFAULT_IMAGE_PATH: &str = "./images/20251020_100526.jpg";
/// Default location of the serialised record.
pub const DEFAULT_JSON_OUTPUT: &str = "./hsds_outputs/extracted_hsds_data.json";
/// Default location of the raw OCR text (two-stage only).
pub const DEFAULT_OCR_OUTPUT: &str = "./hsds_outputs/ocr_output.txt";
/// Default DeepSeek-OCR inference endpoint.
pub const DEFAULT_OCR_ENDPOINT: &str = "http://localhost:8000/v1/ocr";
/// Default OCR model identifier sent to the endpoint.
pub const DEFAULT_OCR_MODEL: &str = "deepseek-ai/DeepSeek-OCR";
/// Default Ollama API root.
pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";

/// Configuration for one extraction run.
///
/// # Example
/// ```rust
/// use hsds_extract::{OcrPreset, Settings, Strategy};
///
/// let settings = Settings::builder()
///     .strategy(Strategy::OcrThenText)
///     .ocr_preset(OcrPreset::Small)
///     .build()
///     .unwrap();
/// assert_eq!(settings.provider_name(), "ollama");
/// ```
#[derive(Clone)]
pub struct Settings {
    /// Single-stage vision extraction or OCR followed by text extraction.
    pub strategy: Strategy,

    /// OCR quality/speed preset. Only used by [`Strategy::OcrThenText`].
    pub ocr_preset: OcrPreset,

    /// URL of the OCR inference server.
    pub ocr_endpoint: String,

    /// Model identifier forwarded to the OCR server.
    pub ocr_model: String,

    /// Timeout for one OCR request, in seconds. Default: 600.
    ///
    /// Crop mode on a CPU can take minutes for a single flyer.
    pub ocr_timeout_secs: u64,

    /// Extraction provider (e.g. "openai", "anthropic", "ollama").
    /// If None, chosen by [`Strategy::default_provider`].
    pub provider_name: Option<String>,

    /// Extraction model identifier. If None, chosen per provider.
    pub model: Option<String>,

    /// Credential for the extraction provider, captured at startup.
    pub api_key: Option<String>,

    /// Ollama API root, used by the setup check and the Ollama provider.
    pub ollama_host: String,

    /// Sampling temperature for extraction. Default: 0.0.
    pub temperature: f32,

    /// Maximum tokens the model may generate for the record. Default: 4096.
    pub max_tokens: usize,

    /// Timeout for the extraction call, in seconds. Default: 300.
    pub api_timeout_secs: u64,

    /// Custom system prompt. If None, uses the built-in one.
    pub system_prompt: Option<String>,

    /// Where the record is written.
    pub json_output: PathBuf,

    /// Where the OCR text is written.
    pub ocr_output: PathBuf,

    /// Receives stage transitions.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            ocr_preset: OcrPreset::default(),
            ocr_endpoint: DEFAULT_OCR_ENDPOINT.to_string(),
            ocr_model: DEFAULT_OCR_MODEL.to_string(),
            ocr_timeout_secs: 600,
            provider_name: None,
            model: None,
            api_key: None,
            ollama_host: DEFAULT_OLLAMA_HOST.to_string(),
            temperature: 0.0,
            max_tokens: 4096,
            api_timeout_secs: 300,
            system_prompt: None,
            json_output: PathBuf::from(DEFAULT_JSON_OUTPUT),
            ocr_output: PathBuf::from(DEFAULT_OCR_OUTPUT),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("strategy", &self.strategy)
            .field("ocr_preset", &self.ocr_preset)
            .field("ocr_endpoint", &self.ocr_endpoint)
            .field("ocr_model", &self.ocr_model)
            .field("provider_name", &self.provider_name)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("ollama_host", &self.ollama_host)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("json_output", &self.json_output)
            .field("ocr_output", &self.ocr_output)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn PipelineObserver>"),
            )
            .finish()
    }
}

impl Settings {
    /// Create a new builder for `Settings`.
    pub fn builder() -> SettingsBuilder {
        SettingsBuilder {
            settings: Self::default(),
        }
    }

    /// The provider that will run extraction.
    pub fn provider_name(&self) -> &str {
        self.provider_name
            .as_deref()
            .unwrap_or_else(|| self.strategy.default_provider())
    }

    /// The model that will run extraction.
    pub fn model(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| default_model_for_provider(self.provider_name()))
    }
}

/// Builder for [`Settings`].
#[derive(Debug)]
pub struct SettingsBuilder {
    settings: Settings,
}

impl SettingsBuilder {
    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.settings.strategy = strategy;
        self
    }

    pub fn ocr_preset(mut self, preset: OcrPreset) -> Self {
        self.settings.ocr_preset = preset;
        self
    }

    pub fn ocr_endpoint(mut self, url: impl Into<String>) -> Self {
        self.settings.ocr_endpoint = url.into();
        self
    }

    pub fn ocr_model(mut self, model: impl Into<String>) -> Self {
        self.settings.ocr_model = model.into();
        self
    }

    pub fn ocr_timeout_secs(mut self, secs: u64) -> Self {
        self.settings.ocr_timeout_secs = secs;
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.settings.provider_name = Some(name.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.settings.model = Some(model.into());
        self
    }

    /// Set the extraction credential. Empty strings count as absent.
    pub fn api_key(mut self, key: Option<String>) -> Self {
        self.settings.api_key = key.filter(|k| !k.trim().is_empty());
        self
    }

    pub fn ollama_host(mut self, host: impl Into<String>) -> Self {
        self.settings.ollama_host = host.into();
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.settings.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.settings.max_tokens = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.settings.api_timeout_secs = secs;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.settings.system_prompt = Some(prompt.into());
        self
    }

    pub fn json_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings.json_output = path.into();
        self
    }

    pub fn ocr_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings.ocr_output = path.into();
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.settings.progress_callback = Some(cb);
        self
    }

    /// Build the settings, validating constraints.
    pub fn build(self) -> Result<Settings, HsdsError> {
        let s = &self.settings;
        if s.max_tokens == 0 {
            return Err(HsdsError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        for (what, url) in [("OCR endpoint", &s.ocr_endpoint), ("Ollama host", &s.ollama_host)] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(HsdsError::InvalidConfig(format!(
                    "{what} must be an http(s) URL, got '{url}'"
                )));
            }
        }
        if s.json_output == s.ocr_output {
            return Err(HsdsError::InvalidConfig(format!(
                "JSON and OCR outputs must differ, both are '{}'",
                s.json_output.display()
            )));
        }
        Ok(self.settings)
    }
}

/// Environment variable holding the credential for a provider, if it needs one.
///
/// Local providers (Ollama, LM Studio) are reached through an endpoint that
/// always has a default, so they need no credential.
pub fn credential_env_var(provider: &str) -> Option<&'static str> {
    match provider.to_ascii_lowercase().as_str() {
        "openai" => Some("OPENAI_API_KEY"),
        "anthropic" => Some("ANTHROPIC_API_KEY"),
        "gemini" => Some("GEMINI_API_KEY"),
        "mistral" => Some("MISTRAL_API_KEY"),
        "openrouter" => Some("OPENROUTER_API_KEY"),
        "azure" => Some("AZURE_OPENAI_API_KEY"),
        _ => None,
    }
}

/// True for keyed providers that `edgequake_llm` only configures from the
/// environment. Their key has to be exported; [`Settings::api_key`] is used
/// for the presence check alone.
pub fn credential_read_from_env(provider: &str) -> bool {
    matches!(provider.to_ascii_lowercase().as_str(), "mistral" | "azure")
}

/// Model used when none is configured.
pub fn default_model_for_provider(provider: &str) -> &'static str {
    match provider.to_ascii_lowercase().as_str() {
        "anthropic" => "claude-sonnet-4-20250514",
        "gemini" => "gemini-2.0-flash",
        "mistral" => "pixtral-12b-2409",
        "ollama" | "lmstudio" => "gpt-oss:20b",
        _ => "gpt-4.1-mini",
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Which pipeline a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// The image goes straight to a vision-capable extraction model.
    #[default]
    Direct,
    /// OCR to markdown first, then text-only extraction.
    OcrThenText,
}

impl Strategy {
    /// Vision extraction defaults to a hosted model; text extraction to a
    /// local Ollama model.
    pub fn default_provider(self) -> &'static str {
        match self {
            Strategy::Direct => "openai",
            Strategy::OcrThenText => "ollama",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Strategy::Direct => "direct",
            Strategy::OcrThenText => "ocr-then-text",
        })
    }
}

impl FromStr for Strategy {
    type Err = HsdsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(Strategy::Direct),
            "ocr-then-text" | "ocr" => Ok(Strategy::OcrThenText),
            other => Err(HsdsError::InvalidConfig(format!(
                "unknown strategy '{other}', expected 'direct' or 'ocr-then-text'"
            ))),
        }
    }
}

/// OCR speed/quality preset, fastest first.
///
/// | Preset | base size | image size | crop mode |
/// |--------|-----------|------------|-----------|
/// | tiny   | 512       | 512        | no        |
/// | small  | 640       | 640        | no        |
/// | base   | 1024      | 1024       | no        |
/// | gundam | 1024      | 640        | yes       |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OcrPreset {
    #[default]
    Tiny,
    Small,
    Base,
    Gundam,
}

/// The inference knobs a preset expands to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcrSettings {
    /// Overall resolution budget.
    pub base_size: u32,
    /// Tile size.
    pub image_size: u32,
    /// Tile the image into overlapping crops before inference.
    pub crop_mode: bool,
}

impl OcrPreset {
    pub const ALL: [OcrPreset; 4] = [
        OcrPreset::Tiny,
        OcrPreset::Small,
        OcrPreset::Base,
        OcrPreset::Gundam,
    ];

    pub fn settings(self) -> OcrSettings {
        let (base_size, image_size, crop_mode) = match self {
            OcrPreset::Tiny => (512, 512, false),
            OcrPreset::Small => (640, 640, false),
            OcrPreset::Base => (1024, 1024, false),
            OcrPreset::Gundam => (1024, 640, true),
        };
        OcrSettings {
            base_size,
            image_size,
            crop_mode,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            OcrPreset::Tiny => "tiny",
            OcrPreset::Small => "small",
            OcrPreset::Base => "base",
            OcrPreset::Gundam => "gundam",
        }
    }

    /// Resolve a preset by name. Unknown names fall back to [`OcrPreset::Tiny`].
    pub fn resolve(name: &str) -> OcrPreset {
        match name.trim().to_ascii_lowercase().as_str() {
            "tiny" => OcrPreset::Tiny,
            "small" => OcrPreset::Small,
            "base" => OcrPreset::Base,
            "gundam" => OcrPreset::Gundam,
            other => {
                warn!("Invalid OCR preset '{}', using 'tiny' instead", other);
                OcrPreset::Tiny
            }
        }
    }
}

impl fmt::Display for OcrPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_table_matches() {
        let triples: Vec<(u32, u32, bool)> = OcrPreset::ALL
            .iter()
            .map(|p| {
                let s = p.settings();
                (s.base_size, s.image_size, s.crop_mode)
            })
            .collect();
        assert_eq!(
            triples,
            vec![
                (512, 512, false),
                (640, 640, false),
                (1024, 1024, false),
                (1024, 640, true),
            ]
        );
    }

    #[test]
    fn preset_resolve_is_case_insensitive() {
        assert_eq!(OcrPreset::resolve("GUNDAM"), OcrPreset::Gundam);
        assert_eq!(OcrPreset::resolve(" small "), OcrPreset::Small);
    }

    #[test]
    fn unknown_preset_falls_back_to_tiny() {
        for name in ["", "huge", "tiny2"] {
            let preset = OcrPreset::resolve(name);
            assert_eq!(preset, OcrPreset::Tiny);
            assert_eq!(preset.settings(), OcrPreset::Tiny.settings());
        }
    }

    #[test]
    fn strategy_parse() {
        assert_eq!("direct".parse::<Strategy>().unwrap(), Strategy::Direct);
        assert_eq!(
            "ocr-then-text".parse::<Strategy>().unwrap(),
            Strategy::OcrThenText
        );
        assert!("both".parse::<Strategy>().is_err());
        assert_eq!(Strategy::OcrThenText.to_string(), "ocr-then-text");
    }

    #[test]
    fn provider_and_model_defaults_follow_strategy() {
        let direct = Settings::default();
        assert_eq!(direct.provider_name(), "openai");
        assert_eq!(direct.model(), "gpt-4.1-mini");

        let two_stage = Settings::builder()
            .strategy(Strategy::OcrThenText)
            .build()
            .unwrap();
        assert_eq!(two_stage.provider_name(), "ollama");
        assert_eq!(two_stage.model(), "gpt-oss:20b");

        let explicit = Settings::builder()
            .provider_name("anthropic")
            .model("claude-haiku")
            .build()
            .unwrap();
        assert_eq!(explicit.model(), "claude-haiku");
    }

    #[test]
    fn builder_rejects_bad_values() {
        assert!(Settings::builder().max_tokens(0).build().is_err());
        assert!(Settings::builder().ocr_endpoint("localhost:8000").build().is_err());
        assert!(Settings::builder()
            .json_output("same.txt")
            .ocr_output("same.txt")
            .build()
            .is_err());
    }

    #[test]
    fn blank_api_key_counts_as_absent() {
        let s = Settings::builder().api_key(Some("  ".into())).build().unwrap();
        assert!(s.api_key.is_none());
    }

    #[test]
    fn debug_redacts_api_key() {
        let s = Settings::builder()
            .api_key(Some("sk-secret".into()))
            .build()
            .unwrap();
        let dbg = format!("{s:?}");
        assert!(!dbg.contains("sk-secret"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn credential_requirements() {
        assert_eq!(credential_env_var("openai"), Some("OPENAI_API_KEY"));
        assert_eq!(credential_env_var("OpenAI"), Some("OPENAI_API_KEY"));
        assert_eq!(credential_env_var("ollama"), None);
    }

    #[test]
    fn only_env_configured_providers_need_an_export() {
        assert!(credential_read_from_env("mistral"));
        assert!(credential_read_from_env("Azure"));
        assert!(!credential_read_from_env("openai"));
        assert!(!credential_read_from_env("ollama"));
    }
}
