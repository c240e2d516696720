//! Structured extraction: image or OCR text → validated [`StructuredRecord`].
//!
//! The language model is treated as a black box behind [`ExtractionModel`]:
//! it receives a system message carrying the schema and one user turn, and
//! returns text. This module then applies the single validation gate: the
//! text must deserialise into [`StructuredRecord`] and pass
//! [`StructuredRecord::validate`]. Anything else is a
//! [`HsdsError::SchemaValidation`]. There is no repair pass, no second
//! attempt with a looser schema and no partially filled record.
//!
//! The only transformation applied before parsing is removal of an outer
//! ```` ```json ```` fence, which is message framing rather than content.

use crate::config::{credential_env_var, Settings};
use crate::error::HsdsError;
use crate::pipeline::media::EncodedImage;
use crate::pipeline::ocr::OcrText;
use crate::prompts::{system_message, text_instruction, IMAGE_INSTRUCTION};
use crate::schema::StructuredRecord;
use async_trait::async_trait;
use edgequake_llm::{
    AnthropicProvider, ChatMessage, CompletionOptions, GeminiProvider, LLMProvider, OllamaProvider,
    OpenAIProvider, OpenRouterProvider, ProviderFactory,
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info};

/// Characters of the raw response quoted in a schema failure.
const EXCERPT_CHARS: usize = 200;

/// A text-generation capability that extraction prompts.
#[async_trait]
pub trait ExtractionModel: Send + Sync {
    /// Provider/model label for logs and errors.
    fn name(&self) -> &str;

    /// Send the conversation, return the model's raw answer.
    async fn generate(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<String, HsdsError>;
}

/// [`ExtractionModel`] backed by an `edgequake_llm` provider.
pub struct ProviderModel {
    provider: Arc<dyn LLMProvider>,
    name: String,
}

impl ProviderModel {
    pub fn new(provider: Arc<dyn LLMProvider>, name: impl Into<String>) -> Self {
        Self {
            provider,
            name: name.into(),
        }
    }
}

#[async_trait]
impl ExtractionModel for ProviderModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<String, HsdsError> {
        let response = self
            .provider
            .chat(messages, Some(options))
            .await
            .map_err(|e| HsdsError::ExtractionFailed {
                provider: self.name.clone(),
                message: e.to_string(),
            })?;
        debug!(
            "{}: {} input tokens, {} output tokens",
            self.name, response.prompt_tokens, response.completion_tokens
        );
        Ok(response.content)
    }
}

/// The structured extraction stage.
pub struct Extractor {
    model: Arc<dyn ExtractionModel>,
    system_prompt: String,
    temperature: f32,
    max_tokens: usize,
    call_timeout: Duration,
}

impl Extractor {
    /// Wrap an existing model with the prompt and limits from `settings`.
    pub fn new(model: Arc<dyn ExtractionModel>, settings: &Settings) -> Self {
        Self {
            model,
            system_prompt: system_message(settings.system_prompt.as_deref()),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            call_timeout: Duration::from_secs(settings.api_timeout_secs.max(1)),
        }
    }

    /// Build the extractor for the configured provider.
    ///
    /// The credential check runs first, so a missing key is reported as
    /// [`HsdsError::Configuration`] without touching the network.
    pub fn from_settings(settings: &Settings) -> Result<Self, HsdsError> {
        let provider = build_provider(settings)?;
        let label = format!("{}/{}", settings.provider_name(), settings.model());
        Ok(Self::new(Arc::new(ProviderModel::new(provider, label)), settings))
    }

    /// Label of the underlying model.
    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    /// Single-stage entry point: the flyer image goes straight to the model.
    pub async fn extract_from_image(&self, image: EncodedImage) -> Result<StructuredRecord, HsdsError> {
        info!(
            "Extracting HSDS data from image '{}' with {}",
            image.path.display(),
            self.model.name()
        );
        let messages = vec![
            ChatMessage::system(self.system_prompt.as_str()),
            ChatMessage::user_with_images(IMAGE_INSTRUCTION, vec![image.to_image_data()]),
        ];
        self.run(&messages).await
    }

    /// Two-stage entry point: OCR output goes to a text-only model.
    pub async fn extract_from_text(&self, text: OcrText) -> Result<StructuredRecord, HsdsError> {
        info!(
            "Extracting HSDS data from {} characters of OCR text with {}",
            text.char_count(),
            self.model.name()
        );
        let messages = vec![
            ChatMessage::system(self.system_prompt.as_str()),
            ChatMessage::user(text_instruction(text.as_str())),
        ];
        self.run(&messages).await
    }

    async fn run(&self, messages: &[ChatMessage]) -> Result<StructuredRecord, HsdsError> {
        let options = self.build_options();
        let start = Instant::now();

        let raw = timeout(self.call_timeout, self.model.generate(messages, &options))
            .await
            .map_err(|_| HsdsError::ExtractionFailed {
                provider: self.model.name().to_string(),
                message: format!("timed out after {}s", self.call_timeout.as_secs()),
            })??;

        debug!(
            "Extraction answered in {}ms ({} chars)",
            start.elapsed().as_millis(),
            raw.len()
        );
        parse_record(&raw)
    }

    fn build_options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

/// Construct the chat provider named in `settings`.
///
/// Key-only providers and Ollama are built from `settings` alone. Providers
/// that need more than a key (Azure endpoint and deployment, Mistral, LM
/// Studio...) are configured by `edgequake_llm` from their environment.
fn build_provider(settings: &Settings) -> Result<Arc<dyn LLMProvider>, HsdsError> {
    let name = settings.provider_name().to_ascii_lowercase();
    let model = settings.model();
    let config_error = |hint: String| HsdsError::Configuration {
        provider: name.clone(),
        hint,
    };

    if let Some(var) = credential_env_var(&name) {
        if settings.api_key.is_none() {
            return Err(config_error(format!(
                "{var} is not set.\nExport it in your shell or pass it with --api-key."
            )));
        }
    }
    let key = settings.api_key.clone().unwrap_or_default();

    let provider: Arc<dyn LLMProvider> = match name.as_str() {
        "openai" => Arc::new(OpenAIProvider::new(key).with_model(model)),
        "anthropic" => Arc::new(AnthropicProvider::new(key).with_model(model)),
        "gemini" => Arc::new(GeminiProvider::new(key).with_model(model)),
        "openrouter" => Arc::new(OpenRouterProvider::new(key).with_model(model)),
        "ollama" => Arc::new(ollama_provider(settings).map_err(|e| config_error(e.to_string()))?),
        _ => ProviderFactory::create_llm_provider(&name, model)
            .map_err(|e| config_error(e.to_string()))?,
    };
    debug!("Using provider '{}' with model '{}'", provider.name(), provider.model());
    Ok(provider)
}

fn ollama_provider(settings: &Settings) -> edgequake_llm::Result<OllamaProvider> {
    OllamaProvider::builder()
        .host(settings.ollama_host.trim_end_matches('/'))
        .model(settings.model())
        .build()
}

static RE_JSON_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:json|JSON)?[ \t]*\n(.*?)\n?```$").unwrap());

/// Remove one outer code fence, if the whole answer is wrapped in one.
fn strip_json_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    match RE_JSON_FENCE.captures(trimmed) {
        Some(caps) => caps.get(1).map_or(trimmed, |m| m.as_str()),
        None => trimmed,
    }
}

/// The validation gate: raw model answer → valid record, or
/// [`HsdsError::SchemaValidation`].
pub fn parse_record(raw: &str) -> Result<StructuredRecord, HsdsError> {
    let body = strip_json_fence(raw);
    let excerpt = || body.chars().take(EXCERPT_CHARS).collect::<String>();

    let record: StructuredRecord =
        serde_json::from_str(body).map_err(|e| HsdsError::SchemaValidation {
            detail: e.to_string(),
            excerpt: excerpt(),
        })?;

    record
        .validate()
        .map_err(|violations| HsdsError::SchemaValidation {
            detail: violations.join("; "),
            excerpt: excerpt(),
        })?;

    info!(
        "Extracted '{}' with {} service/location pair(s)",
        record.organization.name,
        record.services_at_locations.len()
    );
    Ok(record)
}
