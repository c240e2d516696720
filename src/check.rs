//! Setup verification: can this machine run the configured pipeline?
//!
//! Each check is independent and never aborts the others, so one run of
//! `hsds-extract --check` lists every problem at once. Only
//! [`CheckStatus::Fail`] counts against the result; a CPU-only machine is a
//! [`CheckStatus::Warn`] because OCR still works there, just slowly.

use crate::config::{credential_env_var, Settings, Strategy};
use crate::pipeline::ocr::Device;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

/// Outcome of one check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: &'static str,
    pub status: CheckStatus,
    pub detail: String,
    /// What to do about a warning or failure.
    pub hint: Option<String>,
}

impl CheckResult {
    fn pass(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            status: CheckStatus::Pass,
            detail: detail.into(),
            hint: None,
        }
    }

    fn warn(name: &'static str, detail: impl Into<String>, hint: impl Into<String>) -> Self {
        Self {
            name,
            status: CheckStatus::Warn,
            detail: detail.into(),
            hint: Some(hint.into()),
        }
    }

    fn fail(name: &'static str, detail: impl Into<String>, hint: impl Into<String>) -> Self {
        Self {
            name,
            status: CheckStatus::Fail,
            detail: detail.into(),
            hint: Some(hint.into()),
        }
    }
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = match self.status {
            CheckStatus::Pass => "✓",
            CheckStatus::Warn => "!",
            CheckStatus::Fail => "✗",
        };
        write!(f, "{mark} {}: {}", self.name, self.detail)?;
        if let Some(ref hint) = self.hint {
            write!(f, "\n  {hint}")?;
        }
        Ok(())
    }
}

/// Every check result, in the order they ran.
#[derive(Debug, Clone, Default)]
pub struct SetupReport {
    pub checks: Vec<CheckResult>,
}

impl SetupReport {
    pub fn passed(&self) -> usize {
        self.checks
            .iter()
            .filter(|c| c.status != CheckStatus::Fail)
            .count()
    }

    pub fn total(&self) -> usize {
        self.checks.len()
    }

    pub fn all_passed(&self) -> bool {
        self.passed() == self.total()
    }
}

/// Run every check relevant to `settings`.
pub async fn verify_setup(settings: &Settings, image_path: &Path) -> SetupReport {
    let mut report = SetupReport::default();
    report.checks.push(check_image(image_path));
    report.checks.push(check_credential(settings));
    report.checks.push(check_device(Device::detect()));

    let client = match reqwest::Client::builder().timeout(PROBE_TIMEOUT).build() {
        Ok(c) => c,
        Err(e) => {
            report.checks.push(CheckResult::fail(
                "HTTP client",
                e.to_string(),
                "Check the TLS configuration of this machine.",
            ));
            return report;
        }
    };

    if settings.strategy == Strategy::OcrThenText {
        report
            .checks
            .push(check_ocr_endpoint(&client, &settings.ocr_endpoint).await);
    }

    if settings.provider_name().eq_ignore_ascii_case("ollama") {
        report
            .checks
            .push(check_ollama(&client, &settings.ollama_host, settings.model()).await);
    }

    report
}

fn check_image(path: &Path) -> CheckResult {
    if path.is_file() {
        CheckResult::pass("Input image", path.display().to_string())
    } else {
        CheckResult::fail(
            "Input image",
            format!("'{}' not found", path.display()),
            "Pass the flyer path as the first argument.",
        )
    }
}

fn check_credential(settings: &Settings) -> CheckResult {
    let provider = settings.provider_name();
    match credential_env_var(provider) {
        None => CheckResult::pass(
            "Extraction credential",
            format!("provider '{provider}' needs no API key"),
        ),
        Some(_) if settings.api_key.is_some() => CheckResult::pass(
            "Extraction credential",
            format!("API key for '{provider}' is set"),
        ),
        Some(var) => CheckResult::fail(
            "Extraction credential",
            format!("{var} is not set"),
            format!("Run: export {var}=..."),
        ),
    }
}

fn check_device(device: Device) -> CheckResult {
    match device {
        Device::Cpu => CheckResult::warn(
            "Compute device",
            "no GPU detected, OCR will run on the CPU",
            "Use the 'tiny' or 'small' preset for reasonable speed.",
        ),
        other => CheckResult::pass("Compute device", other.label()),
    }
}

async fn check_ocr_endpoint(client: &reqwest::Client, endpoint: &str) -> CheckResult {
    // Any HTTP answer, even 404 or 405 to a GET, proves the server is up.
    match client.get(endpoint).send().await {
        Ok(resp) => {
            debug!("OCR endpoint answered {}", resp.status());
            CheckResult::pass("OCR endpoint", format!("{endpoint} is reachable"))
        }
        Err(e) => CheckResult::fail(
            "OCR endpoint",
            format!("cannot reach {endpoint}: {e}"),
            "Start the DeepSeek-OCR server or set --ocr-endpoint.",
        ),
    }
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

/// True if `model` or another tag of the same model is installed.
fn model_available(installed: &[String], model: &str) -> bool {
    let family = |name: &str| name.split(':').next().unwrap_or(name).to_string();
    let wanted = family(model);
    installed
        .iter()
        .any(|name| name == model || family(name) == wanted)
}

async fn check_ollama(client: &reqwest::Client, host: &str, model: &str) -> CheckResult {
    let url = format!("{}/api/tags", host.trim_end_matches('/'));
    let resp = match client.get(&url).send().await {
        Ok(r) => r,
        Err(e) => {
            return CheckResult::fail(
                "Ollama API",
                format!("cannot connect to {host}: {e}"),
                "Make sure Ollama is running: ollama serve",
            )
        }
    };

    if !resp.status().is_success() {
        return CheckResult::fail(
            "Ollama API",
            format!("{url} returned status {}", resp.status()),
            "Make sure Ollama is running: ollama serve",
        );
    }

    let installed: Vec<String> = match resp.json::<TagsResponse>().await {
        Ok(tags) => tags.models.into_iter().map(|m| m.name).collect(),
        Err(e) => {
            return CheckResult::fail(
                "Ollama API",
                format!("unexpected /api/tags response: {e}"),
                "Upgrade Ollama to a current release.",
            )
        }
    };

    if model_available(&installed, model) {
        CheckResult::pass("Ollama model", format!("'{model}' is available at {host}"))
    } else {
        CheckResult::fail(
            "Ollama model",
            format!("'{model}' not found at {host}"),
            format!("Run: ollama pull {model}"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn model_matching_accepts_other_tags() {
        let installed = vec!["llava:latest".to_string(), "gpt-oss:120b".to_string()];
        assert!(model_available(&installed, "gpt-oss:20b"));
        assert!(model_available(&installed, "llava:latest"));
        assert!(!model_available(&installed, "mistral"));
        assert!(!model_available(&[], "gpt-oss:20b"));
    }

    #[test]
    fn tags_response_parses() {
        let json = r#"{"models":[{"name":"gpt-oss:20b","size":1}]}"#;
        let tags: TagsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(tags.models[0].name, "gpt-oss:20b");
        let empty: TagsResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.models.is_empty());
    }

    #[test]
    fn credential_check() {
        let missing = Settings::builder().provider_name("openai").build().unwrap();
        assert_eq!(check_credential(&missing).status, CheckStatus::Fail);

        let present = Settings::builder()
            .provider_name("openai")
            .api_key(Some("sk-test".into()))
            .build()
            .unwrap();
        assert_eq!(check_credential(&present).status, CheckStatus::Pass);

        let local = Settings::builder().provider_name("ollama").build().unwrap();
        assert_eq!(check_credential(&local).status, CheckStatus::Pass);
    }

    #[test]
    fn cpu_is_a_warning_not_a_failure() {
        let result = check_device(Device::Cpu);
        assert_eq!(result.status, CheckStatus::Warn);
        let report = SetupReport {
            checks: vec![result, check_device(Device::Cuda)],
        };
        assert!(report.all_passed());
    }

    #[test]
    fn image_check() {
        let file = NamedTempFile::new().unwrap();
        assert_eq!(check_image(file.path()).status, CheckStatus::Pass);
        assert_eq!(
            check_image(Path::new("/definitely/not/here.jpg")).status,
            CheckStatus::Fail
        );
    }

    #[test]
    fn display_includes_hint() {
        let r = CheckResult::fail("Ollama model", "'x' not found", "Run: ollama pull x");
        assert_eq!(r.to_string(), "✗ Ollama model: 'x' not found\n  Run: ollama pull x");
    }

    #[tokio::test]
    async fn unreachable_ocr_endpoint_fails() {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .unwrap();
        let result = check_ocr_endpoint(&client, "http://127.0.0.1:1/v1/ocr").await;
        assert_eq!(result.status, CheckStatus::Fail);
    }
}
