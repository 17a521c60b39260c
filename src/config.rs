//! Application settings.
//!
//! Settings are read once at startup from, in increasing priority:
//! built-in defaults, `config/default.*`, `config/local.*`, `APP__`-prefixed
//! environment variables (`APP__LLM__MODEL=gpt-4o-mini`), and the flat
//! variables `PHOENIX_COLLECTOR_ENDPOINT`, `OPENAI_BASE_URL`,
//! `OPENAI_API_KEY` and `MODEL`. A `.env` file is loaded first if present.

use serde::Deserialize;
use std::time::Duration;

use crate::Result;

/// Application configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub telemetry: TelemetrySettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Which chat provider to talk to.
#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// The OpenAI-compatible endpoint at `base_url`, whatever the model.
    #[default]
    Auto,
    OpenAi,
    Ollama,
}

/// Chat client settings
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSettings {
    #[serde(default)]
    pub provider: ProviderKind,
    /// OpenAI-compatible base URL, including the version segment.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Native Ollama API root, only used with `provider = "ollama"`.
    #[serde(default = "default_ollama_base_url")]
    pub ollama_base_url: String,
    #[serde(default = "default_api_key")]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl LlmSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// OTLP wire encoding.
#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExportProtocol {
    #[default]
    Grpc,
    HttpProtobuf,
}

/// Span export settings
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetrySettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Where spans are sent (e.g., http://localhost:4317)
    #[serde(default = "default_collector_endpoint")]
    pub collector_endpoint: String,
    #[serde(default)]
    pub protocol: ExportProtocol,
    /// Buffer spans and export them in batches instead of one by one
    #[serde(default)]
    pub batch: bool,
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_log_level() -> String {
    "debug".to_string()
}

fn default_base_url() -> String {
    "http://localhost:11434/v1".to_string()
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_api_key() -> String {
    "ollama".to_string()
}

fn default_model() -> String {
    "gemma3:12b".to_string()
}

fn default_max_retries() -> u32 {
    1
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_collector_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "app".to_string()
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            base_url: default_base_url(),
            ollama_base_url: default_ollama_base_url(),
            api_key: default_api_key(),
            model: default_model(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            collector_endpoint: default_collector_endpoint(),
            protocol: ExportProtocol::default(),
            batch: false,
            service_name: default_service_name(),
        }
    }
}

impl Settings {
    /// Load settings from files and the process environment.
    pub fn load() -> Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "loaded .env");
        }
        Self::load_from(|key| std::env::var(key).ok())
    }

    /// Load settings, reading the flat override variables through `lookup`.
    pub fn load_from(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option(
                "telemetry.collector_endpoint",
                lookup("PHOENIX_COLLECTOR_ENDPOINT"),
            )?
            .set_override_option("llm.base_url", lookup("OPENAI_BASE_URL"))?
            .set_override_option("llm.api_key", lookup("OPENAI_API_KEY"))?
            .set_override_option("llm.model", lookup("MODEL"))?
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();

        assert_eq!(settings.server.port, 8000);
        assert_eq!(settings.llm.base_url, "http://localhost:11434/v1");
        assert_eq!(settings.llm.api_key, "ollama");
        assert_eq!(settings.llm.model, "gemma3:12b");
        assert_eq!(settings.llm.max_retries, 1);
        assert_eq!(settings.llm.timeout(), Duration::from_secs(30));
        assert_eq!(settings.llm.provider, ProviderKind::Auto);
        assert_eq!(settings.telemetry.collector_endpoint, "http://localhost:4317");
        assert_eq!(settings.telemetry.protocol, ExportProtocol::Grpc);
        assert!(!settings.telemetry.batch);
    }

    #[test]
    fn test_flat_overrides() {
        let settings = Settings::load_from(|key| match key {
            "MODEL" => Some("gpt-4o-mini".to_string()),
            "OPENAI_API_KEY" => Some("sk-test".to_string()),
            "PHOENIX_COLLECTOR_ENDPOINT" => Some("http://phoenix:6006/v1/traces".to_string()),
            _ => None,
        })
        .unwrap();

        assert_eq!(settings.llm.model, "gpt-4o-mini");
        assert_eq!(settings.llm.api_key, "sk-test");
        assert_eq!(
            settings.telemetry.collector_endpoint,
            "http://phoenix:6006/v1/traces"
        );
        assert_eq!(settings.llm.base_url, "http://localhost:11434/v1");
    }

    #[test]
    fn test_enum_spellings() {
        let protocol: ExportProtocol = serde_json::from_str("\"http_protobuf\"").unwrap();
        assert_eq!(protocol, ExportProtocol::HttpProtobuf);
        let provider: ProviderKind = serde_json::from_str("\"openai\"").unwrap();
        assert_eq!(provider, ProviderKind::OpenAi);
        let format: LogFormat = serde_json::from_str("\"json\"").unwrap();
        assert_eq!(format, LogFormat::Json);
    }
}
