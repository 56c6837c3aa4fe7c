use crate::llm::provider::DEFAULT_AZURE_API_VERSION;
use crate::llm::{LlmSettings, Provider};
use clap::Parser;
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Config file picked up from the working directory when none is given.
const DEFAULT_CONFIG_FILE: &str = "config.yaml";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Assistant name shown in the UI
    #[arg(long, env = "ASSISTANT_NAME")]
    pub assistant_name: Option<String>,

    /// Disable timeout middleware
    #[arg(long, env = "TIMEOUT_DISABLED")]
    pub timeout_disabled: Option<bool>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub assistant: AssistantConfig,
    pub upload: UploadConfig,
    pub resilience: ResilienceConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AssistantConfig {
    /// Display name, used in the welcome placeholder and the system prompt.
    pub name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    /// Request body limit for CSV uploads.
    pub max_bytes: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ResilienceConfig {
    pub timeout_disabled: bool,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    pub idle_timeout_secs: u64,
    pub cleanup_interval_secs: u64,
}

impl ResilienceConfig {
    /// Effective request timeout. A disabled timeout becomes one year.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        if self.timeout_disabled {
            Duration::from_secs(365 * 24 * 60 * 60)
        } else {
            Duration::from_secs(self.request_timeout_secs)
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;

        let mut builder = Config::builder();

        // 1. Defaults
        builder = builder
            .set_default("server.port", 3000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("assistant.name", "CSV Analyst")?
            .set_default("upload.max_bytes", 10 * 1024 * 1024)?
            .set_default("resilience.timeout_disabled", false)?
            .set_default("resilience.request_timeout_secs", 120)?
            .set_default(
                "session.idle_timeout_secs",
                crate::session::DEFAULT_SESSION_TIMEOUT.as_secs(),
            )?
            .set_default("session.cleanup_interval_secs", 60)?;

        // 2. Config file: explicit path must exist, ./config.yaml is optional
        if let Some(path) = &cli.config {
            builder = builder.add_source(File::with_name(path).required(true));
        } else if Path::new(DEFAULT_CONFIG_FILE).exists() {
            builder =
                builder.add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));
        }

        // 3. Environment variables, e.g. ANALYST_SERVER__PORT=8000
        builder = builder.add_source(
            Environment::with_prefix("ANALYST")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        // 4. CLI flags (and their clap env fallbacks) win over everything
        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", port)?;
        }
        if let Some(name) = cli.assistant_name {
            builder = builder.set_override("assistant.name", name)?;
        }
        if let Some(td) = cli.timeout_disabled {
            builder = builder.set_override("resilience.timeout_disabled", td)?;
        }

        let cfg: Self = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings the server cannot run with.
    fn validate(&self) -> Result<(), config::ConfigError> {
        let must_be_positive = [
            ("upload.max_bytes", self.upload.max_bytes as u64),
            (
                "resilience.request_timeout_secs",
                self.resilience.request_timeout_secs,
            ),
            ("session.idle_timeout_secs", self.session.idle_timeout_secs),
            (
                "session.cleanup_interval_secs",
                self.session.cleanup_interval_secs,
            ),
        ];
        for (key, value) in must_be_positive {
            if value == 0 {
                return Err(config::ConfigError::Message(format!(
                    "{key} must be greater than zero"
                )));
            }
        }
        Ok(())
    }
}

pub fn load_llm_settings() -> Result<LlmSettings, String> {
    let base_url = std::env::var("LLM_BASE_URL")
        .map_err(|_| "Missing required env var: LLM_BASE_URL".to_string())?;
    if base_url.trim().is_empty() {
        return Err("LLM_BASE_URL cannot be empty".to_string());
    }

    let model = std::env::var("LLM_MODEL")
        .map_err(|_| "Missing required env var: LLM_MODEL".to_string())?;
    if model.trim().is_empty() {
        return Err("LLM_MODEL cannot be empty".to_string());
    }

    let api_key = std::env::var("LLM_API_KEY")
        .ok()
        .filter(|s| !s.trim().is_empty());

    // Auto-detect provider from base URL
    let mut provider = Provider::detect_from_url(&base_url);

    // Azure needs a deployment name to build request URLs
    if let Provider::AzureOpenAI { .. } = &provider {
        let deployment_name = std::env::var("AZURE_DEPLOYMENT_NAME")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| "AZURE_DEPLOYMENT_NAME is required for Azure OpenAI".to_string())?;
        provider = Provider::AzureOpenAI {
            deployment_name,
            api_version: std::env::var("AZURE_API_VERSION")
                .unwrap_or_else(|_| DEFAULT_AZURE_API_VERSION.to_string()),
        };
    }

    let parallel_tool_calls = std::env::var("LLM_PARALLEL_TOOLS")
        .ok()
        .and_then(|s| s.parse().ok());

    Ok(LlmSettings {
        base_url,
        api_key,
        model,
        provider,
        parallel_tool_calls,
    })
}
