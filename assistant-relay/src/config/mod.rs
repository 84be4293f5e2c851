use crate::services::assistant::openai::{OpenAiClientConfig, OPENAI_API_BASE};
use crate::services::relay::{PollPolicy, RelayConfig};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use service_core::config::{configuration_directory, ServerConfig};
use service_core::error::AppError;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variables that carry the credentials. They win over values
/// from `config/secrets.toml`.
pub const API_KEY_VAR: &str = "OPENAI_API_KEY";
pub const ASSISTANT_ID_VAR: &str = "ASSISTANT_ID";
pub const PROJECT_VAR: &str = "OPENAI_PROJECT";

pub const MISSING_CREDENTIALS: &str = "Missing OPENAI_API_KEY or ASSISTANT_ID. \
     Set them in the environment, a .env file, or config/secrets.toml.";

#[derive(Deserialize, Clone, Debug)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub openai: OpenAiSettings,
    #[serde(default)]
    pub relay: RelaySettings,
    #[serde(default)]
    pub ui: UiSettings,
    #[serde(default)]
    pub observability: ObservabilitySettings,
}

#[derive(Deserialize, Clone, Debug)]
pub struct OpenAiSettings {
    pub api_key: Option<Secret<String>>,
    pub assistant_id: Option<String>,
    /// Billing/project scope for every request.
    pub project: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Assistant ids with this prefix belong to a project.
    #[serde(default = "default_project_scoped_prefix")]
    pub project_scoped_prefix: String,
    /// Refuse to start with a project-scoped assistant id.
    #[serde(default)]
    pub reject_project_scoped_ids: bool,
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            assistant_id: None,
            project: None,
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
            project_scoped_prefix: default_project_scoped_prefix(),
            reject_project_scoped_ids: false,
        }
    }
}

fn default_base_url() -> String {
    OPENAI_API_BASE.to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_project_scoped_prefix() -> String {
    "asst_proj_".to_string()
}

#[derive(Deserialize, Clone, Debug)]
pub struct RelaySettings {
    /// Supplementary instructions layered onto each run.
    pub instructions: Option<String>,
    /// Same as `instructions`, read from a file. Ignored when `instructions` is set.
    pub instructions_file: Option<PathBuf>,
    #[serde(default = "default_poll_initial_interval_ms")]
    pub poll_initial_interval_ms: u64,
    #[serde(default = "default_poll_max_interval_ms")]
    pub poll_max_interval_ms: u64,
    #[serde(default = "default_poll_multiplier")]
    pub poll_multiplier: f64,
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
    #[serde(default = "default_reply_page_size")]
    pub reply_page_size: u32,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            instructions: None,
            instructions_file: None,
            poll_initial_interval_ms: default_poll_initial_interval_ms(),
            poll_max_interval_ms: default_poll_max_interval_ms(),
            poll_multiplier: default_poll_multiplier(),
            run_timeout_secs: default_run_timeout_secs(),
            reply_page_size: default_reply_page_size(),
        }
    }
}

fn default_poll_initial_interval_ms() -> u64 {
    400
}

fn default_poll_max_interval_ms() -> u64 {
    4_000
}

fn default_poll_multiplier() -> f64 {
    1.5
}

fn default_run_timeout_secs() -> u64 {
    180
}

fn default_reply_page_size() -> u32 {
    10
}

#[derive(Deserialize, Clone, Debug)]
pub struct UiSettings {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default)]
    pub caption: String,
    #[serde(default = "default_placeholder")]
    pub placeholder: String,
}

impl Default for UiSettings {
    fn default() -> Self {
        Self {
            title: default_title(),
            caption: String::new(),
            placeholder: default_placeholder(),
        }
    }
}

fn default_title() -> String {
    "Assistant".to_string()
}

fn default_placeholder() -> String {
    "Type your question…".to_string()
}

#[derive(Deserialize, Clone, Debug)]
pub struct ObservabilitySettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            otlp_endpoint: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Validated credentials needed before any remote call is made.
#[derive(Clone, Debug)]
pub struct Credentials {
    pub api_key: Secret<String>,
    pub assistant_id: String,
    pub project: Option<String>,
}

/// What the sidebar shows about the configured credentials.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CredentialStatus {
    pub api_key: bool,
    pub assistant_id: bool,
    pub project: bool,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl OpenAiSettings {
    /// Overlay credentials from the process environment. Empty variables are
    /// treated as unset.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = non_empty(lookup(API_KEY_VAR)) {
            self.api_key = Some(Secret::new(key));
        }
        if let Some(id) = non_empty(lookup(ASSISTANT_ID_VAR)) {
            self.assistant_id = Some(id);
        }
        if let Some(project) = non_empty(lookup(PROJECT_VAR)) {
            self.project = Some(project);
        }
    }

    pub fn status(&self) -> CredentialStatus {
        CredentialStatus {
            api_key: self
                .api_key
                .as_ref()
                .is_some_and(|k| !k.expose_secret().trim().is_empty()),
            assistant_id: non_empty(self.assistant_id.clone()).is_some(),
            project: non_empty(self.project.clone()).is_some(),
        }
    }

    /// Check that both required credentials are present and the assistant id
    /// is acceptable for this deployment.
    pub fn credentials(&self) -> Result<Credentials, AppError> {
        let api_key = self
            .api_key
            .as_ref()
            .filter(|k| !k.expose_secret().trim().is_empty())
            .cloned();
        let assistant_id = non_empty(self.assistant_id.clone());

        let (Some(api_key), Some(assistant_id)) = (api_key, assistant_id) else {
            return Err(AppError::ConfigError(anyhow::anyhow!(MISSING_CREDENTIALS)));
        };

        let project = non_empty(self.project.clone());
        let scoped = !self.project_scoped_prefix.is_empty()
            && assistant_id.starts_with(&self.project_scoped_prefix);

        if scoped && self.reject_project_scoped_ids {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "ASSISTANT_ID '{}' is project-scoped (prefix '{}'). Supply the assistant's \
                 unscoped id, or set OPENAI_PROJECT and disable reject_project_scoped_ids.",
                assistant_id,
                self.project_scoped_prefix
            )));
        }

        if scoped && project.is_none() {
            tracing::warn!(
                assistant_id = %assistant_id,
                "Assistant id looks project-scoped but OPENAI_PROJECT is not set"
            );
        }

        Ok(Credentials {
            api_key,
            assistant_id,
            project,
        })
    }

    pub fn client_config(&self, credentials: &Credentials) -> OpenAiClientConfig {
        OpenAiClientConfig {
            api_key: credentials.api_key.clone(),
            project: credentials.project.clone(),
            base_url: self.base_url.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }
}

impl RelaySettings {
    /// Build the relay configuration, loading instructions from file if needed.
    pub fn relay_config(&self, assistant_id: &str) -> Result<RelayConfig, AppError> {
        if self.poll_initial_interval_ms == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "relay.poll_initial_interval_ms must be greater than zero"
            )));
        }
        if self.poll_multiplier < 1.0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "relay.poll_multiplier must be at least 1.0, got {}",
                self.poll_multiplier
            )));
        }
        if !(1..=100).contains(&self.reply_page_size) {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "relay.reply_page_size must be between 1 and 100, got {}",
                self.reply_page_size
            )));
        }

        let instructions = match (&self.instructions, &self.instructions_file) {
            (Some(text), _) => non_empty(Some(text.clone())),
            (None, Some(path)) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    AppError::ConfigError(anyhow::anyhow!(
                        "Failed to read instructions file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                non_empty(Some(text))
            }
            (None, None) => None,
        };

        Ok(RelayConfig {
            assistant_id: assistant_id.to_string(),
            instructions,
            poll: PollPolicy {
                initial_interval: Duration::from_millis(self.poll_initial_interval_ms),
                max_interval: Duration::from_millis(self.poll_max_interval_ms),
                multiplier: self.poll_multiplier,
                timeout: Duration::from_secs(self.run_timeout_secs),
            },
            reply_page_size: self.reply_page_size,
        })
    }
}

/// Load settings from `assistant-relay/config/`, the `APP_*` environment and
/// the credential variables.
pub fn get_configuration() -> Result<Settings, AppError> {
    let configuration_directory = configuration_directory("assistant-relay")?;
    let mut settings: Settings = service_core::config::load(&configuration_directory)?;
    settings
        .openai
        .apply_env_overrides(|key| std::env::var(key).ok());
    Ok(settings)
}
