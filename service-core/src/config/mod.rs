use crate::error::AppError;
use config::{Config as Cfg, ConfigBuilder, Environment, File, builder::DefaultState};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Bind address shared by every service binary.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Locate a crate's `config/` directory whether the process runs from the
/// workspace root or from inside the crate itself.
pub fn configuration_directory(crate_dir: &str) -> Result<PathBuf, AppError> {
    let base_path = std::env::current_dir()?;

    if base_path.ends_with(crate_dir) {
        Ok(base_path.join("config"))
    } else {
        Ok(base_path.join(crate_dir).join("config"))
    }
}

/// Standard source layering: `base.yaml` (required), `secrets.toml`
/// (optional), then `APP_`-prefixed environment variables using `__` as the
/// nesting separator. A local `.env` file is loaded first and overrides
/// variables already set in the shell.
pub fn layered_builder(config_dir: &Path) -> ConfigBuilder<DefaultState> {
    dotenvy::dotenv_override().ok();

    Cfg::builder()
        .add_source(File::from(config_dir.join("base.yaml")).required(true))
        .add_source(File::from(config_dir.join("secrets.toml")).required(false))
        .add_source(
            Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
}

/// Build and deserialize the layered configuration in one step.
pub fn load<T>(config_dir: &Path) -> Result<T, AppError>
where
    T: for<'de> Deserialize<'de>,
{
    let config = layered_builder(config_dir).build()?;
    Ok(config.try_deserialize()?)
}
