//! Layered configuration.
//!
//! Built-in defaults, then the TOML file, then `JUPYTER_AGENT__SECTION__KEY`
//! environment variables.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::exec::DEFAULT_USERNAME;
use crate::session::{DEFAULT_KERNEL_NAME, SessionSettings};

pub const APP_NAME: &str = "jupyter-agent";

/// Errors loading or writing configuration.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("invalid configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to expand {text}: {message}")]
    Expand { text: String, message: String },

    #[error("unable to determine configuration directory")]
    NoConfigDir,
}

pub type SettingsResult<T> = Result<T, SettingsError>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub kernel: KernelConfig,
    pub execution: ExecutionConfig,
    pub logging: LoggingConfig,
}

/// Notebook server connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL, e.g. `http://localhost:8888`.
    pub url: String,
    /// Access token. `$VAR` references are expanded.
    pub token: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8888".to_string(),
            token: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Kernel spec started for notebooks without a running session.
    pub name: String,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_KERNEL_NAME.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub timeout_secs: u64,
    pub username: String,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            username: DEFAULT_USERNAME.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load from `path` (missing file is fine) and the environment.
    pub fn load(path: &Path) -> SettingsResult<Self> {
        Self::load_with(path, env_layer())
    }

    fn load_with(path: &Path, env: Environment) -> SettingsResult<Self> {
        let defaults = AppConfig::default();
        let built = Config::builder()
            .set_default("server.url", defaults.server.url)?
            .set_default("server.token", defaults.server.token)?
            .set_default("kernel.name", defaults.kernel.name)?
            .set_default("execution.timeout_secs", defaults.execution.timeout_secs as i64)?
            .set_default("execution.username", defaults.execution.username)?
            .set_default("logging.level", defaults.logging.level)?
            .add_source(
                File::from(path)
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(env)
            .build()?;

        let mut config: AppConfig = built.try_deserialize()?;
        if config.server.token.contains('$') {
            config.server.token = expand_env(&config.server.token)?;
        }
        Ok(config)
    }

    /// Load `path`, writing the default file first if it does not exist.
    pub fn load_or_init(path: &Path) -> SettingsResult<Self> {
        if !path.exists() {
            write_default_config(path)?;
        }
        Self::load(path)
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            kernel_name: self.kernel.name.clone(),
            timeout: self.execution_timeout(),
            username: self.execution.username.clone(),
        }
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution.timeout_secs)
    }
}

/// The default configuration as commented TOML.
pub fn example_config() -> SettingsResult<String> {
    let mut body = String::new();
    body.push_str("# Configuration for ");
    body.push_str(APP_NAME);
    body.push('\n');
    body.push_str("# Every key can be overridden with JUPYTER_AGENT__<SECTION>__<KEY>.\n\n");
    body.push_str(&toml::to_string_pretty(&AppConfig::default())?);
    Ok(body)
}

pub fn write_default_config(path: &Path) -> SettingsResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| SettingsError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    fs::write(path, example_config()?).map_err(|source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// `$XDG_CONFIG_HOME/jupyter-agent`, falling back to the platform default.
pub fn default_config_dir() -> SettingsResult<PathBuf> {
    if let Some(dir) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(dir) = dirs::config_dir() {
        return Ok(dir.join(APP_NAME));
    }

    dirs::home_dir()
        .map(|home| home.join(".config").join(APP_NAME))
        .ok_or(SettingsError::NoConfigDir)
}

pub fn default_config_file() -> SettingsResult<PathBuf> {
    Ok(default_config_dir()?.join("config.toml"))
}

/// Expand `~` and `$VAR` in a user-supplied path.
pub fn expand_path(text: &str) -> SettingsResult<PathBuf> {
    let expanded = shellexpand::full(text).map_err(|e| SettingsError::Expand {
        text: text.to_string(),
        message: e.to_string(),
    })?;
    Ok(PathBuf::from(expanded.as_ref()))
}

fn expand_env(text: &str) -> SettingsResult<String> {
    shellexpand::env(text)
        .map(|expanded| expanded.into_owned())
        .map_err(|e| SettingsError::Expand {
            text: text.to_string(),
            message: e.to_string(),
        })
}

fn env_layer() -> Environment {
    Environment::with_prefix(&env_prefix()).separator("__")
}

fn env_prefix() -> String {
    APP_NAME
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}
