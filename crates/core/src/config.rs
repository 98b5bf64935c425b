//! Configuration management for the AIConfig engine.
//!
//! This module handles loading and merging configuration from multiple sources:
//! - Defaults
//! - Config file (`.aiconfig/config.yaml` or `AICONFIG_CONFIG`)
//! - Environment variables
//! - Command-line flags
//!
//! Later sources override earlier ones.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult};

/// Default per-callback timeout for the callback bus.
pub const DEFAULT_CALLBACK_TIMEOUT_MS: u64 = 5000;

/// Default Ollama endpoint.
pub const DEFAULT_OLLAMA_ENDPOINT: &str = "http://localhost:11434";

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Optional config file path
    pub config_file: Option<PathBuf>,

    /// Timeout applied to each registered callback, in milliseconds
    pub callback_timeout_ms: u64,

    /// Model used when neither the prompt nor the document names one
    pub default_model: Option<String>,

    /// Log level override
    pub log_level: Option<String>,

    /// Verbose mode (enables debug logging)
    pub verbose: bool,

    /// Disable colored output
    pub no_color: bool,

    /// Ollama backend settings
    pub ollama: OllamaConfig,
}

/// Settings for the built-in Ollama backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    pub endpoint: String,

    /// Model names routed to the Ollama backend
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_OLLAMA_ENDPOINT.to_string(),
            aliases: vec!["llama3.2".to_string()],
        }
    }
}

/// Full configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    callbacks: Option<CallbacksSection>,
    default_model: Option<String>,
    logging: Option<LoggingSection>,
    ollama: Option<OllamaConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallbacksSection {
    timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LoggingSection {
    level: Option<String>,
    color: Option<bool>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            config_file: None,
            callback_timeout_ms: DEFAULT_CALLBACK_TIMEOUT_MS,
            default_model: None,
            log_level: None,
            verbose: false,
            no_color: false,
            ollama: OllamaConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the config file and environment variables.
    ///
    /// Environment variables:
    /// - `AICONFIG_CONFIG`: Path to config file
    /// - `AICONFIG_DEFAULT_MODEL`: Fallback model name
    /// - `AICONFIG_CALLBACK_TIMEOUT_MS`: Per-callback timeout
    /// - `AICONFIG_OLLAMA_ENDPOINT`: Ollama base URL
    /// - `RUST_LOG`: Log level
    /// - `NO_COLOR`: Disable colored output
    ///
    /// # Example
    /// ```no_run
    /// use aiconfig_core::config::AppConfig;
    ///
    /// let config = AppConfig::load().expect("Failed to load config");
    /// println!("Callback timeout: {}ms", config.callback_timeout_ms);
    /// ```
    pub fn load() -> AppResult<Self> {
        let mut config = Self::default();

        if let Ok(config_file) = std::env::var("AICONFIG_CONFIG") {
            config.config_file = Some(PathBuf::from(config_file));
        }

        let config_path = match config.config_file {
            Some(ref cf) => cf.clone(),
            None => PathBuf::from(".aiconfig/config.yaml"),
        };

        if config_path.exists() {
            config = config.merge_yaml(&config_path)?;
        } else if config.config_file.is_some() {
            return Err(AppError::Config(format!(
                "Config file does not exist: {:?}",
                config_path
            )));
        }

        if let Ok(model) = std::env::var("AICONFIG_DEFAULT_MODEL") {
            config.default_model = Some(model);
        }

        if let Ok(timeout) = std::env::var("AICONFIG_CALLBACK_TIMEOUT_MS") {
            config.callback_timeout_ms = timeout.parse().map_err(|e| {
                AppError::Config(format!(
                    "Invalid AICONFIG_CALLBACK_TIMEOUT_MS '{}': {}",
                    timeout, e
                ))
            })?;
        }

        if let Ok(endpoint) = std::env::var("AICONFIG_OLLAMA_ENDPOINT") {
            config.ollama.endpoint = endpoint;
        }

        if let Ok(level) = std::env::var("RUST_LOG") {
            config.log_level = Some(level);
        }

        if std::env::var("NO_COLOR").is_ok() {
            config.no_color = true;
        }

        config.validate()?;
        Ok(config)
    }

    /// Merge a YAML configuration file into this config.
    pub fn merge_yaml(&self, path: &Path) -> AppResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config_file: ConfigFile = serde_yaml::from_str(&contents).map_err(|e| {
            AppError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        })?;

        let mut result = self.clone();

        if let Some(timeout) = config_file.callbacks.and_then(|c| c.timeout_ms) {
            result.callback_timeout_ms = timeout;
        }

        if let Some(model) = config_file.default_model {
            result.default_model = Some(model);
        }

        if let Some(logging) = config_file.logging {
            if let Some(level) = logging.level {
                result.log_level = Some(level);
            }
            if let Some(color) = logging.color {
                result.no_color = !color;
            }
        }

        if let Some(ollama) = config_file.ollama {
            result.ollama = ollama;
        }

        Ok(result)
    }

    /// Apply CLI overrides to the configuration.
    ///
    /// Command-line flags take precedence over everything else.
    pub fn with_overrides(
        mut self,
        default_model: Option<String>,
        callback_timeout_ms: Option<u64>,
        log_level: Option<String>,
        verbose: bool,
        no_color: bool,
    ) -> Self {
        if let Some(model) = default_model {
            self.default_model = Some(model);
        }

        if let Some(timeout) = callback_timeout_ms {
            self.callback_timeout_ms = timeout;
        }

        if let Some(log_level) = log_level {
            self.log_level = Some(log_level);
        }

        if verbose {
            self.verbose = true;
            // Verbose mode implies debug logging
            if self.log_level.is_none() {
                self.log_level = Some("debug".to_string());
            }
        }

        if no_color {
            self.no_color = true;
        }

        self
    }

    /// Callback timeout as a `Duration`.
    pub fn callback_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.callback_timeout_ms)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> AppResult<()> {
        if self.callback_timeout_ms == 0 {
            return Err(AppError::Config(
                "Callback timeout must be greater than zero".to_string(),
            ));
        }

        if self.ollama.endpoint.trim().is_empty() {
            return Err(AppError::Config(
                "Ollama endpoint cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.callback_timeout_ms, 5000);
        assert_eq!(config.ollama.endpoint, DEFAULT_OLLAMA_ENDPOINT);
        assert!(config.default_model.is_none());
        assert!(!config.verbose);
    }

    #[test]
    fn test_with_overrides() {
        let config = AppConfig::default().with_overrides(
            Some("echo".to_string()),
            Some(250),
            None,
            true,
            false,
        );

        assert_eq!(config.default_model, Some("echo".to_string()));
        assert_eq!(config.callback_timeout_ms, 250);
        assert!(config.verbose);
        assert_eq!(config.log_level, Some("debug".to_string()));
    }

    #[test]
    fn test_merge_yaml() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.yaml");
        fs::write(
            &path,
            r#"
defaultModel: gpt-4
callbacks:
  timeoutMs: 1500
logging:
  level: warn
  color: false
ollama:
  endpoint: http://gpu-box:11434
  aliases: [mistral, llama3]
"#,
        )
        .unwrap();

        let config = AppConfig::default().merge_yaml(&path).unwrap();
        assert_eq!(config.default_model, Some("gpt-4".to_string()));
        assert_eq!(config.callback_timeout_ms, 1500);
        assert_eq!(config.log_level, Some("warn".to_string()));
        assert!(config.no_color);
        assert_eq!(config.ollama.endpoint, "http://gpu-box:11434");
        assert_eq!(config.ollama.aliases, vec!["mistral", "llama3"]);
    }

    #[test]
    fn test_merge_invalid_yaml() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.yaml");
        fs::write(&path, "callbacks: [unterminated").unwrap();

        assert!(matches!(
            AppConfig::default().merge_yaml(&path),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn test_validate_zero_timeout() {
        let mut config = AppConfig::default();
        config.callback_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_defaults() {
        assert!(AppConfig::default().validate().is_ok());
    }
}
