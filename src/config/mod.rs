//! Application configuration
//!
//! ベースパスと実行モード。JSON か環境変数から読み込める。

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// 実行モード。開発モードではエラーレスポンスに詳細を含める
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Development,
    #[default]
    Production,
}

impl Mode {
    pub fn from_str(mode: &str) -> Option<Mode> {
        match mode.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Some(Mode::Development),
            "production" | "prod" => Some(Mode::Production),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// すべてのルートの前に付くパス (例: `/foo/bar`)
    #[serde(default)]
    pub base_path: String,
    #[serde(default)]
    pub mode: Mode,
}

impl AppConfig {
    pub fn new() -> AppConfig {
        AppConfig::default()
    }

    pub fn base_path(mut self, base_path: impl Into<String>) -> AppConfig {
        self.base_path = base_path.into();
        self
    }

    pub fn mode(mut self, mode: Mode) -> AppConfig {
        self.mode = mode;
        self
    }

    /// Load configuration from a JSON string
    pub fn from_json(contents: &str) -> Result<AppConfig, ConfigError> {
        let config: AppConfig = serde_json::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// `KUMIKI_BASE_PATH` と `KUMIKI_MODE` から読み込む
    pub fn from_env() -> Result<AppConfig, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<AppConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = AppConfig::default();
        if let Some(base_path) = lookup("KUMIKI_BASE_PATH") {
            config.base_path = base_path;
        }
        if let Some(mode) = lookup("KUMIKI_MODE") {
            config.mode = Mode::from_str(&mode).ok_or_else(|| {
                ConfigError::ValidationError(format!("unknown mode \"{}\"", mode))
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.base_path.is_empty() && !self.base_path.starts_with('/') {
            return Err(ConfigError::ValidationError(
                "base_path must start with \"/\"".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_development(&self) -> bool {
        self.mode == Mode::Development
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_production() {
        let config = AppConfig::from_json("{}").unwrap();
        assert_eq!(config.mode, Mode::Production);
        assert_eq!(config.base_path, "");
    }

    #[test]
    fn parses_json() {
        let config = AppConfig::from_json(r#"{"base_path":"/foo","mode":"development"}"#).unwrap();
        assert_eq!(config.base_path, "/foo");
        assert!(config.is_development());
        assert!(AppConfig::from_json(r#"{"base_path":"foo"}"#).is_err());
    }

    #[test]
    fn reads_lookup() {
        let config = AppConfig::from_lookup(|key| match key {
            "KUMIKI_BASE_PATH" => Some("/app".to_string()),
            "KUMIKI_MODE" => Some("dev".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.base_path, "/app");
        assert_eq!(config.mode, Mode::Development);

        assert!(AppConfig::from_lookup(|_| Some("weird".to_string())).is_err());
    }
}
