//! Configuration file handling

use serde::Deserialize;
use std::path::{Path, PathBuf};

use super::paths::config_path;
use super::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// DAP server settings
    #[serde(default)]
    pub dap: DapConfig,

    /// Evaluator settings
    #[serde(default)]
    pub evaluator: EvaluatorConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,

    /// REPL settings
    #[serde(default)]
    pub repl: ReplConfig,

    /// Scenario runner settings
    #[serde(default)]
    pub testing: TestingConfig,
}

/// DAP server configuration
#[derive(Debug, Deserialize)]
pub struct DapConfig {
    /// Address the TCP listener binds to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port the TCP listener binds to
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for DapConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    54321
}

/// Evaluator configuration
#[derive(Debug, Deserialize, Default)]
pub struct EvaluatorConfig {
    /// Library search directories appended after `-J` flags
    #[serde(default)]
    pub jpath: Vec<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Default level when neither `--log-level` nor `RUST_LOG` is set
    #[serde(default = "default_level")]
    pub level: String,

    /// Log file used in DAP mode (stdout carries the protocol)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            file: None,
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

/// REPL configuration
#[derive(Debug, Deserialize)]
pub struct ReplConfig {
    /// Prompt printed before each command
    #[serde(default = "default_prompt")]
    pub prompt: String,

    /// Source lines shown around the current line on each stop
    #[serde(default)]
    pub context_lines: usize,
}

impl Default for ReplConfig {
    fn default() -> Self {
        Self {
            prompt: default_prompt(),
            context_lines: 0,
        }
    }
}

fn default_prompt() -> String {
    "(jdb) ".to_string()
}

/// Scenario runner configuration
#[derive(Debug, Deserialize)]
pub struct TestingConfig {
    /// Default timeout for await steps
    #[serde(default = "default_await")]
    pub await_timeout_secs: u64,
}

impl Default for TestingConfig {
    fn default() -> Self {
        Self {
            await_timeout_secs: default_await(),
        }
    }
}

fn default_await() -> u64 {
    30
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| super::Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| super::Error::ConfigParse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.dap.port, 54321);
        assert_eq!(config.dap.host, "127.0.0.1");
        assert_eq!(config.repl.prompt, "(jdb) ");
        assert_eq!(config.testing.await_timeout_secs, 30);
        assert!(config.evaluator.jpath.is_empty());
    }

    #[test]
    fn test_partial_config_overrides() {
        let config = Config::parse(
            r#"
[dap]
port = 4711

[evaluator]
jpath = ["vendor", "lib"]

[logging]
level = "debug"
"#,
        )
        .unwrap();
        assert_eq!(config.dap.port, 4711);
        assert_eq!(config.dap.host, "127.0.0.1");
        assert_eq!(config.evaluator.jpath.len(), 2);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_invalid_config_is_reported() {
        let err = Config::parse("[dap]\nport = \"not a port\"").unwrap_err();
        assert!(matches!(err, crate::common::Error::ConfigParse(_)));
    }
}
