use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::assistant::DEFAULT_TRIGGER;
use crate::debounce::DEFAULT_QUIET_PERIOD;
use crate::playback::DEFAULT_POLL_INTERVAL;
use crate::transcript::scroll::DEFAULT_BUFFER_FRACTION;

pub const API_KEY_ENV: &str = "TUBENOTES_API_KEY";
pub const DB_PATH_ENV: &str = "TUBENOTES_DB";

/// `[service]`: the transcription and AI endpoint.
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct ServiceConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub api_key_command: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct EditorConfig {
    pub save_debounce_ms: Option<u64>,
    pub ai_trigger: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct PlaybackConfig {
    pub poll_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct TranscriptConfig {
    /// Fraction of the viewport kept clear above and below the active line.
    pub scroll_buffer: Option<f64>,
}

/// Top-level tubenotes config file structure.
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub editor: EditorConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub transcript: TranscriptConfig,
}

impl AppConfig {
    /// Load config from ~/.tubenotes/config.toml. Returns default if file doesn't exist.
    pub fn load() -> Result<Self> {
        let path = config_path()?;
        if !path.exists() {
            return Ok(AppConfig::default());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).with_context(|| "Failed to parse config.toml")
    }

    pub fn save_debounce(&self) -> Duration {
        self.editor
            .save_debounce_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_QUIET_PERIOD)
    }

    pub fn ai_trigger(&self) -> String {
        self.editor
            .ai_trigger
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_TRIGGER.to_string())
    }

    pub fn poll_interval(&self) -> Duration {
        self.playback
            .poll_interval_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_POLL_INTERVAL)
    }

    pub fn scroll_buffer(&self) -> f64 {
        self.transcript
            .scroll_buffer
            .filter(|f| f.is_finite())
            .unwrap_or(DEFAULT_BUFFER_FRACTION)
    }

    /// Display config with secrets redacted.
    pub fn display_redacted(&self) -> String {
        let mut lines = vec!["[service]".to_string()];
        let sc = &self.service;
        if let Some(ref url) = sc.base_url {
            lines.push(format!("  base_url = \"{}\"", url));
        }
        if let Some(ref key) = sc.api_key {
            lines.push(format!("  api_key = \"{}\"", redact(key)));
        }
        if let Some(ref cmd) = sc.api_key_command {
            lines.push(format!("  api_key_command = \"{}\"", cmd));
        }
        lines.push("[editor]".to_string());
        lines.push(format!("  save_debounce_ms = {}", self.save_debounce().as_millis()));
        lines.push(format!("  ai_trigger = \"{}\"", self.ai_trigger()));
        lines.push("[playback]".to_string());
        lines.push(format!("  poll_interval_ms = {}", self.poll_interval().as_millis()));
        lines.push("[transcript]".to_string());
        lines.push(format!("  scroll_buffer = {}", self.scroll_buffer()));
        lines.join("\n")
    }
}

fn redact(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() > 8 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}...{tail}")
    } else {
        "****".to_string()
    }
}

/// Resolve the service API key: CLI flag > env var > config key > config
/// command. `Ok(None)` when nothing is configured; the service may not need one.
pub fn resolve_api_key(cli_flag: Option<&str>, config: &ServiceConfig) -> Result<Option<String>> {
    resolve_credential(cli_flag, std::env::var(API_KEY_ENV).ok(), config)
}

fn resolve_credential(
    cli_flag: Option<&str>,
    env_value: Option<String>,
    sc: &ServiceConfig,
) -> Result<Option<String>> {
    // 1. CLI flag
    if let Some(key) = cli_flag.filter(|k| !k.is_empty()) {
        return Ok(Some(key.to_string()));
    }

    // 2. Environment variable
    if let Some(val) = env_value.filter(|v| !v.is_empty()) {
        return Ok(Some(val));
    }

    // 3. Config file api_key
    if let Some(key) = sc.api_key.as_ref().filter(|k| !k.is_empty()) {
        return Ok(Some(key.clone()));
    }

    // 4. External command
    if let Some(cmd) = sc.api_key_command.as_ref().filter(|c| !c.is_empty()) {
        let output = std::process::Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .output()
            .with_context(|| format!("Failed to run api_key_command: {cmd}"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "api_key_command failed (exit {}): {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            );
        }

        let secret = String::from_utf8(output.stdout)
            .context("api_key_command output is not valid UTF-8")?
            .trim()
            .to_string();

        if !secret.is_empty() {
            return Ok(Some(secret));
        }
    }

    Ok(None)
}

/// Database path: `--db` flag > `TUBENOTES_DB` > ~/.tubenotes/tubenotes.db
pub fn resolve_db_path(cli_flag: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = cli_flag {
        return Ok(path);
    }
    if let Some(path) = std::env::var_os(DB_PATH_ENV).filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    crate::db::Database::default_db_path()
}

/// Path to the config file: ~/.tubenotes/config.toml
pub fn config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".tubenotes").join("config.toml"))
}

/// Default config template content.
pub fn default_config_template() -> &'static str {
    r#"# ~/.tubenotes/config.toml
# Credential resolution order: --api-key > TUBENOTES_API_KEY > api_key > api_key_command

[service]
# base_url = "http://localhost:3000/api"
# api_key = "your-api-key"
# api_key_command = "your-secrets-manager-command-here"

[editor]
# save_debounce_ms = 1000
# ai_trigger = "/ai"

[playback]
# poll_interval_ms = 100

[transcript]
# scroll_buffer = 0.3
"#
}

/// Create the default config file if it doesn't already exist.
pub fn init_config() -> Result<bool> {
    let path = config_path()?;
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, default_config_template())?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_parses_to_defaults() {
        let config = AppConfig::parse(default_config_template()).unwrap();
        assert_eq!(config.save_debounce(), Duration::from_millis(1000));
        assert_eq!(config.ai_trigger(), "/ai");
        assert_eq!(config.poll_interval(), Duration::from_millis(100));
        assert_eq!(config.scroll_buffer(), 0.3);
    }

    #[test]
    fn sections_override_defaults() {
        let config = AppConfig::parse(
            r#"
            [service]
            base_url = "https://notes.example.com/api"
            [editor]
            save_debounce_ms = 250
            ai_trigger = "/ask"
            [playback]
            poll_interval_ms = 0
            "#,
        )
        .unwrap();
        assert_eq!(config.service.base_url.as_deref(), Some("https://notes.example.com/api"));
        assert_eq!(config.save_debounce(), Duration::from_millis(250));
        assert_eq!(config.ai_trigger(), "/ask");
        assert_eq!(config.poll_interval(), DEFAULT_POLL_INTERVAL);

        let nan = AppConfig::parse("[transcript]\nscroll_buffer = nan").unwrap();
        assert_eq!(nan.scroll_buffer(), DEFAULT_BUFFER_FRACTION);
    }

    #[test]
    fn credential_chain_order() {
        let sc = ServiceConfig {
            api_key: Some("from-config".into()),
            api_key_command: Some("echo from-command".into()),
            ..ServiceConfig::default()
        };
        assert_eq!(
            resolve_credential(Some("flag"), Some("env".into()), &sc).unwrap().as_deref(),
            Some("flag")
        );
        assert_eq!(
            resolve_credential(Some(""), Some("env".into()), &sc).unwrap().as_deref(),
            Some("env")
        );
        assert_eq!(
            resolve_credential(None, None, &sc).unwrap().as_deref(),
            Some("from-config")
        );
        let command_only = ServiceConfig {
            api_key_command: Some("echo from-command".into()),
            ..ServiceConfig::default()
        };
        assert_eq!(
            resolve_credential(None, None, &command_only).unwrap().as_deref(),
            Some("from-command")
        );
        assert!(resolve_credential(None, None, &ServiceConfig::default())
            .unwrap()
            .is_none());
    }

    #[test]
    fn failing_command_is_an_error() {
        let sc = ServiceConfig {
            api_key_command: Some("exit 3".into()),
            ..ServiceConfig::default()
        };
        assert!(resolve_credential(None, None, &sc).is_err());
    }

    #[test]
    fn redacts_keys() {
        let config = AppConfig {
            service: ServiceConfig {
                api_key: Some("sk-1234567890abcd".into()),
                ..ServiceConfig::default()
            },
            ..AppConfig::default()
        };
        let shown = config.display_redacted();
        assert!(shown.contains("sk-1...abcd"));
        assert!(!shown.contains("567890"));
        assert_eq!(redact("short"), "****");
    }
}
