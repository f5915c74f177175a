//! Optional config file loading. Search order: ./bilidown.toml, then
//! $XDG_CONFIG_HOME/bilidown/config.toml (or ~/.config/bilidown/config.toml).

use crate::epub::PackageOptions;
use crate::scraper::{SessionConfig, UnmappedGlyph};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot determine current directory: {0}")]
    CurrentDir(#[source] std::io::Error),

    #[error("Cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Config file contents. All fields optional; only present keys override defaults.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct Config {
    /// Default output directory when -o is not set. Paths are relative to CWD.
    pub output_dir: Option<PathBuf>,
    pub user_agent: Option<String>,
    /// Maximum requests in flight, and chapters fetched in parallel.
    pub concurrency: Option<usize>,
    /// Attempts per request for network failures and 429 responses.
    pub retry_count: Option<u32>,
    pub retry_backoff_secs: Option<u64>,
    pub timeout_secs: Option<u64>,
    /// Pause between consecutive pages of one chapter.
    pub page_delay_ms: Option<u64>,
    pub max_pages: Option<u32>,
    pub render_timeout_secs: Option<u64>,
    /// Chromium executable; found on PATH when unset.
    pub chrome_path: Option<PathBuf>,
    /// JSON table mapping substituted glyphs to real characters.
    pub glyph_map: Option<PathBuf>,
    pub unmapped_glyph: Option<UnmappedGlyph>,
    pub text_only: Option<bool>,
    /// Package language tag (default zh-CN).
    pub language: Option<String>,
}

impl Config {
    /// Session settings: defaults overridden by present keys.
    pub fn session_config(&self) -> SessionConfig {
        let defaults = SessionConfig::default();
        SessionConfig {
            user_agent: self.user_agent.clone().or(defaults.user_agent),
            timeout_secs: self.timeout_secs.unwrap_or(defaults.timeout_secs),
            concurrency: self.concurrency.unwrap_or(defaults.concurrency),
            retry_count: self.retry_count.unwrap_or(defaults.retry_count),
            retry_backoff: self
                .retry_backoff_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.retry_backoff),
            page_delay: self
                .page_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.page_delay),
            max_pages: self.max_pages.unwrap_or(defaults.max_pages),
            render_timeout: self
                .render_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.render_timeout),
            chrome_path: self.chrome_path.clone().or(defaults.chrome_path),
            glyph_map: self.glyph_map.clone().or(defaults.glyph_map),
            unmapped_glyph: self.unmapped_glyph.unwrap_or(defaults.unmapped_glyph),
            text_only: self.text_only.unwrap_or(defaults.text_only),
        }
    }

    pub fn package_options(&self) -> PackageOptions {
        let mut options = PackageOptions::default();
        if let Some(language) = &self.language {
            options.language = language.clone();
        }
        options
    }
}

/// Search order: (1) ./bilidown.toml, (2) $XDG_CONFIG_HOME/bilidown/config.toml.
/// Missing file returns Ok(None). Invalid TOML or I/O error reading a present file returns Err.
pub fn load_config() -> Result<Option<Config>, ConfigError> {
    let cwd = std::env::current_dir().map_err(ConfigError::CurrentDir)?;
    let mut paths = vec![cwd.join("bilidown.toml")];
    if let Some(d) = dirs::config_dir() {
        paths.push(d.join("bilidown").join("config.toml"));
    }
    for path in &paths {
        if path.exists() {
            let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
            let config: Config = toml::from_str(&s).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?;
            return Ok(Some(config));
        }
    }
    Ok(None)
}
