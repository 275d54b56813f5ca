use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Runtime settings, read from `config.toml`. Every field has a default so a
/// partial file (or none at all) is fine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Sent by the browser and by the font download; they must agree or the
    /// font server may hand out a different glyph order.
    pub user_agent: String,
    pub accept_language: String,
    pub headless: bool,
    pub chrome_path: Option<PathBuf>,
    pub navigation_timeout_secs: u64,
    pub settle_delay_ms: u64,
    pub slow_settle_delay_ms: u64,
    pub detail_delay_min_ms: u64,
    pub detail_delay_max_ms: u64,
    pub font_connect_timeout_secs: u64,
    pub font_read_timeout_secs: u64,
    pub workers: usize,
    pub default_city: String,
    pub database: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept_language: "zh-CN,zh;q=0.9".to_string(),
            headless: true,
            chrome_path: None,
            navigation_timeout_secs: 30,
            settle_delay_ms: 3000,
            slow_settle_delay_ms: 5000,
            detail_delay_min_ms: 1000,
            detail_delay_max_ms: 2000,
            font_connect_timeout_secs: 5,
            font_read_timeout_secs: 5,
            workers: 2,
            default_city: "全国".to_string(),
            database: None,
        }
    }
}

impl Config {
    /// Loads `path` if given, otherwise the per-user config file. A missing
    /// file means defaults; a file that exists but does not parse is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) => p,
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let config: Config = toml::from_str(raw)?;
        Ok(config)
    }

    fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "jobcrawl")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn slow_settle_delay(&self) -> Duration {
        Duration::from_millis(self.slow_settle_delay_ms)
    }

    pub fn font_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.font_connect_timeout_secs)
    }

    pub fn font_read_timeout(&self) -> Duration {
        Duration::from_secs(self.font_read_timeout_secs)
    }

    /// Inclusive millisecond range for the pause between detail pages.
    pub fn detail_delay_range(&self) -> (u64, u64) {
        let min = self.detail_delay_min_ms;
        (min, self.detail_delay_max_ms.max(min))
    }

    /// Settings with every wait set to zero, for driving crawlers against fixtures.
    #[cfg(test)]
    pub fn without_delays() -> Self {
        Self {
            settle_delay_ms: 0,
            slow_settle_delay_ms: 0,
            detail_delay_min_ms: 0,
            detail_delay_max_ms: 0,
            ..Self::default()
        }
    }
}
