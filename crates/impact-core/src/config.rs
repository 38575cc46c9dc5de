//! impact.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ImpactConfig {
    pub storage: StorageConfig,
    pub backend: BackendConfig,
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/impact"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// How often the queue monitor polls storage for requested items.
    pub monitor_interval: String,
    /// Sleep between polls of an empty queue.
    pub empty_queue_backoff: String,
    /// Upper bound on alias resolution passes per item.
    pub max_alias_passes: u32,
    /// Hard timeout around a single provider call.
    pub provider_timeout: String,
    pub retry: RetryConfig,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            monitor_interval: "1s".to_string(),
            empty_queue_backoff: "500ms".to_string(),
            max_alias_passes: 5,
            provider_timeout: "30s".to_string(),
            retry: RetryConfig::default(),
        }
    }
}

impl BackendConfig {
    pub fn monitor_interval(&self) -> Duration {
        parse_duration(&self.monitor_interval).unwrap_or(Duration::from_secs(1))
    }

    pub fn empty_queue_backoff(&self) -> Duration {
        parse_duration(&self.empty_queue_backoff).unwrap_or(Duration::from_millis(500))
    }

    pub fn provider_timeout(&self) -> Duration {
        parse_duration(&self.provider_timeout).unwrap_or(Duration::from_secs(30))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: String,
    pub max_delay: String,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: "1s".to_string(),
            max_delay: "60s".to_string(),
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        parse_duration(&self.base_delay).unwrap_or(Duration::from_secs(1))
    }

    pub fn max_delay(&self) -> Duration {
        parse_duration(&self.max_delay).unwrap_or(Duration::from_secs(60))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub github: GithubConfig,
    pub pubmed: PubmedConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GithubConfig {
    pub enabled: bool,
    /// Optional token; raises the API rate limit when set.
    pub api_token: Option<String>,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PubmedConfig {
    pub enabled: bool,
    /// Contact address sent with every eutils request.
    pub email: String,
    pub tool: String,
}

impl Default for PubmedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            email: "team@impact.invalid".to_string(),
            tool: "impact".to_string(),
        }
    }
}

impl ImpactConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ImpactConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Scaffold a starter impact.toml rooted at `data_dir`.
    pub fn scaffold(data_dir: &Path) -> Self {
        ImpactConfig {
            storage: StorageConfig {
                data_dir: data_dir.to_path_buf(),
            },
            ..Default::default()
        }
    }
}

/// Parse `"250ms"`, `"5s"` or `"2m"` into a duration.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim().parse::<u64>().ok().map(|m| Duration::from_secs(m.saturating_mul(60)))
    } else {
        None
    }
}
