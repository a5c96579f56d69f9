use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

pub const DEFAULT_PREFIX: &str = "#pixiv";
pub const DEFAULT_MAX_RESULTS: u32 = 3;
pub const MAX_RESULTS_LIMIT: u32 = 10;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub onebot: OneBotConfig,
    #[serde(default)]
    pub pixiv: PluginConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

/// Connection to the OneBot v11 implementation (NapCat, Lagrange, ...).
#[derive(Debug, Deserialize, Clone)]
pub struct OneBotConfig {
    /// Base URL of the OneBot HTTP API; actions are POSTed to `{api_base}/{action}`.
    #[serde(default = "default_onebot_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub access_token: Option<String>,
    /// Address the event webhook listens on.
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_action_timeout_secs")]
    pub action_timeout_secs: u64,
}

/// User-facing switches, editable at runtime through the config endpoints.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PluginConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_prefix", alias = "commandPrefix")]
    pub command_prefix: String,
    #[serde(default = "default_max_results", alias = "maxResults")]
    pub max_results: u32,
    #[serde(default, alias = "allowR18")]
    pub allow_r18: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    #[serde(default = "default_source_api_base")]
    pub api_base: String,
    #[serde(default = "default_ranking_url")]
    pub ranking_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_head_timeout_secs")]
    pub head_timeout_secs: u64,
    #[serde(default = "default_range_timeout_secs")]
    pub range_timeout_secs: u64,
}

/// Anti-throttle delay applied before forwarding into a group.
#[derive(Debug, Deserialize, Clone)]
pub struct DeliveryConfig {
    #[serde(default = "default_jitter_base_ms")]
    pub jitter_base_ms: u64,
    #[serde(default = "default_jitter_extra_ms")]
    pub jitter_extra_ms: u64,
}

/// Partial update sent by the config endpoint. Accepts both snake_case and
/// the camelCase keys used by the WebUI.
#[derive(Debug, Deserialize, Default)]
pub struct PluginConfigPatch {
    pub enabled: Option<bool>,
    #[serde(alias = "commandPrefix")]
    pub command_prefix: Option<String>,
    #[serde(alias = "maxResults")]
    pub max_results: Option<u32>,
    #[serde(alias = "allowR18")]
    pub allow_r18: Option<bool>,
}

fn default_onebot_api_base() -> String {
    "http://127.0.0.1:3000".to_string()
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_action_timeout_secs() -> u64 {
    15
}

fn default_enabled() -> bool {
    true
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

fn default_max_results() -> u32 {
    DEFAULT_MAX_RESULTS
}

fn default_source_api_base() -> String {
    "https://api.lolicon.app/setu/v2".to_string()
}

fn default_ranking_url() -> String {
    "https://api.obfs.dev/api/pixiv/rank".to_string()
}

fn default_timeout_secs() -> u64 {
    9
}

fn default_head_timeout_secs() -> u64 {
    5
}

fn default_range_timeout_secs() -> u64 {
    7
}

fn default_jitter_base_ms() -> u64 {
    800
}

fn default_jitter_extra_ms() -> u64 {
    1200
}

impl Default for OneBotConfig {
    fn default() -> Self {
        Self {
            api_base: default_onebot_api_base(),
            access_token: None,
            listen: default_listen(),
            action_timeout_secs: default_action_timeout_secs(),
        }
    }
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            command_prefix: default_prefix(),
            max_results: default_max_results(),
            allow_r18: false,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            api_base: default_source_api_base(),
            ranking_url: default_ranking_url(),
            timeout_secs: default_timeout_secs(),
            head_timeout_secs: default_head_timeout_secs(),
            range_timeout_secs: default_range_timeout_secs(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            jitter_base_ms: default_jitter_base_ms(),
            jitter_extra_ms: default_jitter_extra_ms(),
        }
    }
}

impl PluginConfig {
    /// The configured prefix, or `#pixiv` when left blank.
    pub fn prefix(&self) -> &str {
        if self.command_prefix.is_empty() {
            DEFAULT_PREFIX
        } else {
            &self.command_prefix
        }
    }

    /// Results per request, clamped into `1..=10`. Zero means "unset".
    pub fn effective_max_results(&self) -> usize {
        let n = if self.max_results == 0 {
            DEFAULT_MAX_RESULTS
        } else {
            self.max_results
        };
        n.clamp(1, MAX_RESULTS_LIMIT) as usize
    }

    pub fn apply(&mut self, patch: PluginConfigPatch) {
        if let Some(enabled) = patch.enabled {
            self.enabled = enabled;
        }
        if let Some(prefix) = patch.command_prefix {
            self.command_prefix = prefix;
        }
        if let Some(max_results) = patch.max_results {
            self.max_results = max_results;
        }
        if let Some(allow_r18) = patch.allow_r18 {
            self.allow_r18 = allow_r18;
        }
    }
}

impl SourceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn head_timeout(&self) -> Duration {
        Duration::from_secs(self.head_timeout_secs)
    }

    pub fn range_timeout(&self) -> Duration {
        Duration::from_secs(self.range_timeout_secs)
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        if config.pixiv.max_results > MAX_RESULTS_LIMIT {
            tracing::warn!(
                "pixiv.max_results = {} exceeds {}, it will be clamped",
                config.pixiv.max_results,
                MAX_RESULTS_LIMIT
            );
        }
        Ok(config)
    }
}

/// Owner of the live plugin config. Readers take an immutable snapshot per
/// event; writers swap in a whole new value.
#[derive(Debug, Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<Arc<PluginConfig>>>,
}

impl ConfigHandle {
    pub fn new(config: PluginConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    pub async fn snapshot(&self) -> Arc<PluginConfig> {
        self.inner.read().await.clone()
    }

    pub async fn replace(&self, config: PluginConfig) {
        *self.inner.write().await = Arc::new(config);
    }

    /// Merge a partial JSON object into the current config.
    pub async fn merge(&self, patch: serde_json::Value) -> Result<Arc<PluginConfig>> {
        let patch: PluginConfigPatch =
            serde_json::from_value(patch).context("Invalid config patch")?;
        let mut guard = self.inner.write().await;
        let mut next = (**guard).clone();
        next.apply(patch);
        let next = Arc::new(next);
        *guard = next.clone();
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_when_sections_missing() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.pixiv, PluginConfig::default());
        assert!(config.pixiv.enabled);
        assert_eq!(config.pixiv.command_prefix, "#pixiv");
        assert_eq!(config.pixiv.max_results, 3);
        assert!(!config.pixiv.allow_r18);
        assert_eq!(config.source.timeout(), Duration::from_secs(9));
        assert_eq!(config.onebot.api_base, "http://127.0.0.1:3000");
    }

    #[test]
    fn test_parse_full_file() {
        let config = Config::parse(
            r##"
            [onebot]
            api_base = "http://10.0.0.2:5700"
            access_token = "secret"
            listen = "0.0.0.0:9000"

            [pixiv]
            enabled = false
            command_prefix = "/p"
            max_results = 5
            allow_r18 = true

            [delivery]
            jitter_base_ms = 0
            jitter_extra_ms = 0
            "##,
        )
        .unwrap();
        assert_eq!(config.onebot.access_token.as_deref(), Some("secret"));
        assert_eq!(config.onebot.listen, "0.0.0.0:9000");
        assert!(!config.pixiv.enabled);
        assert_eq!(config.pixiv.prefix(), "/p");
        assert_eq!(config.pixiv.max_results, 5);
        assert!(config.pixiv.allow_r18);
        assert_eq!(config.delivery.jitter_base_ms, 0);
    }

    #[test]
    fn test_effective_max_results_is_clamped() {
        let mut config = PluginConfig::default();
        config.max_results = 0;
        assert_eq!(config.effective_max_results(), 3);
        config.max_results = 1;
        assert_eq!(config.effective_max_results(), 1);
        config.max_results = 42;
        assert_eq!(config.effective_max_results(), 10);
    }

    #[test]
    fn test_blank_prefix_falls_back() {
        let mut config = PluginConfig::default();
        config.command_prefix = String::new();
        assert_eq!(config.prefix(), "#pixiv");
    }

    #[tokio::test]
    async fn test_merge_accepts_camel_case_keys() {
        let handle = ConfigHandle::new(PluginConfig::default());
        let before = handle.snapshot().await;

        let merged = handle
            .merge(json!({ "maxResults": 7, "allowR18": true }))
            .await
            .unwrap();
        assert_eq!(merged.max_results, 7);
        assert!(merged.allow_r18);
        assert_eq!(merged.command_prefix, "#pixiv");

        // Snapshots taken earlier are unaffected.
        assert_eq!(before.max_results, 3);
        assert_eq!(handle.snapshot().await.max_results, 7);
    }

    #[tokio::test]
    async fn test_merge_rejects_bad_types() {
        let handle = ConfigHandle::new(PluginConfig::default());
        assert!(handle.merge(json!({ "enabled": "yes" })).await.is_err());
        assert!(handle.snapshot().await.enabled);
    }

    #[tokio::test]
    async fn test_replace_swaps_whole_config() {
        let handle = ConfigHandle::new(PluginConfig::default());
        handle
            .replace(PluginConfig {
                enabled: false,
                command_prefix: "!px".to_string(),
                max_results: 2,
                allow_r18: false,
            })
            .await;
        let current = handle.snapshot().await;
        assert!(!current.enabled);
        assert_eq!(current.prefix(), "!px");
    }
}
