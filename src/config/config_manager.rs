// src/config/config_manager.rs

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::time::Duration;
use tracing::warn;

use crate::bidding::breaker::CircuitBreakerConfig;
use crate::error::ConfigError;

/// 竞价超时设置（毫秒）
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AuctionSettings {
    pub default_timeout_ms: u64,
    pub max_timeout_ms: u64,
}

impl Default for AuctionSettings {
    fn default() -> Self {
        Self {
            default_timeout_ms: 1000,
            max_timeout_ms: 2000,
        }
    }
}

/// 熔断器配置：全局默认值 + 按 bidder 名称覆盖
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct BreakerSettings {
    #[serde(default)]
    pub defaults: CircuitBreakerConfig,
    #[serde(default)]
    pub adapters: HashMap<String, CircuitBreakerConfig>,
}

impl BreakerSettings {
    pub fn for_adapter(&self, name: &str) -> CircuitBreakerConfig {
        self.adapters.get(name).copied().unwrap_or(self.defaults)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AdapterSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub endpoint: String,
}

/// 缓存 id 与原有 adm 的关系
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    /// 缓存成功后清空 adm，只返回缓存引用
    #[default]
    Replace,
    /// 保留 adm，同时附带缓存引用
    Augment,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CacheSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub mode: CacheMode,
    #[serde(default = "default_cache_timeout")]
    pub timeout_ms: u64,
    /// 形如 `http://cache.example.com/cache?uuid={uuid}`，`{uuid}` 会被替换
    #[serde(default)]
    pub url_template: Option<String>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: String::new(),
            mode: CacheMode::default(),
            timeout_ms: default_cache_timeout(),
            url_template: None,
        }
    }
}

impl CacheSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.min(MAX_CACHE_TIMEOUT_MS))
    }

    pub fn cache_url(&self, uuid: &str) -> Option<String> {
        self.url_template
            .as_ref()
            .map(|template| template.replace("{uuid}", uuid))
    }
}

/// 缓存调用发生在竞价截止之后，超时上限保证它只是固定的小开销
pub const MAX_CACHE_TIMEOUT_MS: u64 = 500;

fn default_true() -> bool {
    true
}

fn default_cache_timeout() -> u64 {
    100
}

/// **服务整体配置**
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub auction: AuctionSettings,
    #[serde(default)]
    pub circuit_breaker: BreakerSettings,
    #[serde(default)]
    pub adapters: BTreeMap<String, AdapterSettings>,
    #[serde(default)]
    pub cache: CacheSettings,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auction.default_timeout_ms == 0 {
            return Err(ConfigError::Invalid("auction.default_timeout_ms must be > 0".into()));
        }
        if self.auction.max_timeout_ms < self.auction.default_timeout_ms {
            return Err(ConfigError::Invalid(
                "auction.max_timeout_ms must be >= auction.default_timeout_ms".into(),
            ));
        }
        let breakers = std::iter::once(("defaults", &self.circuit_breaker.defaults)).chain(
            self.circuit_breaker
                .adapters
                .iter()
                .map(|(name, cfg)| (name.as_str(), cfg)),
        );
        for (name, cfg) in breakers {
            if cfg.opening_threshold == 0 {
                return Err(ConfigError::Invalid(format!(
                    "circuit_breaker.{}.opening_threshold must be >= 1",
                    name
                )));
            }
        }
        if self.cache.enabled && self.cache.endpoint.is_empty() {
            return Err(ConfigError::Invalid("cache.endpoint is required when cache is enabled".into()));
        }
        if self.cache.enabled && !(1..=MAX_CACHE_TIMEOUT_MS).contains(&self.cache.timeout_ms) {
            return Err(ConfigError::Invalid(format!(
                "cache.timeout_ms must be between 1 and {}",
                MAX_CACHE_TIMEOUT_MS
            )));
        }
        Ok(())
    }

    pub fn enabled_adapters(&self) -> impl Iterator<Item = (&String, &AdapterSettings)> {
        self.adapters.iter().filter(|(_, settings)| settings.enabled)
    }
}

/// 配置来源
pub trait ConfigSource: Send + Sync {
    fn load(&self) -> Result<AppConfig, ConfigError>;
}

/// 从 JSON 文件读取配置；文件不存在时使用默认配置
pub struct FileConfigSource {
    pub path: String,
}

impl FileConfigSource {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
        }
    }
}

impl ConfigSource for FileConfigSource {
    fn load(&self) -> Result<AppConfig, ConfigError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                warn!(path = %self.path, "config file not found, using defaults");
                return Ok(AppConfig::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        let config: AppConfig = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: self.path.clone(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(name: &str, content: &str) -> String {
        let path = std::env::temp_dir().join(format!("rust_prebid_{}_{}.json", name, std::process::id()));
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = FileConfigSource::new("/nonexistent/rust_prebid.json").load().unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn per_adapter_breaker_overrides_defaults() {
        let path = write_temp(
            "overrides",
            r#"{
                "circuit_breaker": {
                    "defaults": { "opening_threshold": 5, "opening_interval_ms": 1000, "closing_interval_ms": 2000 },
                    "adapters": { "pubmatic": { "opening_threshold": 2, "opening_interval_ms": 10, "closing_interval_ms": 20 } }
                },
                "adapters": { "pubmatic": { "endpoint": "http://localhost:9001/bid" } }
            }"#,
        );
        let config = FileConfigSource::new(&path).load().unwrap();
        assert_eq!(config.circuit_breaker.for_adapter("pubmatic").opening_threshold, 2);
        assert_eq!(config.circuit_breaker.for_adapter("other").opening_threshold, 5);
        assert!(config.adapters["pubmatic"].enabled);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let path = write_temp("malformed", "{ not json");
        let result = FileConfigSource::new(&path).load();
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
        let _ = fs::remove_file(path);
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let mut config = AppConfig::default();
        config.circuit_breaker.defaults.opening_threshold = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn cache_timeout_is_bounded() {
        let mut config = AppConfig::default();
        config.cache = CacheSettings {
            enabled: true,
            endpoint: "http://localhost:9001/cache".into(),
            timeout_ms: 5_000,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        assert_eq!(config.cache.timeout(), Duration::from_millis(MAX_CACHE_TIMEOUT_MS));

        config.cache.timeout_ms = 0;
        assert!(config.validate().is_err());

        config.cache.timeout_ms = 100;
        assert!(config.validate().is_ok());
        assert_eq!(config.cache.timeout(), Duration::from_millis(100));
    }

    #[test]
    fn cache_url_fills_template() {
        let settings = CacheSettings {
            url_template: Some("http://cache/cache?uuid={uuid}".into()),
            ..Default::default()
        };
        assert_eq!(settings.cache_url("abc").as_deref(), Some("http://cache/cache?uuid=abc"));
    }
}
