//! takt-config - 配置加载库

use std::collections::HashMap;

use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use thiserror::Error;

use secrecy::Secret;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] figment::Error),
}

/// Redis 配置
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: Secret<String>,
    /// 键前缀（多环境共用一个实例时隔离用）
    #[serde(default)]
    pub key_prefix: Option<String>,
}

/// 单个资源类型的 TTL 覆盖
#[derive(Debug, Clone, Deserialize)]
pub struct TtlOverride {
    pub ttl_secs: u64,
    pub stale_ttl_secs: Option<u64>,
}

/// 缓存编排配置
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// 默认 fresh TTL（秒）
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
    /// 默认 stale TTL（秒），必须 >= fresh TTL
    #[serde(default = "default_stale_ttl_secs")]
    pub default_stale_ttl_secs: u64,
    /// 负缓存（not-found）TTL（秒）
    #[serde(default = "default_not_found_ttl_secs")]
    pub not_found_ttl_secs: u64,
    /// 按 cache_name 的 TTL 覆盖
    #[serde(default)]
    pub ttl_overrides: HashMap<String, TtlOverride>,

    /// 刷新锁最大持有时间（deadman switch）
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,
    /// 锁等待上限（毫秒）
    #[serde(default = "default_lock_wait_ms")]
    pub lock_wait_ms: u64,
    /// 锁轮询间隔（毫秒）
    #[serde(default = "default_lock_retry_ms")]
    pub lock_retry_ms: u64,

    /// 断路器冷却时间（秒）
    #[serde(default = "default_breaker_cooldown_secs")]
    pub breaker_cooldown_secs: u64,

    /// TTL 随机抖动范围（秒），0 表示禁用
    #[serde(default = "default_jitter_range_secs")]
    pub jitter_range_secs: u64,

    /// 后台刷新 worker 数量
    #[serde(default = "default_refresh_workers")]
    pub refresh_workers: usize,
    /// 后台刷新队列深度
    #[serde(default = "default_refresh_queue_depth")]
    pub refresh_queue_depth: usize,
}

fn default_ttl_secs() -> u64 {
    300
}

fn default_stale_ttl_secs() -> u64 {
    86400
}

fn default_not_found_ttl_secs() -> u64 {
    60
}

fn default_lock_ttl_secs() -> u64 {
    30
}

fn default_lock_wait_ms() -> u64 {
    2000
}

fn default_lock_retry_ms() -> u64 {
    100
}

fn default_breaker_cooldown_secs() -> u64 {
    30
}

fn default_jitter_range_secs() -> u64 {
    30
}

fn default_refresh_workers() -> usize {
    4
}

fn default_refresh_queue_depth() -> usize {
    256
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_ttl_secs(),
            default_stale_ttl_secs: default_stale_ttl_secs(),
            not_found_ttl_secs: default_not_found_ttl_secs(),
            ttl_overrides: HashMap::new(),
            lock_ttl_secs: default_lock_ttl_secs(),
            lock_wait_ms: default_lock_wait_ms(),
            lock_retry_ms: default_lock_retry_ms(),
            breaker_cooldown_secs: default_breaker_cooldown_secs(),
            jitter_range_secs: default_jitter_range_secs(),
            refresh_workers: default_refresh_workers(),
            refresh_queue_depth: default_refresh_queue_depth(),
        }
    }
}

/// 遥测配置
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// 应用配置
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app_name: String,
    pub app_env: String,
    pub redis: RedisConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    pub fn load(config_dir: &str) -> Result<Self, ConfigError> {
        // 本地开发时从 .env 注入环境变量，文件不存在则忽略
        dotenvy::dotenv().ok();

        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config: Self = Figment::new()
            .merge(Toml::file(format!("{}/default.toml", config_dir)))
            .merge(Toml::file(format!("{}/{}.toml", config_dir, env)))
            .merge(Env::prefixed("").split("_"))
            .extract()?;

        Ok(config)
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.app_env == "production"
    }

    /// 是否为开发环境
    pub fn is_development(&self) -> bool {
        self.app_env == "development"
    }
}
