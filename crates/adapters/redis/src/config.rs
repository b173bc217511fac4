//! Redis 配置模块

use serde::{Deserialize, Serialize};
use std::time::Duration;
use takt_common::RetryConfig;

/// Redis 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis URL
    pub url: String,
    /// 键前缀
    #[serde(default)]
    pub key_prefix: Option<String>,
    /// 连接超时
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: Duration,
    /// 重试配置
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_connection_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: None,
            connection_timeout: default_connection_timeout(),
            retry: RetryConfig::default(),
        }
    }
}

impl RedisConfig {
    /// 创建新的配置
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// 设置键前缀
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// 设置重试配置
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// 获取带前缀的键
    pub fn prefixed_key(&self, key: &str) -> String {
        match &self.key_prefix {
            Some(prefix) => format!("{}:{}", prefix, key),
            None => key.to_string(),
        }
    }
}
