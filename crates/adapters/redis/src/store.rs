//! Redis 键值存储实现
//!
//! 所有操作走带退避的重试包装；键不存在返回 Ok(None)，
//! 只有传输层错误映射为 AppError::Backend

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::time::Duration;
use takt_common::{is_retryable_error, with_conditional_retry};
use takt_errors::{AppError, AppResult};
use takt_ports::CachePort;

use crate::config::RedisConfig;

/// Redis 键值存储
pub struct RedisStore {
    conn: ConnectionManager,
    config: RedisConfig,
}

impl RedisStore {
    pub fn new(conn: ConnectionManager, config: RedisConfig) -> Self {
        Self { conn, config }
    }

    fn key(&self, key: &str) -> String {
        self.config.prefixed_key(key)
    }

    /// 判断 AppError 是否为可重试的传输层故障
    fn retryable(error: &AppError) -> bool {
        is_retryable_error(&error.to_string())
    }

    async fn get_inner(&self, key: &str) -> AppResult<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(key)
            .await
            .map_err(|e| AppError::backend(format!("Redis get failed: {}", e)))
    }

    async fn set_inner(&self, key: &str, value: &str, ttl: Option<Duration>) -> AppResult<()> {
        let mut conn = self.conn.clone();
        match ttl {
            Some(duration) => conn
                .set_ex(key, value, duration.as_secs())
                .await
                .map_err(|e| AppError::backend(format!("Redis set failed: {}", e))),
            None => conn
                .set(key, value)
                .await
                .map_err(|e| AppError::backend(format!("Redis set failed: {}", e))),
        }
    }

    async fn delete_inner(&self, key: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        conn.del(key)
            .await
            .map_err(|e| AppError::backend(format!("Redis delete failed: {}", e)))
    }

    async fn exists_inner(&self, key: &str) -> AppResult<bool> {
        let mut conn = self.conn.clone();
        conn.exists(key)
            .await
            .map_err(|e| AppError::backend(format!("Redis exists failed: {}", e)))
    }

    /// SET NX PX：原子性地设置键和过期时间（毫秒精度，锁 TTL 用）
    async fn set_nx_inner(&self, key: &str, value: &str, ttl: Duration) -> AppResult<bool> {
        let mut conn = self.conn.clone();
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(|e| AppError::backend(format!("Redis set_nx failed: {}", e)))?;

        Ok(result.is_some())
    }

    /// Lua 脚本原子性比较并删除，防止误删其他持有者的锁
    async fn delete_if_equals_inner(&self, key: &str, expected_value: &str) -> AppResult<bool> {
        let mut conn = self.conn.clone();
        let script = Script::new(
            r"
            if redis.call('GET', KEYS[1]) == ARGV[1] then
                return redis.call('DEL', KEYS[1])
            else
                return 0
            end
            ",
        );

        let deleted: i64 = script
            .key(key)
            .arg(expected_value)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| AppError::backend(format!("Redis delete_if_equals failed: {}", e)))?;

        Ok(deleted > 0)
    }
}

#[async_trait]
impl CachePort for RedisStore {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let key = self.key(key);
        with_conditional_retry(
            &self.config.retry,
            "redis.get",
            || self.get_inner(&key),
            Self::retryable,
        )
        .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> AppResult<()> {
        let key = self.key(key);
        with_conditional_retry(
            &self.config.retry,
            "redis.set",
            || self.set_inner(&key, value, ttl),
            Self::retryable,
        )
        .await
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        let key = self.key(key);
        with_conditional_retry(
            &self.config.retry,
            "redis.delete",
            || self.delete_inner(&key),
            Self::retryable,
        )
        .await
    }

    async fn exists(&self, key: &str) -> AppResult<bool> {
        let key = self.key(key);
        with_conditional_retry(
            &self.config.retry,
            "redis.exists",
            || self.exists_inner(&key),
            Self::retryable,
        )
        .await
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> AppResult<bool> {
        // SETNX 不重试：重试可能把自己刚拿到的锁判为"已被占用"
        let key = self.key(key);
        self.set_nx_inner(&key, value, ttl).await
    }

    async fn delete_if_equals(&self, key: &str, expected_value: &str) -> AppResult<bool> {
        let key = self.key(key);
        with_conditional_retry(
            &self.config.retry,
            "redis.delete_if_equals",
            || self.delete_if_equals_inner(&key, expected_value),
            Self::retryable,
        )
        .await
    }
}
