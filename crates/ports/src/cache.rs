//! Cache trait 定义
//!
//! 键不存在返回 Ok(None)，只有传输层故障才返回 Err

use async_trait::async_trait;
use std::time::Duration;
use takt_errors::AppResult;

/// 键值存储 trait
#[async_trait]
pub trait CachePort: Send + Sync {
    /// 获取缓存值
    async fn get(&self, key: &str) -> AppResult<Option<String>>;

    /// 设置缓存值
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> AppResult<()>;

    /// 删除缓存
    async fn delete(&self, key: &str) -> AppResult<()>;

    /// 检查是否存在
    async fn exists(&self, key: &str) -> AppResult<bool>;

    /// 原子性 set-if-absent（用于分布式锁）
    /// 返回 true 表示设置成功，false 表示键已存在
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> AppResult<bool>;

    /// 原子性比较并删除（用于释放分布式锁）
    /// 只有当值匹配时才删除，防止误删其他持有者的锁
    async fn delete_if_equals(&self, key: &str, expected_value: &str) -> AppResult<bool>;
}
