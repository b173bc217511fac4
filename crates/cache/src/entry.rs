//! fresh/stale 双份条目存储
//!
//! 每个逻辑键写两份物理条目：
//! - `{key}`          fresh 条目，短 TTL，命中即直接返回
//! - `{key}::stale`   stale 条目，长 TTL，fresh 过期后的回源保底
//!
//! 写入顺序固定为先 stale 后 fresh：两次写之间任何时刻崩溃，
//! 都不会出现 fresh 存在而 stale 不存在的状态。
//!
//! 上游确定性 404 用负缓存标记值记在 fresh 键下（不写 stale），
//! 标记过期后允许重新回源。

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use serde::de::DeserializeOwned;
use takt_errors::AppResult;
use takt_ports::CachePort;
use tracing::{debug, warn};

/// stale 条目的键后缀
pub const STALE_SUFFIX: &str = "::stale";

/// 负缓存标记值。正常业务值都是 JSON 文档，不会与之冲突
const NOT_FOUND_MARKER: &str = "__takt_not_found__";

/// 一对条目的 TTL 配置
#[derive(Debug, Clone, Copy)]
pub struct EntryTtl {
    /// fresh 条目存活时间
    pub ttl: Duration,
    /// stale 条目存活时间（应远大于 ttl）
    pub stale_ttl: Duration,
}

/// fresh 条目的读取结果
#[derive(Debug, Clone, PartialEq)]
pub enum FreshRead<T> {
    /// fresh 值存在且可解码
    Value(T),
    /// 负缓存标记命中：上游确定这个资源不存在
    NotFound,
    /// 条目不存在（或已过期、或无法解码）
    Absent,
}

/// fresh/stale 条目读写器
pub struct EntryStore {
    store: Arc<dyn CachePort>,
    /// 写入时叠加的随机 TTL 抖动上限，0 关闭抖动
    jitter_range: Duration,
}

impl EntryStore {
    pub fn new(store: Arc<dyn CachePort>, jitter_range: Duration) -> Self {
        Self { store, jitter_range }
    }

    /// stale 条目的物理键
    pub fn stale_key(key: &str) -> String {
        format!("{}{}", key, STALE_SUFFIX)
    }

    /// 读取 fresh 条目
    pub async fn read_fresh<T: DeserializeOwned>(&self, key: &str) -> AppResult<FreshRead<T>> {
        match self.store.get(key).await? {
            Some(raw) if raw == NOT_FOUND_MARKER => Ok(FreshRead::NotFound),
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(value) => Ok(FreshRead::Value(value)),
                Err(e) => {
                    // 解码失败视同未命中，走回源路径覆盖掉坏数据
                    warn!(key = %key, error = %e, "Failed to decode cache entry, treating as miss");
                    Ok(FreshRead::Absent)
                }
            },
            None => Ok(FreshRead::Absent),
        }
    }

    /// 读取 stale 条目
    pub async fn read_stale<T: DeserializeOwned>(&self, key: &str) -> AppResult<Option<T>> {
        let stale_key = Self::stale_key(key);
        match self.store.get(&stale_key).await? {
            Some(raw) if raw == NOT_FOUND_MARKER => Ok(None),
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(value) => Ok(Some(value)),
                Err(e) => {
                    warn!(key = %stale_key, error = %e, "Failed to decode stale entry, treating as miss");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    /// 写入一对条目：先 stale，后 fresh
    pub async fn put_pair<T: Serialize>(&self, key: &str, value: &T, ttl: EntryTtl) -> AppResult<()> {
        let raw = serde_json::to_string(value)
            .map_err(|e| takt_errors::AppError::serialization(e.to_string()))?;
        self.store
            .set(
                &Self::stale_key(key),
                &raw,
                Some(self.jittered(ttl.stale_ttl)),
            )
            .await?;
        self.store.set(key, &raw, Some(self.jittered(ttl.ttl))).await?;
        debug!(
            key = %key,
            ttl_secs = ttl.ttl.as_secs(),
            stale_ttl_secs = ttl.stale_ttl.as_secs(),
            "Cache entry pair written"
        );
        Ok(())
    }

    /// 写入负缓存标记，只占 fresh 键
    pub async fn put_not_found(&self, key: &str, ttl: Duration) -> AppResult<()> {
        self.store
            .set(key, NOT_FOUND_MARKER, Some(self.jittered(ttl)))
            .await?;
        debug!(key = %key, ttl_secs = ttl.as_secs(), "Negative cache entry written");
        Ok(())
    }

    /// 删除一个逻辑键的两份条目
    pub async fn invalidate(&self, key: &str) -> AppResult<()> {
        self.store.delete(key).await?;
        self.store.delete(&Self::stale_key(key)).await?;
        Ok(())
    }

    fn jittered(&self, ttl: Duration) -> Duration {
        if self.jitter_range.is_zero() {
            return ttl;
        }
        let jitter_ms = rand::thread_rng().gen_range(0..=self.jitter_range.as_millis() as u64);
        ttl + Duration::from_millis(jitter_ms)
    }
}
