//! singleflight 刷新锁
//!
//! 基于存储层 set-if-absent 原语的分布式互斥：每个缓存键同一时刻
//! 最多一个持有者在回源。锁值是随机 token，释放时用
//! compare-and-delete 校验，持有期超时后别人接管的锁不会被误删。
//!
//! 锁丢失不中止刷新：结果写入是幂等的，最坏情况是多写一次同样的值。

use std::sync::Arc;
use std::time::Duration;

use takt_errors::AppResult;
use takt_ports::CachePort;
use tracing::{debug, warn};
use uuid::Uuid;

/// 锁键前缀，与数据键空间隔离
const LOCK_PREFIX: &str = "lock:";

/// 刷新锁参数
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// 锁持有时间，须大于一次回源的最坏耗时
    pub hold_ttl: Duration,
    /// 跟随者等待锁释放的总时长
    pub wait_timeout: Duration,
    /// 跟随者轮询间隔
    pub retry_interval: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            hold_ttl: Duration::from_secs(30),
            wait_timeout: Duration::from_secs(2),
            retry_interval: Duration::from_millis(100),
        }
    }
}

/// singleflight 锁
pub struct RefreshLock {
    store: Arc<dyn CachePort>,
    config: LockConfig,
}

impl RefreshLock {
    pub fn new(store: Arc<dyn CachePort>, config: LockConfig) -> Self {
        Self { store, config }
    }

    fn lock_key(key: &str) -> String {
        format!("{}{}", LOCK_PREFIX, key)
    }

    /// 非阻塞尝试加锁，None 表示锁已被别人持有
    pub async fn try_acquire(&self, key: &str) -> AppResult<Option<RefreshLockGuard>> {
        let lock_key = Self::lock_key(key);
        let token = Uuid::new_v4().to_string();
        let acquired = self
            .store
            .set_nx(&lock_key, &token, self.config.hold_ttl)
            .await?;
        if acquired {
            debug!(key = %key, "Refresh lock acquired");
            Ok(Some(RefreshLockGuard {
                store: self.store.clone(),
                lock_key,
                token,
            }))
        } else {
            Ok(None)
        }
    }

    /// 等待参数，跟随者轮询循环用
    pub fn config(&self) -> &LockConfig {
        &self.config
    }
}

/// 持有中的刷新锁
///
/// 必须显式 release；不实现 Drop 释放，进程崩溃时依赖锁 TTL 过期
pub struct RefreshLockGuard {
    store: Arc<dyn CachePort>,
    lock_key: String,
    token: String,
}

impl RefreshLockGuard {
    /// 释放锁。只删除 token 匹配的锁，持有期超时后被他人接管的锁原样保留
    pub async fn release(self) {
        match self
            .store
            .delete_if_equals(&self.lock_key, &self.token)
            .await
        {
            Ok(true) => debug!(key = %self.lock_key, "Refresh lock released"),
            Ok(false) => {
                warn!(key = %self.lock_key, "Refresh lock expired before release, held too long")
            }
            Err(e) => {
                // 释放失败不影响正确性，锁会随 TTL 过期
                warn!(key = %self.lock_key, error = %e, "Failed to release refresh lock")
            }
        }
    }
}
