//! 缓存编排器
//!
//! stale-while-revalidate 核心算法，调用方唯一的入口：
//! 1. fresh 命中直接返回，不加锁不回源
//! 2. fresh 过期但有 stale：投递后台刷新（singleflight 保护），立即返回 stale 值
//! 3. 双双缺失：有界等待 singleflight 锁，持锁者同步回源并落盘，
//!    跟随者轮询 fresh 条目，超时前最后再读一次 stale，否则返回 Miss
//! 4. 回源错误分类：NotFound 写负缓存后原样上抛；Upstream/Timeout
//!    做一次 stale 兜底；存储层故障永远不上抛
//!
//! 编排器实例在启动期显式构造注入，没有全局单例。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use takt_errors::{AppError, AppResult};
use takt_ports::{CacheEvent, CacheMetrics};
use tracing::{debug, warn};

use crate::entry::{EntryStore, EntryTtl, FreshRead};
use crate::lock::{RefreshLock, RefreshLockGuard};
use crate::protocol::RefreshProtocol;
use crate::response::{CacheStatus, CachedResponse};
use crate::worker::{RefreshJob, RefreshWorkerPool};

/// TTL 查找表：默认值 + 按资源名的覆盖
#[derive(Debug, Clone)]
pub struct CacheTtlConfig {
    default: EntryTtl,
    not_found_ttl: Duration,
    overrides: HashMap<String, EntryTtl>,
}

impl CacheTtlConfig {
    pub fn new(default: EntryTtl, not_found_ttl: Duration) -> Self {
        Self {
            default,
            not_found_ttl,
            overrides: HashMap::new(),
        }
    }

    /// 为某个资源名设置 TTL 覆盖
    pub fn set_override(&mut self, cache_name: &str, ttl: EntryTtl) {
        self.overrides.insert(cache_name.to_string(), ttl);
    }

    /// 资源名对应的 TTL 对，无覆盖时用默认值
    pub fn ttl_for(&self, cache_name: &str) -> EntryTtl {
        self.overrides
            .get(cache_name)
            .copied()
            .unwrap_or(self.default)
    }

    /// 负缓存标记的存活时间
    pub fn not_found_ttl(&self) -> Duration {
        self.not_found_ttl
    }
}

/// stale-while-revalidate 编排器
pub struct CacheOrchestrator {
    entries: Arc<EntryStore>,
    lock: Arc<RefreshLock>,
    workers: Arc<RefreshWorkerPool>,
    metrics: Arc<dyn CacheMetrics>,
    ttl_config: CacheTtlConfig,
}

impl CacheOrchestrator {
    pub fn new(
        entries: Arc<EntryStore>,
        lock: Arc<RefreshLock>,
        workers: Arc<RefreshWorkerPool>,
        metrics: Arc<dyn CacheMetrics>,
        ttl_config: CacheTtlConfig,
    ) -> Self {
        Self {
            entries,
            lock,
            workers,
            metrics,
            ttl_config,
        }
    }

    /// 按协议读取一份数据，见模块头的四步算法
    pub async fn get_cached_data<P: RefreshProtocol>(
        &self,
        protocol: &Arc<P>,
        params: &P::Params,
    ) -> AppResult<CachedResponse<P::Value>> {
        let key = protocol.cache_key(params);
        let name = protocol.cache_name();

        // 1. fresh 命中：不加锁不回源
        match self.read_fresh::<P::Value>(&key).await {
            FreshRead::Value(value) => {
                self.metrics.record_event(name, CacheEvent::Hit);
                return Ok(CachedResponse::with_value(CacheStatus::Hit, value));
            }
            FreshRead::NotFound => return Err(self.cached_not_found(&key, name)),
            FreshRead::Absent => {}
        }

        // 2. stale 命中：投后台刷新，立即返回旧值
        if let Some(value) = self.read_stale::<P::Value>(&key).await {
            let status = if self.schedule_refresh(protocol, params, &key) {
                self.metrics.record_event(name, CacheEvent::StaleRefresh);
                CacheStatus::StaleRefresh
            } else {
                // 队列满：旧值照样返回，刷新等下一个请求再触发
                self.metrics.record_event(name, CacheEvent::QueueFull);
                self.metrics.record_event(name, CacheEvent::Stale);
                CacheStatus::Stale
            };
            return Ok(CachedResponse::with_value(status, value));
        }

        // 3. 双双缺失：同步回源
        self.refresh_sync(protocol, params, &key).await
    }

    /// 删除某个协议键的全部条目（fresh + stale）
    pub async fn invalidate<P: RefreshProtocol>(
        &self,
        protocol: &Arc<P>,
        params: &P::Params,
    ) -> AppResult<()> {
        let key = protocol.cache_key(params);
        self.entries.invalidate(&key).await
    }

    /// 全缺失路径：有界等锁，持锁者回源，跟随者轮询 fresh
    async fn refresh_sync<P: RefreshProtocol>(
        &self,
        protocol: &Arc<P>,
        params: &P::Params,
        key: &str,
    ) -> AppResult<CachedResponse<P::Value>> {
        let name = protocol.cache_name();
        let wait_timeout = self.lock.config().wait_timeout;
        let retry_interval = self.lock.config().retry_interval;
        let deadline = Instant::now() + wait_timeout;

        loop {
            match self.lock.try_acquire(key).await {
                Ok(Some(guard)) => {
                    return self.fetch_and_store(protocol, params, key, Some(guard)).await;
                }
                Ok(None) => {}
                Err(e) => {
                    // 锁存储不可用：放弃跨副本互斥，直接回源
                    warn!(key = %key, error = %e, "Refresh lock unavailable, fetching without singleflight");
                    return self.fetch_and_store(protocol, params, key, None).await;
                }
            }

            // 跟随者：持锁者写入 fresh 后这里立刻观察到
            match self.read_fresh::<P::Value>(key).await {
                FreshRead::Value(value) => {
                    self.metrics.record_event(name, CacheEvent::Hit);
                    return Ok(CachedResponse::with_value(CacheStatus::Hit, value));
                }
                FreshRead::NotFound => return Err(self.cached_not_found(key, name)),
                FreshRead::Absent => {}
            }

            if Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(retry_interval).await;
        }

        // 等锁超时：stale 可能刚好落盘，最后读一次再放弃
        if let Some(value) = self.read_stale::<P::Value>(key).await {
            self.metrics.record_event(name, CacheEvent::Stale);
            return Ok(CachedResponse::with_value(CacheStatus::Stale, value));
        }
        debug!(key = %key, "Gave up waiting for refresh lock, returning miss");
        self.metrics.record_event(name, CacheEvent::Miss);
        Ok(CachedResponse::miss())
    }

    /// 持锁回源。锁在所有出口路径上释放，落盘失败不丢结果
    async fn fetch_and_store<P: RefreshProtocol>(
        &self,
        protocol: &Arc<P>,
        params: &P::Params,
        key: &str,
        guard: Option<RefreshLockGuard>,
    ) -> AppResult<CachedResponse<P::Value>> {
        let name = protocol.cache_name();

        // 双检：等锁期间上一个持有者可能已经完成刷新
        let guard = match guard {
            Some(guard) => match self.read_fresh::<P::Value>(key).await {
                FreshRead::Value(value) => {
                    guard.release().await;
                    self.metrics.record_event(name, CacheEvent::Hit);
                    return Ok(CachedResponse::with_value(CacheStatus::Hit, value));
                }
                FreshRead::NotFound => {
                    guard.release().await;
                    return Err(self.cached_not_found(key, name));
                }
                FreshRead::Absent => Some(guard),
            },
            None => None,
        };

        let started = Instant::now();
        let fetched = protocol.fetch(params).await;
        self.metrics
            .observe_latency(name, started.elapsed().as_secs_f64());

        match fetched {
            Ok(value) => {
                let ttl = protocol.ttl(&self.ttl_config);
                match protocol.store(&self.entries, key, &value, &ttl).await {
                    Ok(()) => self.metrics.record_event(name, CacheEvent::RefreshOk),
                    Err(e) => {
                        // 值已经在手里，落盘失败只影响下一个请求
                        warn!(key = %key, error = %e, "Failed to persist refreshed entry");
                        self.metrics.record_event(name, CacheEvent::RefreshFailed);
                    }
                }
                if let Some(guard) = guard {
                    guard.release().await;
                }
                self.metrics.record_event(name, CacheEvent::Hit);
                Ok(CachedResponse::with_value(CacheStatus::Hit, value))
            }
            Err(e) => {
                if let Some(guard) = guard {
                    guard.release().await;
                }
                self.handle_fetch_error(e, key, name).await
            }
        }
    }

    /// 回源错误分类（NotFound / 可重试 / 其余）
    async fn handle_fetch_error<V: DeserializeOwned>(
        &self,
        err: AppError,
        key: &str,
        name: &str,
    ) -> AppResult<CachedResponse<V>> {
        match &err {
            AppError::NotFound(_) => {
                // 负缓存：持续缺失的资源短期内不再回源
                if let Err(e) = self
                    .entries
                    .put_not_found(key, self.ttl_config.not_found_ttl())
                    .await
                {
                    warn!(key = %key, error = %e, "Failed to write negative cache entry");
                }
                self.metrics.record_event(name, CacheEvent::NotFound);
                Err(err)
            }
            _ if err.is_retryable() => {
                self.metrics.record_event(name, CacheEvent::UpstreamError);
                // stale 兜底：上游挂了但旧值还在就继续服务
                if let Some(value) = self.read_stale::<V>(key).await {
                    self.metrics.record_event(name, CacheEvent::Stale);
                    return Ok(CachedResponse::with_value(CacheStatus::Stale, value));
                }
                Err(err)
            }
            _ => Err(err),
        }
    }

    /// 投递一个 singleflight 保护的后台刷新任务，返回是否入队成功
    fn schedule_refresh<P: RefreshProtocol>(
        &self,
        protocol: &Arc<P>,
        params: &P::Params,
        key: &str,
    ) -> bool {
        let name = protocol.cache_name();
        let protocol = protocol.clone();
        let params = params.clone();
        let key = key.to_string();
        let entries = self.entries.clone();
        let lock = self.lock.clone();
        let metrics = self.metrics.clone();
        let ttl = protocol.ttl(&self.ttl_config);
        let not_found_ttl = self.ttl_config.not_found_ttl();

        let job: RefreshJob = Box::pin(async move {
            // 后台路径同样走 singleflight：已有刷新在途就直接退出
            let guard = match lock.try_acquire(&key).await {
                Ok(Some(guard)) => guard,
                Ok(None) => {
                    debug!(key = %key, "Refresh already in flight, skipping");
                    return;
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Refresh lock unavailable, skipping background refresh");
                    return;
                }
            };

            // 拿到锁后再验一次 fresh：上一个持锁者可能刚刷新完
            match entries.read_fresh::<P::Value>(&key).await {
                Ok(FreshRead::Value(_)) | Ok(FreshRead::NotFound) => {
                    debug!(key = %key, "Entry already refreshed, skipping");
                    guard.release().await;
                    return;
                }
                Ok(FreshRead::Absent) | Err(_) => {}
            }

            let started = Instant::now();
            let result = protocol.fetch(&params).await;
            metrics.observe_latency(name, started.elapsed().as_secs_f64());

            match result {
                Ok(value) => match protocol.store(&entries, &key, &value, &ttl).await {
                    Ok(()) => metrics.record_event(name, CacheEvent::RefreshOk),
                    Err(e) => {
                        warn!(key = %key, error = %e, "Failed to persist refreshed entry");
                        metrics.record_event(name, CacheEvent::RefreshFailed);
                    }
                },
                Err(AppError::NotFound(_)) => {
                    if let Err(e) = entries.put_not_found(&key, not_found_ttl).await {
                        warn!(key = %key, error = %e, "Failed to write negative cache entry");
                    }
                    metrics.record_event(name, CacheEvent::NotFound);
                }
                Err(e) => {
                    // stale 值已经发出去了，刷新失败只记日志
                    warn!(key = %key, error = %e, "Background refresh failed");
                    metrics.record_event(name, CacheEvent::RefreshFailed);
                }
            }

            guard.release().await;
        });

        self.workers.try_submit(job)
    }

    fn cached_not_found(&self, key: &str, name: &str) -> AppError {
        self.metrics.record_event(name, CacheEvent::NotFound);
        AppError::not_found(format!("resource not found (cached): {}", key))
    }

    /// 读 fresh 条目，存储层故障视同未命中
    async fn read_fresh<V: DeserializeOwned>(&self, key: &str) -> FreshRead<V> {
        match self.entries.read_fresh(key).await {
            Ok(read) => read,
            Err(e) => {
                warn!(key = %key, error = %e, "Fresh read failed, treating as miss");
                FreshRead::Absent
            }
        }
    }

    /// 读 stale 条目，存储层故障视同未命中
    async fn read_stale<V: DeserializeOwned>(&self, key: &str) -> Option<V> {
        match self.entries.read_stale(key).await {
            Ok(read) => read,
            Err(e) => {
                warn!(key = %key, error = %e, "Stale read failed, treating as miss");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ttl(fresh: u64, stale: u64) -> EntryTtl {
        EntryTtl {
            ttl: Duration::from_secs(fresh),
            stale_ttl: Duration::from_secs(stale),
        }
    }

    #[test]
    fn test_ttl_lookup_falls_back_to_default() {
        let config = CacheTtlConfig::new(ttl(300, 86400), Duration::from_secs(60));
        assert_eq!(config.ttl_for("departures").ttl, Duration::from_secs(300));
    }

    #[test]
    fn test_ttl_override_wins() {
        let mut config = CacheTtlConfig::new(ttl(300, 86400), Duration::from_secs(60));
        config.set_override("stations", ttl(86400, 7 * 86400));
        assert_eq!(config.ttl_for("stations").ttl, Duration::from_secs(86400));
        assert_eq!(
            config.ttl_for("stations").stale_ttl,
            Duration::from_secs(7 * 86400)
        );
        assert_eq!(config.ttl_for("departures").ttl, Duration::from_secs(300));
    }

    #[test]
    fn test_not_found_ttl_accessor() {
        let config = CacheTtlConfig::new(ttl(300, 86400), Duration::from_secs(60));
        assert_eq!(config.not_found_ttl(), Duration::from_secs(60));
    }
}
