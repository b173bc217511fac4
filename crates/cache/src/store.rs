//! 受保护的键值存储
//!
//! 主存储（Redis）套在断路器后面，主存储出错或断路器 Open 时
//! 切换到进程内降级存储。存储层故障在这里被全部吸收：
//! 读降级为 None、写降级为只写兜底，请求本身继续走"无缓存"路径，
//! 绝不因为缓存挂了而失败。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use takt_errors::AppResult;
use takt_ports::{CacheEvent, CacheMetrics, CachePort};
use tracing::{debug, warn};

use crate::breaker::CircuitBreaker;

/// 主存储 + 断路器 + 进程内兜底的组合存储
pub struct GuardedStore {
    primary: Arc<dyn CachePort>,
    fallback: Arc<dyn CachePort>,
    breaker: CircuitBreaker,
    metrics: Arc<dyn CacheMetrics>,
}

impl GuardedStore {
    pub fn new(
        primary: Arc<dyn CachePort>,
        fallback: Arc<dyn CachePort>,
        breaker_cooldown: Duration,
        metrics: Arc<dyn CacheMetrics>,
    ) -> Self {
        Self {
            primary,
            fallback,
            breaker: CircuitBreaker::new("cache-store", breaker_cooldown),
            metrics,
        }
    }

    /// 断路器当前是否 Open（诊断用）
    pub fn breaker_open(&self) -> bool {
        self.breaker.is_open()
    }

    /// 经断路器访问主存储，Closed → Open 的状态跳变记一次指标
    async fn primary_call<F, Fut, T>(&self, f: F) -> AppResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let was_open = self.breaker.is_open();
        let result = self.breaker.call(f).await;
        if result.is_err() && !was_open && self.breaker.is_open() {
            self.metrics.record_event("store", CacheEvent::BreakerOpen);
        }
        result
    }
}

#[async_trait]
impl CachePort for GuardedStore {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        match self.primary_call(|| self.primary.get(key)).await {
            Ok(value) => Ok(value),
            Err(e) => {
                debug!(key = %key, error = %e, "Primary store get failed, using fallback");
                self.fallback.get(key).await
            }
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> AppResult<()> {
        match self.primary_call(|| self.primary.set(key, value, ttl)).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(key = %key, error = %e, "Primary store set failed, writing to fallback only");
                self.fallback.set(key, value, ttl).await
            }
        }
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        // 两边都删，保证降级期间不会读到已删除的值
        let result = self.primary_call(|| self.primary.delete(key)).await;
        self.fallback.delete(key).await?;
        if let Err(e) = result {
            debug!(key = %key, error = %e, "Primary store delete failed");
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> AppResult<bool> {
        match self.primary_call(|| self.primary.exists(key)).await {
            Ok(exists) => Ok(exists),
            Err(e) => {
                debug!(key = %key, error = %e, "Primary store exists failed, using fallback");
                self.fallback.exists(key).await
            }
        }
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> AppResult<bool> {
        match self
            .primary_call(|| self.primary.set_nx(key, value, ttl))
            .await
        {
            Ok(acquired) => Ok(acquired),
            Err(e) => {
                // 降级为进程内锁：跨副本互斥失效，但单进程 singleflight 仍然成立
                warn!(key = %key, error = %e, "Primary store set_nx failed, using in-process fallback");
                self.fallback.set_nx(key, value, ttl).await
            }
        }
    }

    async fn delete_if_equals(&self, key: &str, expected_value: &str) -> AppResult<bool> {
        match self
            .primary_call(|| self.primary.delete_if_equals(key, expected_value))
            .await
        {
            Ok(deleted) => Ok(deleted),
            Err(e) => {
                debug!(key = %key, error = %e, "Primary store delete_if_equals failed, using fallback");
                self.fallback.delete_if_equals(key, expected_value).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use takt_errors::AppError;
    use takt_ports::NoopCacheMetrics;

    fn guarded(primary: Arc<FailingStore>, cooldown: Duration) -> GuardedStore {
        GuardedStore::new(
            primary,
            Arc::new(takt_adapter_memory::FallbackStore::new()),
            cooldown,
            Arc::new(NoopCacheMetrics),
        )
    }

    /// 总是失败的主存储，带调用计数
    struct FailingStore {
        calls: AtomicUsize,
    }

    impl FailingStore {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CachePort for FailingStore {
        async fn get(&self, _key: &str) -> AppResult<Option<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::backend("connection refused"))
        }

        async fn set(&self, _key: &str, _value: &str, _ttl: Option<Duration>) -> AppResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::backend("connection refused"))
        }

        async fn delete(&self, _key: &str) -> AppResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::backend("connection refused"))
        }

        async fn exists(&self, _key: &str) -> AppResult<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::backend("connection refused"))
        }

        async fn set_nx(&self, _key: &str, _value: &str, _ttl: Duration) -> AppResult<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::backend("connection refused"))
        }

        async fn delete_if_equals(&self, _key: &str, _expected: &str) -> AppResult<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::backend("connection refused"))
        }
    }

    #[tokio::test]
    async fn test_failover_to_fallback_on_primary_error() {
        let primary = Arc::new(FailingStore::new());
        let store = guarded(primary, Duration::from_secs(60));

        store.set("k1", "v1", None).await.unwrap();
        assert_eq!(store.get("k1").await.unwrap(), Some("v1".to_string()));
    }

    #[tokio::test]
    async fn test_breaker_stops_hitting_failed_primary() {
        let primary = Arc::new(FailingStore::new());
        let store = guarded(primary.clone(), Duration::from_secs(60));

        // 第一次失败打开断路器
        let _ = store.get("k").await.unwrap();
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
        assert!(store.breaker_open());

        // 冷却期内主存储完全不再被调用
        for _ in 0..5 {
            let _ = store.get("k").await.unwrap();
        }
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_breaker_retries_primary_after_cooldown() {
        let primary = Arc::new(FailingStore::new());
        let store = guarded(primary.clone(), Duration::from_millis(20));

        let _ = store.get("k").await.unwrap();
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(40)).await;
        let _ = store.get("k").await.unwrap();
        assert_eq!(primary.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_set_nx_degrades_to_in_process_lock() {
        let primary = Arc::new(FailingStore::new());
        let store = guarded(primary, Duration::from_secs(60));

        assert!(
            store
                .set_nx("lock:k", "a", Duration::from_secs(5))
                .await
                .unwrap()
        );
        assert!(
            !store
                .set_nx("lock:k", "b", Duration::from_secs(5))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_breaker_open_recorded_once_per_transition() {
        struct CountingMetrics {
            opens: AtomicUsize,
        }
        impl CacheMetrics for CountingMetrics {
            fn record_event(&self, _cache_name: &str, event: CacheEvent) {
                if event == CacheEvent::BreakerOpen {
                    self.opens.fetch_add(1, Ordering::SeqCst);
                }
            }
            fn observe_latency(&self, _cache_name: &str, _seconds: f64) {}
        }

        let metrics = Arc::new(CountingMetrics {
            opens: AtomicUsize::new(0),
        });
        let store = GuardedStore::new(
            Arc::new(FailingStore::new()),
            Arc::new(takt_adapter_memory::FallbackStore::new()),
            Duration::from_secs(60),
            metrics.clone(),
        );

        for _ in 0..5 {
            let _ = store.get("k").await.unwrap();
        }
        // Closed → Open 只发生一次
        assert_eq!(metrics.opens.load(Ordering::SeqCst), 1);
    }
}
