//! 基础设施资源管理
//!
//! 从 AppConfig 组装整条缓存链路：
//! Redis 连接 → 进程内兜底 → 断路器保护的组合存储 → 条目/锁/工作池 → 编排器。
//! 编排器由这里构造后注入给服务代码，进程内不存在隐式全局实例。

use std::sync::Arc;
use std::time::Duration;

use secrecy::ExposeSecret;
use takt_adapter_memory::FallbackStore;
use takt_adapter_redis::{RedisConfig, RedisStore, check_connection, create_connection_manager};
use takt_cache::{
    CacheOrchestrator, CacheTtlConfig, EntryStore, EntryTtl, GuardedStore, LockConfig, RefreshLock,
    RefreshWorkerPool, WorkerPoolConfig,
};
use takt_common::retry::{RetryConfig, with_retry};
use takt_config::AppConfig;
use takt_errors::AppResult;
use takt_ports::{CacheMetrics, CachePort};
use takt_telemetry::PrometheusCacheMetrics;
use tracing::info;

/// 基础设施资源容器
pub struct Infrastructure {
    config: AppConfig,
    orchestrator: Arc<CacheOrchestrator>,
    workers: Arc<RefreshWorkerPool>,
}

impl Infrastructure {
    /// 从配置创建基础设施资源（Redis 连接带重试）
    pub async fn from_config(config: AppConfig) -> AppResult<Self> {
        let retry_config = RetryConfig::default();
        let url = config.redis.url.expose_secret().clone();

        let mut conn = with_retry(&retry_config, "Redis connection", || {
            let url = url.clone();
            async move { create_connection_manager(&url).await }
        })
        .await?;
        check_connection(&mut conn).await?;
        info!("Redis connection established");

        let mut redis_config = RedisConfig::new(url);
        if let Some(prefix) = &config.redis.key_prefix {
            redis_config = redis_config.with_key_prefix(prefix.clone());
        }

        let metrics: Arc<dyn CacheMetrics> = Arc::new(PrometheusCacheMetrics);
        let primary: Arc<dyn CachePort> = Arc::new(RedisStore::new(conn, redis_config));
        let fallback: Arc<dyn CachePort> = Arc::new(FallbackStore::new());
        let guarded: Arc<dyn CachePort> = Arc::new(GuardedStore::new(
            primary,
            fallback,
            Duration::from_secs(config.cache.breaker_cooldown_secs),
            metrics.clone(),
        ));

        let entries = Arc::new(EntryStore::new(
            guarded.clone(),
            Duration::from_secs(config.cache.jitter_range_secs),
        ));
        let lock = Arc::new(RefreshLock::new(
            guarded,
            LockConfig {
                hold_ttl: Duration::from_secs(config.cache.lock_ttl_secs),
                wait_timeout: Duration::from_millis(config.cache.lock_wait_ms),
                retry_interval: Duration::from_millis(config.cache.lock_retry_ms),
            },
        ));
        let workers = Arc::new(RefreshWorkerPool::new(WorkerPoolConfig {
            workers: config.cache.refresh_workers,
            queue_depth: config.cache.refresh_queue_depth,
        }));

        let orchestrator = Arc::new(CacheOrchestrator::new(
            entries,
            lock,
            workers.clone(),
            metrics,
            build_ttl_config(&config),
        ));

        Ok(Self {
            config,
            orchestrator,
            workers,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> Arc<CacheOrchestrator> {
        self.orchestrator.clone()
    }

    /// 排空后台刷新队列并停掉 worker，进程退出前调用
    pub async fn shutdown(&self) {
        self.workers.shutdown().await;
        info!("Infrastructure shut down");
    }
}

/// 把配置里的秒数表转换为编排器的 TTL 查找表
fn build_ttl_config(config: &AppConfig) -> CacheTtlConfig {
    let cache = &config.cache;
    // stale TTL 不允许短于 fresh TTL
    let default = EntryTtl {
        ttl: Duration::from_secs(cache.default_ttl_secs),
        stale_ttl: Duration::from_secs(cache.default_stale_ttl_secs.max(cache.default_ttl_secs)),
    };
    let mut ttl_config =
        CacheTtlConfig::new(default, Duration::from_secs(cache.not_found_ttl_secs));

    for (name, entry) in &cache.ttl_overrides {
        let stale_secs = entry
            .stale_ttl_secs
            .unwrap_or(cache.default_stale_ttl_secs)
            .max(entry.ttl_secs);
        ttl_config.set_override(
            name,
            EntryTtl {
                ttl: Duration::from_secs(entry.ttl_secs),
                stale_ttl: Duration::from_secs(stale_secs),
            },
        );
    }
    ttl_config
}
