//! 编排器端到端行为测试，存储用进程内实现

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use takt_adapter_memory::FallbackStore;
use takt_cache::{
    CacheKeyBuilder, CacheOrchestrator, CacheStatus, CacheTtlConfig, EntryStore, EntryTtl,
    LockConfig, RefreshLock, RefreshProtocol, RefreshWorkerPool, WorkerPoolConfig,
};
use takt_errors::{AppError, AppResult};
use takt_ports::{CachePort, NoopCacheMetrics};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Stations {
    names: Vec<String>,
}

fn station_list() -> Stations {
    Stations {
        names: vec!["Marienplatz".to_string(), "Sendlinger Tor".to_string()],
    }
}

#[derive(Clone, Copy)]
enum Behavior {
    Succeed,
    NotFound,
    Upstream,
}

struct StationsProtocol {
    fetches: Arc<AtomicUsize>,
    behavior: Behavior,
    delay: Duration,
}

impl StationsProtocol {
    fn new(behavior: Behavior) -> Arc<Self> {
        Self::with_delay(behavior, Duration::ZERO)
    }

    fn with_delay(behavior: Behavior, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            fetches: Arc::new(AtomicUsize::new(0)),
            behavior,
            delay,
        })
    }

    fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RefreshProtocol for StationsProtocol {
    type Params = ();
    type Value = Stations;

    fn cache_name(&self) -> &'static str {
        "stations"
    }

    fn cache_key(&self, _params: &()) -> String {
        CacheKeyBuilder::new("mvg").param("stations", "all").build()
    }

    async fn fetch(&self, _params: &()) -> AppResult<Stations> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.behavior {
            Behavior::Succeed => Ok(station_list()),
            Behavior::NotFound => Err(AppError::not_found("station list does not exist")),
            Behavior::Upstream => Err(AppError::upstream("502 from transit api")),
        }
    }
}

struct Harness {
    store: Arc<FallbackStore>,
    workers: Arc<RefreshWorkerPool>,
    orchestrator: Arc<CacheOrchestrator>,
}

fn harness() -> Harness {
    harness_with(LockConfig {
        hold_ttl: Duration::from_secs(5),
        wait_timeout: Duration::from_millis(500),
        retry_interval: Duration::from_millis(10),
    })
}

fn harness_with(lock_config: LockConfig) -> Harness {
    let store = Arc::new(FallbackStore::new());
    let entries = Arc::new(EntryStore::new(store.clone(), Duration::ZERO));
    let lock = Arc::new(RefreshLock::new(store.clone(), lock_config));
    let workers = Arc::new(RefreshWorkerPool::new(WorkerPoolConfig {
        workers: 4,
        queue_depth: 64,
    }));
    let ttl = CacheTtlConfig::new(
        EntryTtl {
            ttl: Duration::from_secs(300),
            stale_ttl: Duration::from_secs(86400),
        },
        Duration::from_secs(60),
    );
    let orchestrator = Arc::new(CacheOrchestrator::new(
        entries,
        lock,
        workers.clone(),
        Arc::new(NoopCacheMetrics),
        ttl,
    ));
    Harness {
        store,
        workers,
        orchestrator,
    }
}

/// 直接向存储写一个 stale-only 状态（fresh 已过期的局面）
async fn seed_stale_only(store: &FallbackStore, key: &str, value: &Stations) {
    let raw = serde_json::to_string(value).unwrap();
    store
        .set(&format!("{}::stale", key), &raw, None)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_cold_start_fetches_once_and_returns_hit() {
    let h = harness();
    let protocol = StationsProtocol::new(Behavior::Succeed);

    let resp = h.orchestrator.get_cached_data(&protocol, &()).await.unwrap();
    assert_eq!(resp.status, CacheStatus::Hit);
    assert_eq!(resp.value.unwrap(), station_list());
    assert_eq!(protocol.fetch_count(), 1);

    // 两份条目都已落盘
    assert!(h.store.exists("mvg:stations=all").await.unwrap());
    assert!(h.store.exists("mvg:stations=all::stale").await.unwrap());
}

#[tokio::test]
async fn test_fresh_hit_skips_fetch() {
    let h = harness();
    let protocol = StationsProtocol::new(Behavior::Succeed);

    h.orchestrator.get_cached_data(&protocol, &()).await.unwrap();
    let resp = h.orchestrator.get_cached_data(&protocol, &()).await.unwrap();

    assert_eq!(resp.status, CacheStatus::Hit);
    assert_eq!(resp.value.unwrap(), station_list());
    // 幂等：第二次调用不回源
    assert_eq!(protocol.fetch_count(), 1);
}

#[tokio::test]
async fn test_round_trip_preserves_value() {
    let h = harness();
    let protocol = StationsProtocol::new(Behavior::Succeed);

    let first = h.orchestrator.get_cached_data(&protocol, &()).await.unwrap();
    let second = h.orchestrator.get_cached_data(&protocol, &()).await.unwrap();
    assert_eq!(first.value.unwrap(), second.value.unwrap());
}

#[tokio::test]
async fn test_stale_entry_returns_stale_refresh_and_schedules_once() {
    let h = harness();
    let protocol = StationsProtocol::new(Behavior::Succeed);
    let old = Stations {
        names: vec!["Old Station".to_string()],
    };
    seed_stale_only(&h.store, "mvg:stations=all", &old).await;

    let resp = h.orchestrator.get_cached_data(&protocol, &()).await.unwrap();
    assert_eq!(resp.status, CacheStatus::StaleRefresh);
    // 旧值立即返回，不等刷新
    assert_eq!(resp.value.unwrap(), old);

    // 后台刷新恰好执行一次并写入 fresh 条目
    h.workers.shutdown().await;
    assert_eq!(protocol.fetch_count(), 1);

    let after = h.orchestrator.get_cached_data(&protocol, &()).await.unwrap();
    assert_eq!(after.status, CacheStatus::Hit);
    assert_eq!(after.value.unwrap(), station_list());
    assert_eq!(protocol.fetch_count(), 1);
}

#[tokio::test]
async fn test_concurrent_stale_readers_trigger_at_most_one_fetch() {
    let h = harness();
    let protocol = StationsProtocol::with_delay(Behavior::Succeed, Duration::from_millis(50));
    let old = Stations {
        names: vec!["Old Station".to_string()],
    };
    seed_stale_only(&h.store, "mvg:stations=all", &old).await;

    let mut handles = Vec::new();
    for _ in 0..10 {
        let orchestrator = h.orchestrator.clone();
        let protocol = protocol.clone();
        handles.push(tokio::spawn(async move {
            orchestrator.get_cached_data(&protocol, &()).await.unwrap()
        }));
    }
    for handle in handles {
        let resp = handle.await.unwrap();
        // 刷新在途期间所有读者都拿到旧值
        assert_eq!(resp.value.unwrap(), old);
    }

    h.workers.shutdown().await;
    // singleflight：十个并发读者至多触发一次回源
    assert_eq!(protocol.fetch_count(), 1);
}

#[tokio::test]
async fn test_concurrent_miss_single_fetch_rest_observe_result() {
    let h = harness();
    let protocol = StationsProtocol::with_delay(Behavior::Succeed, Duration::from_millis(50));

    let mut handles = Vec::new();
    for _ in 0..5 {
        let orchestrator = h.orchestrator.clone();
        let protocol = protocol.clone();
        handles.push(tokio::spawn(async move {
            orchestrator.get_cached_data(&protocol, &()).await.unwrap()
        }));
    }
    for handle in handles {
        let resp = handle.await.unwrap();
        assert_eq!(resp.status, CacheStatus::Hit);
        // 要么持锁者自己取的，要么观察到持锁者写入的结果，绝无半成品
        assert_eq!(resp.value.unwrap(), station_list());
    }
    assert_eq!(protocol.fetch_count(), 1);
}

#[tokio::test]
async fn test_follower_times_out_with_miss_not_error() {
    let h = harness_with(LockConfig {
        hold_ttl: Duration::from_secs(5),
        wait_timeout: Duration::from_millis(50),
        retry_interval: Duration::from_millis(10),
    });
    let protocol = StationsProtocol::with_delay(Behavior::Succeed, Duration::from_millis(200));

    let holder = {
        let orchestrator = h.orchestrator.clone();
        let protocol = protocol.clone();
        tokio::spawn(async move { orchestrator.get_cached_data(&protocol, &()).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    // 跟随者等不到锁也等不到 fresh，拿到可重试的 Miss 而不是错误
    let follower = h.orchestrator.get_cached_data(&protocol, &()).await.unwrap();
    assert_eq!(follower.status, CacheStatus::Miss);
    assert!(follower.value.is_none());

    let held = holder.await.unwrap().unwrap();
    assert_eq!(held.status, CacheStatus::Hit);
}

#[tokio::test]
async fn test_not_found_is_negative_cached() {
    let h = harness();
    let protocol = StationsProtocol::new(Behavior::NotFound);

    let err = h.orchestrator.get_cached_data(&protocol, &()).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    assert_eq!(protocol.fetch_count(), 1);

    // 负缓存生效：第二次调用不再回源
    let err = h.orchestrator.get_cached_data(&protocol, &()).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    assert_eq!(protocol.fetch_count(), 1);
}

#[tokio::test]
async fn test_upstream_error_with_no_stale_propagates() {
    let h = harness();
    let protocol = StationsProtocol::new(Behavior::Upstream);

    let err = h.orchestrator.get_cached_data(&protocol, &()).await.unwrap_err();
    assert!(matches!(err, AppError::Upstream(_)));
    // 失败不产生负缓存，下一次照常重试
    let _ = h.orchestrator.get_cached_data(&protocol, &()).await.unwrap_err();
    assert_eq!(protocol.fetch_count(), 2);
}

#[tokio::test]
async fn test_upstream_error_falls_back_to_stale_that_just_landed() {
    let h = harness();
    let protocol = StationsProtocol::with_delay(Behavior::Upstream, Duration::from_millis(50));
    let old = Stations {
        names: vec!["Old Station".to_string()],
    };

    let caller = {
        let orchestrator = h.orchestrator.clone();
        let protocol = protocol.clone();
        tokio::spawn(async move { orchestrator.get_cached_data(&protocol, &()).await })
    };
    // 回源还没失败时另一个写入者补上了 stale 条目
    tokio::time::sleep(Duration::from_millis(20)).await;
    seed_stale_only(&h.store, "mvg:stations=all", &old).await;

    let resp = caller.await.unwrap().unwrap();
    assert_eq!(resp.status, CacheStatus::Stale);
    assert_eq!(resp.value.unwrap(), old);
}

#[tokio::test]
async fn test_full_queue_returns_stale_without_refresh() {
    let store = Arc::new(FallbackStore::new());
    let entries = Arc::new(EntryStore::new(store.clone(), Duration::ZERO));
    let lock = Arc::new(RefreshLock::new(store.clone(), LockConfig::default()));
    let workers = Arc::new(RefreshWorkerPool::new(WorkerPoolConfig {
        workers: 1,
        queue_depth: 1,
    }));
    let orchestrator = CacheOrchestrator::new(
        entries,
        lock,
        workers.clone(),
        Arc::new(NoopCacheMetrics),
        CacheTtlConfig::new(
            EntryTtl {
                ttl: Duration::from_secs(300),
                stale_ttl: Duration::from_secs(86400),
            },
            Duration::from_secs(60),
        ),
    );

    // 占住唯一 worker 并填满队列
    let (block_tx, block_rx) = tokio::sync::oneshot::channel::<()>();
    workers.try_submit(Box::pin(async move {
        let _ = block_rx.await;
    }));
    tokio::time::sleep(Duration::from_millis(20)).await;
    workers.try_submit(Box::pin(async {}));

    let protocol = StationsProtocol::new(Behavior::Succeed);
    let old = Stations {
        names: vec!["Old Station".to_string()],
    };
    seed_stale_only(&store, "mvg:stations=all", &old).await;

    let resp = orchestrator.get_cached_data(&protocol, &()).await.unwrap();
    // 刷新任务被丢弃，状态退化为 Stale，旧值照常返回
    assert_eq!(resp.status, CacheStatus::Stale);
    assert_eq!(resp.value.unwrap(), old);

    let _ = block_tx.send(());
    workers.shutdown().await;
    assert_eq!(protocol.fetch_count(), 0);
}

/// 存储后端每次调用都失败时，请求仍然直接回源成功
#[tokio::test]
async fn test_request_survives_total_store_failure() {
    struct BrokenStore;

    #[async_trait]
    impl CachePort for BrokenStore {
        async fn get(&self, _key: &str) -> AppResult<Option<String>> {
            Err(AppError::backend("store down"))
        }
        async fn set(&self, _key: &str, _value: &str, _ttl: Option<Duration>) -> AppResult<()> {
            Err(AppError::backend("store down"))
        }
        async fn delete(&self, _key: &str) -> AppResult<()> {
            Err(AppError::backend("store down"))
        }
        async fn exists(&self, _key: &str) -> AppResult<bool> {
            Err(AppError::backend("store down"))
        }
        async fn set_nx(&self, _key: &str, _value: &str, _ttl: Duration) -> AppResult<bool> {
            Err(AppError::backend("store down"))
        }
        async fn delete_if_equals(&self, _key: &str, _expected: &str) -> AppResult<bool> {
            Err(AppError::backend("store down"))
        }
    }

    let store: Arc<dyn CachePort> = Arc::new(BrokenStore);
    let entries = Arc::new(EntryStore::new(store.clone(), Duration::ZERO));
    let lock = Arc::new(RefreshLock::new(store, LockConfig::default()));
    let workers = Arc::new(RefreshWorkerPool::new(WorkerPoolConfig::default()));
    let orchestrator = CacheOrchestrator::new(
        entries,
        lock,
        workers,
        Arc::new(NoopCacheMetrics),
        CacheTtlConfig::new(
            EntryTtl {
                ttl: Duration::from_secs(300),
                stale_ttl: Duration::from_secs(86400),
            },
            Duration::from_secs(60),
        ),
    );

    let protocol = StationsProtocol::new(Behavior::Succeed);
    let resp = orchestrator.get_cached_data(&protocol, &()).await.unwrap();
    assert_eq!(resp.status, CacheStatus::Hit);
    assert_eq!(resp.value.unwrap(), station_list());
}

#[tokio::test]
async fn test_invalidate_forces_refetch() {
    let h = harness();
    let protocol = StationsProtocol::new(Behavior::Succeed);

    h.orchestrator.get_cached_data(&protocol, &()).await.unwrap();
    h.orchestrator.invalidate(&protocol, &()).await.unwrap();

    let resp = h.orchestrator.get_cached_data(&protocol, &()).await.unwrap();
    assert_eq!(resp.status, CacheStatus::Hit);
    assert_eq!(protocol.fetch_count(), 2);
}
