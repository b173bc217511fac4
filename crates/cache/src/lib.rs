//! takt-cache - 缓存刷新编排
//!
//! stale-while-revalidate 编排子系统：
//! - CacheOrchestrator: 核心算法（fresh → stale+后台刷新 → 加锁同步刷新 → 降级）
//! - RefreshProtocol: 每种资源类型的 fetch/store 策略
//! - EntryStore: fresh/stale 双份条目 + 负缓存
//! - RefreshLock: 基于 set-if-absent 的 singleflight 锁
//! - CircuitBreaker / GuardedStore: 后端故障隔离与进程内降级
//! - RefreshWorkerPool: 有界后台刷新队列

pub mod breaker;
pub mod entry;
pub mod key;
pub mod lock;
pub mod orchestrator;
pub mod protocol;
pub mod response;
pub mod store;
pub mod worker;

pub use breaker::CircuitBreaker;
pub use entry::{EntryStore, EntryTtl, FreshRead, STALE_SUFFIX};
pub use key::CacheKeyBuilder;
pub use lock::{LockConfig, RefreshLock, RefreshLockGuard};
pub use orchestrator::{CacheOrchestrator, CacheTtlConfig};
pub use protocol::RefreshProtocol;
pub use response::{CacheStatus, CachedResponse, X_CACHE_HEADER};
pub use store::GuardedStore;
pub use worker::{RefreshWorkerPool, WorkerPoolConfig};
