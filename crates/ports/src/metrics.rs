//! 缓存指标 trait 定义

/// 缓存事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheEvent {
    Hit,
    Stale,
    StaleRefresh,
    Miss,
    NotFound,
    UpstreamError,
    RefreshOk,
    RefreshFailed,
    QueueFull,
    BreakerOpen,
}

impl CacheEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Stale => "stale",
            Self::StaleRefresh => "stale_refresh",
            Self::Miss => "miss",
            Self::NotFound => "not_found",
            Self::UpstreamError => "upstream_error",
            Self::RefreshOk => "refresh_ok",
            Self::RefreshFailed => "refresh_failed",
            Self::QueueFull => "queue_full",
            Self::BreakerOpen => "breaker_open",
        }
    }
}

/// 缓存指标 trait
///
/// 每次 hit/miss/stale/error 状态转换调用 record_event，
/// 每次刷新操作调用 observe_latency
pub trait CacheMetrics: Send + Sync {
    /// 记录缓存事件
    fn record_event(&self, cache_name: &str, event: CacheEvent);

    /// 记录刷新耗时（秒）
    fn observe_latency(&self, cache_name: &str, seconds: f64);
}

/// 空实现（测试或禁用指标时使用）
pub struct NoopCacheMetrics;

impl CacheMetrics for NoopCacheMetrics {
    fn record_event(&self, _cache_name: &str, _event: CacheEvent) {}

    fn observe_latency(&self, _cache_name: &str, _seconds: f64) {}
}
