//! 缓存响应封装
//!
//! 每次读取都带有 CacheStatus，上层通过 `X-Cache` 响应头
//! 把命中状态暴露给调用方，压测和排障时可直接观察缓存行为。

use serde::{Deserialize, Serialize};

/// `X-Cache` 响应头名
pub const X_CACHE_HEADER: &str = "X-Cache";

/// 单次缓存读取的结果状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheStatus {
    /// fresh 条目命中，或持锁同步回源成功
    Hit,
    /// fresh 过期，返回 stale 条目且上游刷新失败
    Stale,
    /// fresh 过期，返回 stale 条目并已调度后台刷新
    StaleRefresh,
    /// 锁等待超时且无任何条目可用：没有值，是"稍后重试"信号，
    /// 与上游确定性 NotFound 是两回事
    Miss,
}

impl CacheStatus {
    /// 响应头 / 指标标签用的固定字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "hit",
            CacheStatus::Stale => "stale",
            CacheStatus::StaleRefresh => "stale-refresh",
            CacheStatus::Miss => "miss",
        }
    }
}

impl std::fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 带状态的缓存读取结果
#[derive(Debug, Clone)]
pub struct CachedResponse<T> {
    pub status: CacheStatus,
    /// Miss 状态下为 None，其余状态必有值
    pub value: Option<T>,
}

impl<T> CachedResponse<T> {
    pub fn with_value(status: CacheStatus, value: T) -> Self {
        Self {
            status,
            value: Some(value),
        }
    }

    /// 锁等待超时的空结果
    pub fn miss() -> Self {
        Self {
            status: CacheStatus::Miss,
            value: None,
        }
    }

    /// `(X-Cache, 状态值)` 响应头对
    pub fn cache_header(&self) -> (&'static str, &'static str) {
        (X_CACHE_HEADER, self.status.as_str())
    }
}
