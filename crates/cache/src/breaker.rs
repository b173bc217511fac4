//! 断路器
//!
//! 两态状态机：Closed（放行）/ Open（短路）。
//! 任何一次错误立即 Open，冷却期结束后自动回到 Closed，
//! 没有 half-open 探测态：冷却后的第一次调用就是普通 Closed 调用，
//! 再失败则重新 Open。
//!
//! 状态只有一个原子时间戳，无锁；并发开启只是重置同一个冷却窗口。

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use takt_errors::{AppError, AppResult};
use tracing::{debug, warn};

/// 断路器
///
/// 包装单个逻辑操作（例如"远端缓存"），进程内状态，重启即重置
pub struct CircuitBreaker {
    /// 操作标识（日志用）
    operation: String,
    /// 冷却时间
    cooldown: Duration,
    /// 时间基准
    started: Instant,
    /// Open 截止时刻（相对 started 的毫秒数），0 表示 Closed
    open_until_ms: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(operation: impl Into<String>, cooldown: Duration) -> Self {
        Self {
            operation: operation.into(),
            cooldown,
            started: Instant::now(),
            open_until_ms: AtomicU64::new(0),
        }
    }

    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// 当前是否处于 Open 状态
    pub fn is_open(&self) -> bool {
        let open_until = self.open_until_ms.load(Ordering::Acquire);
        open_until != 0 && self.now_ms() < open_until
    }

    /// 记录一次失败，进入（或重置）冷却窗口
    pub fn record_failure(&self) {
        let open_until = (self.now_ms() + self.cooldown.as_millis() as u64).max(1);
        self.open_until_ms.store(open_until, Ordering::Release);
        warn!(
            operation = %self.operation,
            cooldown_ms = self.cooldown.as_millis(),
            "Circuit breaker opened"
        );
    }

    /// 执行受保护的操作
    ///
    /// Open 状态下不调用操作，直接返回 Backend 错误；
    /// Closed 状态下任何一次 Err 都会打开断路器并原样返回错误
    pub async fn call<F, Fut, T>(&self, f: F) -> AppResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        if self.is_open() {
            debug!(operation = %self.operation, "Circuit breaker open, short-circuiting");
            return Err(AppError::backend(format!(
                "circuit open: {}",
                self.operation
            )));
        }

        match f().await {
            Ok(value) => Ok(value),
            Err(e) => {
                self.record_failure();
                Err(e)
            }
        }
    }
}
