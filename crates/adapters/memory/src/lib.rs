//! takt-adapter-memory - 进程内降级存储
//!
//! 远端存储不可用时的本地兜底，不跨进程共享，只提供 best-effort 降级。
//! 已知限制：没有容量上限，只适用于键基数有界的场景。

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use takt_errors::AppResult;
use takt_ports::CachePort;

/// 单个条目：值 + 绝对过期时间（None 表示不过期）
#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }
}

/// 进程内 TTL 键值存储
///
/// 所有变更操作在单个互斥锁下执行；get 在读取时惰性淘汰过期条目，
/// 写操作顺带做一次机会性清扫
pub struct FallbackStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl FallbackStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// 当前条目数（含未清扫的过期条目）
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// 机会性清扫：移除所有已过期条目，调用方需持有锁
    fn sweep(entries: &mut HashMap<String, Entry>, now: Instant) {
        entries.retain(|_, entry| !entry.is_expired(now));
    }
}

impl Default for FallbackStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CachePort for FallbackStore {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        // 读取时惰性淘汰，避免并发下读到超过 TTL 的值
        if let Some(entry) = entries.get(key) {
            if entry.is_expired(now) {
                entries.remove(key);
                return Ok(None);
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> AppResult<()> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        Self::sweep(&mut entries, now);

        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|d| now + d),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        let mut entries = self.entries.lock();
        entries.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> AppResult<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                Ok(false)
            }
            Some(_) => Ok(true),
            None => Ok(false),
        }
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> AppResult<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        Self::sweep(&mut entries, now);

        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn delete_if_equals(&self, key: &str, expected_value: &str) -> AppResult<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                Ok(false)
            }
            Some(entry) if entry.value == expected_value => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
