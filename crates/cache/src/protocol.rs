//! 刷新协议
//!
//! 每种资源类型一个协议实现：怎么构造键、去哪里回源、用什么 TTL、
//! 怎么落盘。编排器只依赖这个 trait，不认识任何具体资源类型；
//! 协议实现也从不直接接触锁或断路器。

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use takt_errors::AppResult;

use crate::entry::{EntryStore, EntryTtl};
use crate::orchestrator::CacheTtlConfig;

/// 每资源类型的缓存刷新策略
#[async_trait]
pub trait RefreshProtocol: Send + Sync + 'static {
    /// 请求参数，用于构造键和回源（后台刷新任务会持有一份克隆）
    type Params: Send + Sync + Clone + 'static;
    /// 缓存的值类型
    type Value: Serialize + DeserializeOwned + Send + Sync + Clone + 'static;

    /// 资源名，用作指标标签和 TTL 覆盖查找键
    fn cache_name(&self) -> &'static str;

    /// 由参数构造确定性缓存键（见 CacheKeyBuilder 的归一化约定）
    fn cache_key(&self, params: &Self::Params) -> String;

    /// 本资源的 TTL 对，默认按 cache_name 查配置覆盖表
    fn ttl(&self, config: &CacheTtlConfig) -> EntryTtl {
        config.ttl_for(self.cache_name())
    }

    /// 回源取数。确定性"资源不存在"返回 AppError::NotFound，
    /// 其余失败返回 Upstream / Timeout
    async fn fetch(&self, params: &Self::Params) -> AppResult<Self::Value>;

    /// 落盘。默认写 fresh/stale 条目对；需要额外写穿到持久层的
    /// 资源类型可以覆盖这个方法
    async fn store(
        &self,
        entries: &EntryStore,
        key: &str,
        value: &Self::Value,
        ttl: &EntryTtl,
    ) -> AppResult<()> {
        entries.put_pair(key, value, *ttl).await
    }
}
