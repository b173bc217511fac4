//! takt-ports - 端口定义（hexagonal architecture）

pub mod cache;
pub mod metrics;

pub use cache::CachePort;
pub use metrics::{CacheEvent, CacheMetrics, NoopCacheMetrics};
