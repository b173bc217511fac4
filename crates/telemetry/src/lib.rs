//! takt-telemetry - 可观测性库

use takt_ports::{CacheEvent, CacheMetrics};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// 初始化 tracing
pub fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// 初始化 JSON 格式的 tracing（生产环境）
pub fn init_tracing_json(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// 初始化 Prometheus metrics
pub fn init_metrics() -> metrics_exporter_prometheus::PrometheusHandle {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    builder
        .install_recorder()
        .expect("Failed to install Prometheus recorder")
}

/// 基于 metrics facade 的缓存指标实现
///
/// 事件计入 takt_cache_events_total{cache, event}，
/// 刷新耗时计入 takt_cache_refresh_seconds{cache}
pub struct PrometheusCacheMetrics;

impl CacheMetrics for PrometheusCacheMetrics {
    fn record_event(&self, cache_name: &str, event: CacheEvent) {
        metrics::counter!(
            "takt_cache_events_total",
            "cache" => cache_name.to_string(),
            "event" => event.as_str(),
        )
        .increment(1);
    }

    fn observe_latency(&self, cache_name: &str, seconds: f64) {
        metrics::histogram!(
            "takt_cache_refresh_seconds",
            "cache" => cache_name.to_string(),
        )
        .record(seconds);
    }
}
