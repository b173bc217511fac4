//! 服务运行时

use metrics_exporter_prometheus::PrometheusHandle;
use takt_config::AppConfig;
use takt_telemetry::{init_metrics, init_tracing, init_tracing_json};
use tracing::info;

/// 初始化服务运行时
///
/// 返回的 PrometheusHandle 由嵌入方挂到自己的 /metrics 端点上
pub fn init_runtime(config: &AppConfig) -> PrometheusHandle {
    // 初始化 tracing
    if config.is_production() {
        init_tracing_json(&config.telemetry.log_level);
    } else {
        init_tracing(&config.telemetry.log_level);
    }

    let metrics_handle = init_metrics();

    info!(
        app_name = %config.app_name,
        app_env = %config.app_env,
        "Runtime initialized"
    );
    metrics_handle
}

/// 等待关闭信号
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
