//! telemetry - 日志、指标与健康状态

use folio_errors::{AppError, AppResult};
use serde::Serialize;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// 把配置中的日志级别收敛为 debug/info/warn 三档
pub fn level_filter(configured: &str) -> &'static str {
    match configured.trim().to_lowercase().as_str() {
        "debug" => "debug",
        "info" => "info",
        _ => "warn",
    }
}

/// 过滤指令；CORS 日志级别为 debug 时单独打开 CORS 中间件的日志
pub fn filter_directives(log_level: &str, cors_log_level: &str) -> String {
    let mut directives = level_filter(log_level).to_string();
    if level_filter(cors_log_level) == "debug" {
        directives.push_str(",tower_http::cors=debug");
    }
    directives
}

/// 初始化 tracing，`RUST_LOG` 优先
pub fn init_tracing(directives: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// 初始化 JSON 格式的 tracing（生产环境）
pub fn init_tracing_json(directives: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// 初始化 Prometheus metrics
pub fn init_metrics() -> AppResult<metrics_exporter_prometheus::PrometheusHandle> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| AppError::internal(format!("Failed to install Prometheus recorder: {}", e)))
}

/// 健康检查状态
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub version: &'static str,
    pub checks: Vec<HealthCheck>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub name: String,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            healthy: true,
            version: env!("CARGO_PKG_VERSION"),
            checks: Vec::new(),
        }
    }

    pub fn add_check(&mut self, name: impl Into<String>, healthy: bool, message: Option<String>) {
        if !healthy {
            self.healthy = false;
        }
        self.checks.push(HealthCheck {
            name: name.into(),
            healthy,
            message,
        });
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}
