//! Folio 个人网站

mod app;
mod cors;
mod middleware;
mod routes;
mod security_headers;
mod shutdown;
mod state;
#[cfg(test)]
mod testing;
mod tls;
mod view;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use folio_adapter_emvi::EmviClient;
use folio_adapter_postgres::{PostgresConfig, create_pool, run_migrations};
use folio_blog::BlogOptions;
use folio_common::RetryConfig;
use folio_config::AppConfig;
use folio_render::TemplateCache;
use folio_telemetry::{filter_directives, init_metrics, init_tracing, init_tracing_json};
use folio_tracking::{PgStore, Processor, Store, Tracker, TrackerOptions};
use tracing::info;

use crate::app::{RouterOptions, router};
use crate::shutdown::shutdown_signal;
use crate::state::AppState;
use crate::tls::TlsOptions;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 本地开发时从 .env 读取环境变量
    dotenvy::dotenv().ok();

    let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());
    let config = AppConfig::load(&config_dir).context("Error loading configuration")?;

    let directives = filter_directives(&config.log_level, &config.cors.log_level);
    if config.is_production() {
        init_tracing_json(&directives);
    } else {
        init_tracing(&directives);
    }
    info!(config = ?config, "Configuration loaded");

    // 记录器需在任何组件上报指标之前安装
    let metrics = if config.metrics.enabled {
        Some(init_metrics()?)
    } else {
        None
    };

    // 数据库
    let pg_config = PostgresConfig::from_db_config(&config.db)?;
    let retry = RetryConfig::new(5, Duration::from_millis(500), Duration::from_secs(10));
    let pool = create_pool(&pg_config, &retry).await?;
    run_migrations(&pool, &config.schema_dir).await?;

    // 访问统计
    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool));
    let tracker = Arc::new(Tracker::new(
        store.clone(),
        TrackerOptions::from_config(&config.tracking, config.domains()),
    ));
    let processing = Arc::new(Processor::new(store.clone())).schedule();

    // 模板与博客
    let templates = TemplateCache::new(&config.template_dir, config.hot_reload)?;
    let emvi = EmviClient::new(&config.emvi)?;
    let state = AppState::build(
        templates,
        Arc::new(emvi),
        BlogOptions::from(&config.blog),
        store,
        tracker.clone(),
        metrics,
        chrono::Duration::minutes(config.tracking.active_visitor_minutes),
    )
    .await?;
    let app = router(state, &RouterOptions::from(&config));

    if config.tls {
        tls::serve(app, TlsOptions::from_config(&config)?).await?;
    } else {
        info!(host = %config.host, "Starting server...");
        let listener = tokio::net::TcpListener::bind(&config.host)
            .await
            .with_context(|| format!("Error binding to {}", config.host))?;

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    }

    processing.cancel();
    tracker.stop().await;
    info!("Server stopped");

    Ok(())
}
