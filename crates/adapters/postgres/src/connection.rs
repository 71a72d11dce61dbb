//! PostgreSQL 连接管理

use folio_common::{RetryConfig, is_retryable_error, with_conditional_retry};
use folio_errors::{AppError, AppResult};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use crate::PostgresConfig;

/// 创建 PostgreSQL 连接池，暂时性错误会重试
pub async fn create_pool(config: &PostgresConfig, retry: &RetryConfig) -> AppResult<PgPool> {
    info!(database = %config.describe(), "Connecting to database...");

    let pool = with_conditional_retry(
        retry,
        "postgres_connect",
        || {
            PgPoolOptions::new()
                .max_connections(config.pool_max)
                .min_connections(config.pool_min)
                .acquire_timeout(config.connect_timeout)
                .idle_timeout(config.idle_timeout)
                .connect_with(config.connect_options())
        },
        |e| is_retryable_error(&e.to_string()),
    )
    .await
    .map_err(|e| AppError::database(format!("Failed to create pool: {}", e)))?;

    check_connection(&pool).await?;
    info!("Database connection established");
    Ok(pool)
}

/// 检查数据库连接
pub async fn check_connection(pool: &PgPool) -> AppResult<()> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map_err(|e| AppError::database(format!("Database health check failed: {}", e)))?;
    Ok(())
}
