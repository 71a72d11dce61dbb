//! PostgreSQL 迁移管理模块
//!
//! 迁移文件命名为 `{version}_{name}.up.sql`，只向前执行；`.down.sql` 供人工回滚，不会被加载

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use folio_errors::{AppError, AppResult};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use tracing::{debug, info, warn};

/// 记录已执行迁移的表
const MIGRATION_TABLE: &str = "_migrations";

/// 迁移记录
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MigrationRecord {
    pub version: i64,
    pub name: String,
    pub applied_at: chrono::DateTime<chrono::Utc>,
    pub checksum: String,
}

/// 迁移定义
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: i64,
    pub name: String,
    pub sql: String,
    /// sql 的 SHA-256
    pub checksum: String,
}

impl Migration {
    pub fn new(version: i64, name: impl Into<String>, sql: impl Into<String>) -> Self {
        let sql = sql.into();
        let checksum = hex::encode(Sha256::digest(sql.as_bytes()));
        Self {
            version,
            name: name.into(),
            sql,
            checksum,
        }
    }

    /// 从目录加载迁移，按版本排序
    pub fn load_dir(dir: impl AsRef<Path>) -> AppResult<Vec<Migration>> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir).map_err(|e| {
            AppError::io(format!(
                "Failed to read migration directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        let mut migrations: BTreeMap<i64, Migration> = BTreeMap::new();

        for entry in entries {
            let path = entry?.path();
            let Some((version, name)) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(parse_file_name)
            else {
                debug!(file = %path.display(), "Skipping non-migration file");
                continue;
            };

            let migration = Migration::new(version, name, std::fs::read_to_string(&path)?);
            if migrations.insert(version, migration).is_some() {
                return Err(AppError::validation(format!(
                    "Duplicate migration version {}",
                    version
                )));
            }
        }

        Ok(migrations.into_values().collect())
    }
}

/// 解析 `{version}_{name}.up.sql`
fn parse_file_name(file_name: &str) -> Option<(i64, String)> {
    let (version, name) = file_name.strip_suffix(".up.sql")?.split_once('_')?;
    Some((version.parse().ok()?, name.to_string()))
}

/// 迁移管理器
pub struct MigrationManager {
    pool: PgPool,
}

impl MigrationManager {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn ensure_table(&self) -> AppResult<()> {
        let sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {MIGRATION_TABLE} (
                version BIGINT PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                checksum CHAR(64) NOT NULL
            )
            "#
        );

        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to create migration table: {}", e)))?;
        Ok(())
    }

    pub async fn applied_migrations(&self) -> AppResult<Vec<MigrationRecord>> {
        let sql = format!(
            "SELECT version, name, applied_at, checksum FROM {MIGRATION_TABLE} ORDER BY version"
        );

        sqlx::query_as::<_, MigrationRecord>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to read applied migrations: {}", e)))
    }

    /// 在单个事务中执行迁移并记录
    async fn apply(&self, migration: &Migration) -> AppResult<()> {
        let failed = |step: &str, e: sqlx::Error| {
            AppError::database(format!(
                "Migration {} ({}) failed to {}: {}",
                migration.version, migration.name, step, e
            ))
        };

        let mut tx = self.pool.begin().await.map_err(|e| failed("begin", e))?;

        // 迁移文件可能包含多条语句，不能走预编译
        sqlx::raw_sql(&migration.sql)
            .execute(&mut *tx)
            .await
            .map_err(|e| failed("execute", e))?;

        sqlx::query(&format!(
            "INSERT INTO {MIGRATION_TABLE} (version, name, checksum) VALUES ($1, $2, $3)"
        ))
        .bind(migration.version)
        .bind(&migration.name)
        .bind(&migration.checksum)
        .execute(&mut *tx)
        .await
        .map_err(|e| failed("record", e))?;

        tx.commit().await.map_err(|e| failed("commit", e))?;

        info!(version = migration.version, name = %migration.name, "Migration applied");
        Ok(())
    }

    /// 执行所有待处理的迁移，遇到第一个失败即停止；
    /// 已应用的迁移被修改时不执行任何迁移
    pub async fn migrate(&self, migrations: &[Migration]) -> AppResult<MigrationResult> {
        self.ensure_table().await?;
        let applied = self.applied_migrations().await?;
        let plan = plan_migrations(&applied, migrations);

        let mut result = MigrationResult {
            applied: Vec::new(),
            skipped: plan.skipped,
            errors: plan.errors,
        };

        for migration in plan.pending {
            if let Err(e) = self.apply(migration).await {
                result.errors.push(MigrationError {
                    version: migration.version,
                    name: migration.name.clone(),
                    error: e.to_string(),
                });
                break;
            }
            result.applied.push(migration.version);
        }

        Ok(result)
    }
}

/// 加载目录中的迁移并执行，任何错误都视为失败
pub async fn run_migrations(pool: &PgPool, dir: impl AsRef<Path>) -> AppResult<MigrationResult> {
    info!("Migrating database schema (if required)");
    let migrations = Migration::load_dir(dir)?;
    let result = MigrationManager::new(pool.clone())
        .migrate(&migrations)
        .await?;

    if let Some(first) = result.errors.first() {
        return Err(AppError::database(format!(
            "Error migrating database schema at version {} ({}): {}",
            first.version, first.name, first.error
        )));
    }

    info!(
        applied = result.applied_count(),
        skipped = result.skipped.len(),
        "Done migrating database schema"
    );
    Ok(result)
}

struct MigrationPlan<'a> {
    pending: Vec<&'a Migration>,
    skipped: Vec<i64>,
    errors: Vec<MigrationError>,
}

/// 对比已应用记录，得出待执行的迁移与校验和冲突。
/// 存在冲突时待执行列表为空
fn plan_migrations<'a>(applied: &[MigrationRecord], migrations: &'a [Migration]) -> MigrationPlan<'a> {
    let checksums: HashMap<i64, &str> = applied
        .iter()
        .map(|r| (r.version, r.checksum.as_str()))
        .collect();
    let mut sorted: Vec<&Migration> = migrations.iter().collect();
    sorted.sort_by_key(|m| m.version);

    let mut plan = MigrationPlan {
        pending: Vec::new(),
        skipped: Vec::new(),
        errors: Vec::new(),
    };

    for migration in sorted {
        match checksums.get(&migration.version) {
            None => plan.pending.push(migration),
            Some(checksum) if *checksum == migration.checksum => plan.skipped.push(migration.version),
            Some(_) => {
                warn!(version = migration.version, name = %migration.name, "Applied migration has been modified");
                plan.errors.push(MigrationError {
                    version: migration.version,
                    name: migration.name.clone(),
                    error: "Checksum mismatch - migration has been modified".to_string(),
                });
            }
        }
    }

    if !plan.errors.is_empty() && !plan.pending.is_empty() {
        warn!(pending = plan.pending.len(), "Not applying pending migrations");
        plan.pending.clear();
    }

    plan
}

/// 迁移结果
#[derive(Debug, Clone)]
pub struct MigrationResult {
    pub applied: Vec<i64>,
    pub skipped: Vec<i64>,
    pub errors: Vec<MigrationError>,
}

impl MigrationResult {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }
}

/// 迁移错误
#[derive(Debug, Clone)]
pub struct MigrationError {
    pub version: i64,
    pub name: String,
    pub error: String,
}
