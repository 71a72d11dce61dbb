//! PostgreSQL 配置模块
//!
//! 由主机、端口、用户、SSL 证书等组件组装连接参数

use std::str::FromStr;
use std::time::Duration;

use folio_config::DbConfig;
use folio_errors::AppError;
use secrecy::{ExposeSecret, Secret};
use sqlx::postgres::{PgConnectOptions, PgSslMode};

/// SSL 模式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SslMode {
    Disable,
    Allow,
    #[default]
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

impl SslMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SslMode::Disable => "disable",
            SslMode::Allow => "allow",
            SslMode::Prefer => "prefer",
            SslMode::Require => "require",
            SslMode::VerifyCa => "verify-ca",
            SslMode::VerifyFull => "verify-full",
        }
    }
}

impl FromStr for SslMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "prefer" => Ok(SslMode::Prefer),
            "disable" => Ok(SslMode::Disable),
            "allow" => Ok(SslMode::Allow),
            "require" => Ok(SslMode::Require),
            "verify-ca" => Ok(SslMode::VerifyCa),
            "verify-full" => Ok(SslMode::VerifyFull),
            other => Err(AppError::validation(format!("Unknown sslmode: {}", other))),
        }
    }
}

impl From<SslMode> for PgSslMode {
    fn from(mode: SslMode) -> Self {
        match mode {
            SslMode::Disable => PgSslMode::Disable,
            SslMode::Allow => PgSslMode::Allow,
            SslMode::Prefer => PgSslMode::Prefer,
            SslMode::Require => PgSslMode::Require,
            SslMode::VerifyCa => PgSslMode::VerifyCa,
            SslMode::VerifyFull => PgSslMode::VerifyFull,
        }
    }
}

/// PostgreSQL 配置
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: Option<Secret<String>>,

    pub ssl_mode: SslMode,
    /// CA 证书路径
    pub ssl_root_cert: Option<String>,
    /// 客户端证书路径
    pub ssl_client_cert: Option<String>,
    /// 客户端密钥路径
    pub ssl_client_key: Option<String>,

    /// 会话时区
    pub timezone: String,
    pub connect_timeout: Duration,
    pub pool_max: u32,
    pub pool_min: u32,
    pub idle_timeout: Duration,
    pub application_name: Option<String>,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "postgres".to_string(),
            username: "postgres".to_string(),
            password: None,
            ssl_mode: SslMode::default(),
            ssl_root_cert: None,
            ssl_client_cert: None,
            ssl_client_key: None,
            timezone: "UTC".to_string(),
            connect_timeout: Duration::from_secs(30),
            pool_max: 10,
            pool_min: 1,
            idle_timeout: Duration::from_secs(600),
            application_name: None,
        }
    }
}

impl PostgresConfig {
    /// 从组件创建配置
    pub fn from_components(
        host: impl Into<String>,
        port: u16,
        database: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            database: database.into(),
            username: username.into(),
            ..Default::default()
        }
    }

    /// 从应用配置的 `[db]` 段创建
    pub fn from_db_config(db: &DbConfig) -> Result<Self, AppError> {
        Ok(
            Self::from_components(&db.host, db.port, &db.schema, &db.user)
                .with_ssl_mode(db.sslmode.parse()?)
                .with_ssl_certs(
                    non_empty(&db.sslrootcert),
                    non_empty(&db.sslcert),
                    non_empty(&db.sslkey),
                )
                .with_timezone(&db.timezone)
                .with_connect_timeout(Duration::from_secs(db.connect_timeout_secs))
                .with_pool(1, db.max_connections.max(1))
                .with_optional_password(db.password.clone()),
        )
    }

    pub fn with_password(self, password: impl Into<String>) -> Self {
        self.with_optional_password(Some(Secret::new(password.into())))
    }

    fn with_optional_password(mut self, password: Option<Secret<String>>) -> Self {
        self.password = password.filter(|p| !p.expose_secret().is_empty());
        self
    }

    pub fn with_ssl_mode(mut self, mode: SslMode) -> Self {
        self.ssl_mode = mode;
        self
    }

    pub fn with_ssl_certs(
        mut self,
        root_cert: Option<String>,
        client_cert: Option<String>,
        client_key: Option<String>,
    ) -> Self {
        self.ssl_root_cert = root_cert;
        self.ssl_client_cert = client_cert;
        self.ssl_client_key = client_key;
        self
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_pool(mut self, min: u32, max: u32) -> Self {
        self.pool_min = min;
        self.pool_max = max;
        self
    }

    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }

    /// 生成 sqlx 连接参数
    pub fn connect_options(&self) -> PgConnectOptions {
        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .database(&self.database)
            .ssl_mode(self.ssl_mode.into())
            .options([("timezone", self.timezone.as_str())]);

        if let Some(ref password) = self.password {
            options = options.password(password.expose_secret());
        }
        if let Some(ref root_cert) = self.ssl_root_cert {
            options = options.ssl_root_cert(root_cert);
        }
        if let Some(ref cert) = self.ssl_client_cert {
            options = options.ssl_client_cert(cert);
        }
        if let Some(ref key) = self.ssl_client_key {
            options = options.ssl_client_key(key);
        }
        if let Some(ref name) = self.application_name {
            options = options.application_name(name);
        }

        options
    }

    /// 不含密码的连接描述，用于日志
    pub fn describe(&self) -> String {
        format!(
            "postgres://{}@{}:{}/{}?sslmode={}&timezone={}",
            self.username,
            self.host,
            self.port,
            self.database,
            self.ssl_mode.as_str(),
            self.timezone
        )
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.trim().is_empty()).cloned()
}
