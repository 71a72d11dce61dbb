//! folio-config - 配置加载库
//!
//! 配置按以下顺序合并，后者覆盖前者：
//! 1. `{config_dir}/default.toml`
//! 2. `{config_dir}/{APP_ENV}.toml`
//! 3. `MB_` 前缀的环境变量（`MB_DB_HOST` -> `db.host`）
//!
//! 环境变量只有 [`TYPED_KEYS`] 中的键按数值或布尔值解析，
//! 其余一律保留原始字符串，`MB_DB_PASSWORD=0123` 不会变成数字。

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::Secret;
use serde::Deserialize;
use thiserror::Error;

/// 环境变量前缀
pub const ENV_PREFIX: &str = "MB_";

/// 映射为嵌套表的环境变量前缀
const SECTIONS: &[&str] = &["db", "emvi", "tracking", "cors", "blog", "metrics"];

/// 非字符串类型的配置键
const TYPED_KEYS: &[&str] = &[
    "hot_reload",
    "tls",
    "db.port",
    "db.connect_timeout_secs",
    "db.max_connections",
    "emvi.timeout_secs",
    "tracking.session_max_age_secs",
    "tracking.worker_batch_size",
    "tracking.worker_flush_secs",
    "tracking.active_visitor_minutes",
    "blog.cache_ttl_secs",
    "blog.latest_articles",
    "metrics.enabled",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] figment::Error),
}

/// 数据库配置
#[derive(Debug, Clone, Deserialize)]
pub struct DbConfig {
    #[serde(default = "default_db_host")]
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    #[serde(default = "default_db_user")]
    pub user: String,
    pub password: Option<Secret<String>>,
    /// 数据库名
    #[serde(default = "default_db_user")]
    pub schema: String,
    #[serde(default = "default_sslmode")]
    pub sslmode: String,
    pub sslcert: Option<String>,
    pub sslkey: Option<String>,
    pub sslrootcert: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_db_port() -> u16 {
    5432
}

fn default_db_user() -> String {
    "postgres".to_string()
}

fn default_sslmode() -> String {
    "prefer".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_max_connections() -> u32 {
    10
}

/// Emvi 内容 API 配置
#[derive(Debug, Clone, Deserialize)]
pub struct EmviConfig {
    pub client_id: String,
    pub client_secret: Secret<String>,
    pub orga: String,
    #[serde(default = "default_emvi_api_url")]
    pub api_url: String,
    #[serde(default = "default_emvi_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_emvi_api_url() -> String {
    "https://api.emvi.com".to_string()
}

fn default_emvi_auth_url() -> String {
    "https://auth.emvi.com".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

/// 访问统计配置
#[derive(Debug, Clone, Deserialize)]
pub struct TrackingConfig {
    pub salt: Secret<String>,
    #[serde(default = "default_session_max_age_secs")]
    pub session_max_age_secs: u64,
    #[serde(default = "default_worker_batch_size")]
    pub worker_batch_size: usize,
    #[serde(default = "default_worker_flush_secs")]
    pub worker_flush_secs: u64,
    #[serde(default = "default_active_visitor_minutes")]
    pub active_visitor_minutes: i64,
}

fn default_session_max_age_secs() -> u64 {
    30 * 60
}

fn default_worker_batch_size() -> usize {
    100
}

fn default_worker_flush_secs() -> u64 {
    10
}

fn default_active_visitor_minutes() -> i64 {
    10
}

/// 博客缓存配置
#[derive(Debug, Clone, Deserialize)]
pub struct BlogConfig {
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_file_cache_dir")]
    pub file_cache_dir: String,
    #[serde(default = "default_latest_articles")]
    pub latest_articles: usize,
    #[serde(default = "default_tag")]
    pub tag: String,
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

fn default_file_cache_dir() -> String {
    "static/blog".to_string()
}

fn default_latest_articles() -> usize {
    3
}

fn default_tag() -> String {
    "blog".to_string()
}

impl Default for BlogConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl_secs(),
            file_cache_dir: default_file_cache_dir(),
            latest_articles: default_latest_articles(),
            tag: default_tag(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CorsConfig {
    #[serde(default)]
    pub log_level: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
}

/// 应用配置
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_app_env")]
    pub app_env: String,
    /// 监听地址，例如 `0.0.0.0:8080`
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub hot_reload: bool,
    /// 逗号分隔的 CORS 来源
    #[serde(default)]
    pub allowed_origins: String,
    /// 逗号分隔的站点域名
    #[serde(default)]
    pub domain: String,
    #[serde(default = "default_template_dir")]
    pub template_dir: String,
    #[serde(default = "default_static_dir")]
    pub static_dir: String,
    #[serde(default = "default_schema_dir")]
    pub schema_dir: String,
    /// 通过 ACME (Let's Encrypt) 为 `domain` 申请证书并在 `host` 上提供 HTTPS
    #[serde(default)]
    pub tls: bool,
    /// ACME 账户联系邮箱
    #[serde(default)]
    pub tls_email: String,
    #[serde(default = "default_tls_cache_dir")]
    pub tls_cache_dir: String,
    #[serde(default)]
    pub cors: CorsConfig,
    pub db: DbConfig,
    pub emvi: EmviConfig,
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub blog: BlogConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

fn default_app_env() -> String {
    "development".to_string()
}

fn default_host() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_template_dir() -> String {
    "template".to_string()
}

fn default_static_dir() -> String {
    "static".to_string()
}

fn default_schema_dir() -> String {
    "schema".to_string()
}

fn default_tls_cache_dir() -> String {
    "certs".to_string()
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    pub fn load(config_dir: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| default_app_env());

        let mut figment = Figment::new()
            .merge(Serialized::default("app_env", &env))
            .merge(Toml::file(format!("{}/default.toml", config_dir)))
            .merge(Toml::file(format!("{}/{}.toml", config_dir, env)))
            .merge(env_vars().filter(|key| is_typed_key(key.as_str())));

        for (key, value) in env_vars().filter(|key| !is_typed_key(key.as_str())).iter() {
            figment = figment.merge(Serialized::default(key.as_str(), value));
        }

        Ok(figment.extract()?)
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.app_env == "production"
    }

    pub fn allowed_origins(&self) -> Vec<String> {
        split_list(&self.allowed_origins)
    }

    pub fn domains(&self) -> Vec<String> {
        split_list(&self.domain)
    }

    /// ACME 账户联系地址，未配置邮箱时为 `None`
    pub fn tls_contact(&self) -> Option<String> {
        let email = self.tls_email.trim();
        (!email.is_empty()).then(|| format!("mailto:{}", email))
    }
}

fn env_vars() -> Env {
    Env::prefixed(ENV_PREFIX).map(|key| env_key(key.as_str()).into())
}

fn is_typed_key(key: &str) -> bool {
    TYPED_KEYS.iter().any(|typed| typed.eq_ignore_ascii_case(key))
}

/// 把去掉前缀的环境变量名转换为配置路径
fn env_key(raw: &str) -> String {
    let key = raw.to_ascii_lowercase();

    for section in SECTIONS {
        if let Some(rest) = key
            .strip_prefix(section)
            .and_then(|rest| rest.strip_prefix('_'))
        {
            return format!("{}.{}", section, normalize_key(rest));
        }
    }

    normalize_key(&key)
}

fn normalize_key(key: &str) -> String {
    match key {
        "loglevel" => "log_level".to_string(),
        other => other.to_string(),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
