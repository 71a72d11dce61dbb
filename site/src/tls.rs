//! HTTPS (ACME)

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context as _, bail};
use axum::Router;
use folio_config::AppConfig;
use futures::StreamExt;
use rustls_acme::{AcmeConfig, caches::DirCache};
use tracing::{error, info, warn};

use crate::shutdown::shutdown_signal;

/// 收到关闭信号后等待连接结束的最长时间
const GRACEFUL_SHUTDOWN: Duration = Duration::from_secs(10);

/// 证书申请与监听参数
#[derive(Debug, Clone, PartialEq)]
pub struct TlsOptions {
    pub addr: SocketAddr,
    pub domains: Vec<String>,
    pub contact: Option<String>,
    pub cache_dir: String,
    /// false 时使用 Let's Encrypt 的测试环境
    pub production: bool,
}

impl TlsOptions {
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        Self::new(
            &config.host,
            config.domains(),
            config.tls_contact(),
            &config.tls_cache_dir,
            config.is_production(),
        )
    }

    pub fn new(
        host: &str,
        domains: Vec<String>,
        contact: Option<String>,
        cache_dir: &str,
        production: bool,
    ) -> anyhow::Result<Self> {
        let addr: SocketAddr = host
            .parse()
            .with_context(|| format!("Invalid listen address {}", host))?;

        if domains.is_empty() {
            bail!("TLS requires at least one domain");
        }

        if contact.is_none() {
            warn!("No ACME contact email configured");
        }

        Ok(Self {
            addr,
            domains,
            contact,
            cache_dir: cache_dir.to_string(),
            production,
        })
    }
}

/// 在 `options.addr` 上提供 HTTPS，证书由 ACME 自动申请与续期
pub async fn serve(app: Router, options: TlsOptions) -> anyhow::Result<()> {
    let mut acme = AcmeConfig::new(options.domains.clone());
    if let Some(contact) = &options.contact {
        acme = acme.contact_push(contact);
    }
    let mut state = acme
        .cache(DirCache::new(options.cache_dir.clone()))
        .directory_lets_encrypt(options.production)
        .state();
    let acceptor = state.axum_acceptor(state.default_rustls_config());

    tokio::spawn(async move {
        while let Some(event) = state.next().await {
            match event {
                Ok(ok) => info!(event = ?ok, "ACME event"),
                Err(e) => error!(error = ?e, "ACME error"),
            }
        }
    });

    let handle = axum_server::Handle::new();
    let shutdown = handle.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.graceful_shutdown(Some(GRACEFUL_SHUTDOWN));
    });

    info!(addr = %options.addr, domains = ?options.domains, "Starting TLS server...");
    axum_server::bind(options.addr)
        .acceptor(acceptor)
        .handle(handle)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .context("TLS server failed")?;

    Ok(())
}
