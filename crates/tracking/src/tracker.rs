//! 访问记录器
//!
//! 请求线程只负责构造访问记录并放入队列，后台任务按批量大小或时间间隔写入存储。

use std::mem;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use folio_config::TrackingConfig;
use parking_lot::Mutex;
use secrecy::{ExposeSecret, Secret};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::model::Hit;
use crate::request::{self, HitRequest};
use crate::session::SessionCache;
use crate::store::Store;
use crate::useragent;

/// 队列容量为批量大小的倍数
const QUEUE_BATCHES: usize = 10;

#[derive(Debug, Clone)]
pub struct TrackerOptions {
    pub salt: Secret<String>,
    /// 来源为这些域名（含子域名）时不记录来源
    pub referrer_blacklist: Vec<String>,
    pub session_max_age: chrono::Duration,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub queue_capacity: usize,
}

impl TrackerOptions {
    pub fn from_config(config: &TrackingConfig, referrer_blacklist: Vec<String>) -> Self {
        let batch_size = config.worker_batch_size.max(1);

        Self {
            salt: config.salt.clone(),
            referrer_blacklist,
            session_max_age: chrono::Duration::seconds(config.session_max_age_secs as i64),
            batch_size,
            flush_interval: Duration::from_secs(config.worker_flush_secs.max(1)),
            queue_capacity: batch_size * QUEUE_BATCHES,
        }
    }
}

/// 访问记录器
pub struct Tracker {
    salt: Secret<String>,
    referrer_blacklist: Vec<String>,
    sessions: Arc<SessionCache>,
    sender: mpsc::Sender<Hit>,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Tracker {
    /// 创建记录器并启动后台写入任务
    pub fn new(store: Arc<dyn Store>, options: TrackerOptions) -> Self {
        let (sender, receiver) = mpsc::channel(options.queue_capacity.max(1));
        let sessions = Arc::new(SessionCache::new(options.session_max_age));
        let shutdown = CancellationToken::new();

        let worker = Worker {
            store,
            receiver,
            sessions: sessions.clone(),
            batch_size: options.batch_size.max(1),
            flush_interval: options.flush_interval,
            shutdown: shutdown.clone(),
        };
        let handle = tokio::spawn(worker.run());

        info!(
            batch_size = options.batch_size,
            flush_secs = options.flush_interval.as_secs(),
            "Tracker started"
        );

        Self {
            salt: options.salt,
            referrer_blacklist: options.referrer_blacklist,
            sessions,
            sender,
            shutdown,
            worker: Mutex::new(Some(handle)),
        }
    }

    /// 记录一次访问，不阻塞；返回是否进入队列
    pub fn hit(&self, request: &HitRequest) -> bool {
        if self.shutdown.is_cancelled() {
            return false;
        }

        let Some(hit) = self.build_hit(request, Utc::now()) else {
            return false;
        };

        match self.sender.try_send(hit) {
            Ok(()) => {
                metrics::counter!("tracking_hits_total").increment(1);
                true
            }
            Err(TrySendError::Full(_)) => {
                metrics::counter!("tracking_hits_dropped_total").increment(1);
                warn!("Tracking queue is full, dropping hit");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// 构造访问记录；爬虫、空 User-Agent 与预加载请求返回 `None`
    pub fn build_hit(&self, request: &HitRequest, now: DateTime<Utc>) -> Option<Hit> {
        let user_agent = request.user_agent();

        if user_agent.is_empty() || useragent::is_bot(user_agent) || request::is_prefetch(&request.headers) {
            return None;
        }

        let ip = request::client_ip(&request.headers, request.peer)
            .map(|ip| ip.to_string())
            .unwrap_or_default();
        let fingerprint = request::fingerprint(
            self.salt.expose_secret(),
            user_agent,
            &ip,
            now.date_naive(),
        );
        let session = self.sessions.session(&fingerprint, now);
        let ua = useragent::parse(user_agent);

        Some(Hit {
            fingerprint,
            session,
            time: now,
            path: request.uri.path().to_string(),
            url: request.uri.to_string(),
            language: request::language(&request.headers),
            user_agent: user_agent.to_string(),
            referrer: request::referrer(&request.headers, &request.uri, &self.referrer_blacklist),
            os: ua.os,
            os_version: ua.os_version,
            browser: ua.browser,
            browser_version: ua.browser_version,
            country_code: String::new(),
            desktop: ua.desktop,
            mobile: ua.mobile,
        })
    }

    /// 停止后台任务并写入队列中剩余的访问
    pub async fn stop(&self) {
        self.shutdown.cancel();

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Tracker worker failed");
            }
        }
    }
}

struct Worker {
    store: Arc<dyn Store>,
    receiver: mpsc::Receiver<Hit>,
    sessions: Arc<SessionCache>,
    batch_size: usize,
    flush_interval: Duration,
    shutdown: CancellationToken,
}

impl Worker {
    async fn run(mut self) {
        let mut buffer = Vec::with_capacity(self.batch_size);
        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                hit = self.receiver.recv() => match hit {
                    Some(hit) => {
                        buffer.push(hit);
                        if buffer.len() >= self.batch_size {
                            self.flush(&mut buffer).await;
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    self.flush(&mut buffer).await;
                    let expired = self.sessions.cleanup(Utc::now());
                    if expired > 0 {
                        debug!(expired, "Expired visitor sessions removed");
                    }
                }
                _ = self.shutdown.cancelled() => {
                    self.receiver.close();
                    while let Some(hit) = self.receiver.recv().await {
                        buffer.push(hit);
                    }
                    break;
                }
            }
        }

        self.flush(&mut buffer).await;
        info!("Tracker stopped");
    }

    async fn flush(&self, buffer: &mut Vec<Hit>) {
        if buffer.is_empty() {
            return;
        }

        let hits = mem::take(buffer);
        debug!(count = hits.len(), "Saving hits");

        if let Err(e) = self.store.save_hits(&hits).await {
            error!(error = %e, count = hits.len(), "Error saving hits");
        }
    }
}
