//! 共享状态

use std::sync::Arc;

use folio_adapter_emvi::ContentSource;
use folio_blog::{Blog, BlogOptions};
use folio_errors::AppResult;
use folio_render::TemplateCache;
use folio_tracking::{Analyzer, Store, Tracker};
use metrics_exporter_prometheus::PrometheusHandle;

#[derive(Clone)]
pub struct AppState {
    pub templates: Arc<TemplateCache>,
    pub blog: Arc<Blog>,
    pub tracker: Arc<Tracker>,
    pub analyzer: Arc<Analyzer>,
    pub store: Arc<dyn Store>,
    pub metrics: Option<PrometheusHandle>,
    /// 统计页面的“在线访客”时间窗口
    pub active_window: chrono::Duration,
}

impl AppState {
    /// 完成博客首次加载并组装状态
    ///
    /// 指标记录器需在调用前安装，首次加载上报的指标才不会丢失。
    pub async fn build(
        templates: TemplateCache,
        source: Arc<dyn ContentSource>,
        blog: BlogOptions,
        store: Arc<dyn Store>,
        tracker: Arc<Tracker>,
        metrics: Option<PrometheusHandle>,
        active_window: chrono::Duration,
    ) -> AppResult<Self> {
        let blog = Blog::init(source, blog).await?;

        Ok(Self {
            templates: Arc::new(templates),
            blog: Arc::new(blog),
            tracker,
            analyzer: Arc::new(Analyzer::new(store.clone())),
            store,
            metrics,
            active_window,
        })
    }

    /// 博客内容有更新时清空页面缓存
    pub async fn refresh_blog(&self) {
        if self.blog.refresh_if_required().await {
            self.templates.clear();
        }
    }
}
