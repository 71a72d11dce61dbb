//! 博客文章缓存
//!
//! 整表定期重新拉取；`mod_time` 未变的文章沿用已加载的正文，
//! 否则重新读取正文、镜像附件并改写链接。

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Datelike;
use folio_adapter_emvi::{Article, ArticleContent, ArticleFilter, ContentSource};
use folio_config::BlogConfig;
use folio_errors::AppResult;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info};

use crate::attachments::mirror_attachments;
use crate::content::rewrite_content;

/// 博客缓存参数
#[derive(Debug, Clone)]
pub struct BlogOptions {
    pub cache_ttl: Duration,
    /// 附件镜像目录
    pub file_cache_dir: PathBuf,
    /// 镜像目录对外的 URL 前缀
    pub public_path: String,
    pub latest_articles: usize,
    pub tag: String,
}

impl From<&BlogConfig> for BlogOptions {
    fn from(config: &BlogConfig) -> Self {
        let trimmed = config
            .file_cache_dir
            .trim_start_matches("./")
            .trim_matches('/');

        Self {
            cache_ttl: Duration::from_secs(config.cache_ttl_secs),
            file_cache_dir: PathBuf::from(&config.file_cache_dir),
            public_path: format!("/{}", trimmed),
            latest_articles: config.latest_articles,
            tag: config.tag.clone(),
        }
    }
}

/// 某一年的文章，按发布时间倒序
#[derive(Debug, Clone, Serialize)]
pub struct YearArticles {
    pub year: i32,
    pub articles: Vec<Article>,
}

struct BlogState {
    articles: HashMap<String, Article>,
    by_year: Vec<YearArticles>,
    latest: Vec<Article>,
    next_update: Instant,
}

impl BlogState {
    fn empty() -> Self {
        Self {
            articles: HashMap::new(),
            by_year: Vec::new(),
            latest: Vec::new(),
            next_update: Instant::now(),
        }
    }

    fn set_articles(&mut self, articles: HashMap<String, Article>, latest_count: usize) {
        let mut sorted: Vec<Article> = articles.values().cloned().collect();
        sorted.sort_by(|a, b| b.published.cmp(&a.published).then_with(|| a.id.cmp(&b.id)));

        let mut by_year: Vec<YearArticles> = Vec::new();
        for article in &sorted {
            let year = article.published.year();
            match by_year.last_mut() {
                Some(group) if group.year == year => group.articles.push(article.clone()),
                _ => by_year.push(YearArticles {
                    year,
                    articles: vec![article.clone()],
                }),
            }
        }

        sorted.truncate(latest_count);
        self.latest = sorted;
        self.by_year = by_year;
        self.articles = articles;
    }
}

/// 博客内容缓存
pub struct Blog {
    source: Arc<dyn ContentSource>,
    options: BlogOptions,
    state: RwLock<BlogState>,
    refresh_lock: Mutex<()>,
}

impl Blog {
    pub fn new(source: Arc<dyn ContentSource>, options: BlogOptions) -> Self {
        Self {
            source,
            options,
            state: RwLock::new(BlogState::empty()),
            refresh_lock: Mutex::new(()),
        }
    }

    /// 创建缓存目录并完成首次加载；首次加载失败不会阻止启动
    pub async fn init(source: Arc<dyn ContentSource>, options: BlogOptions) -> AppResult<Self> {
        info!("Initializing blog");
        tokio::fs::create_dir_all(&options.file_cache_dir).await?;

        let blog = Self::new(source, options);
        if let Err(e) = blog.refresh().await {
            error!(error = %e, "Initial blog refresh failed");
        }

        Ok(blog)
    }

    /// 立即重新加载全部文章
    pub async fn refresh(&self) -> AppResult<usize> {
        let _guard = self.refresh_lock.lock().await;
        self.load_articles().await
    }

    /// 缓存过期时重新加载，返回是否成功刷新
    ///
    /// 并发调用只会触发一次加载。
    pub async fn refresh_if_required(&self) -> bool {
        if !self.is_due().await {
            return false;
        }

        let _guard = self.refresh_lock.lock().await;
        if !self.is_due().await {
            return false;
        }

        self.load_articles().await.is_ok()
    }

    async fn is_due(&self) -> bool {
        self.state.read().await.next_update <= Instant::now()
    }

    async fn load_articles(&self) -> AppResult<usize> {
        info!("Refreshing blog articles...");

        let fetched = match self.fetch_all().await {
            Ok(fetched) => fetched,
            Err(e) => {
                error!(error = %e, "Error loading blog articles");
                self.state.write().await.next_update = Instant::now() + self.options.cache_ttl;
                return Err(e);
            }
        };

        let previous = self.state.read().await.articles.clone();
        let mut articles = HashMap::with_capacity(fetched.len());

        for mut article in fetched {
            match previous.get(&article.id) {
                Some(cached) if cached.mod_time == article.mod_time && cached.has_content() => {
                    debug!(id = %article.id, "Article unchanged, reusing content");
                    article.latest_article_content = cached.latest_article_content.clone();
                }
                _ => {
                    if let Some(content) = self.load_content(&article).await {
                        article.latest_article_content = Some(content);
                    }
                }
            }

            articles.insert(article.id.clone(), article);
        }

        let count = articles.len();
        {
            let mut state = self.state.write().await;
            state.set_articles(articles, self.options.latest_articles);
            state.next_update = Instant::now() + self.options.cache_ttl;
        }

        metrics::counter!("blog_refreshes_total").increment(1);
        info!(count, "Done refreshing blog articles");
        Ok(count)
    }

    /// 翻页直到返回空页
    async fn fetch_all(&self) -> AppResult<Vec<Article>> {
        let mut all = Vec::new();

        loop {
            let filter = ArticleFilter::tagged(&self.options.tag).with_offset(all.len());
            let page = self.source.find_articles("", &filter).await?;

            if page.is_empty() {
                break;
            }

            all.extend(page);
        }

        Ok(all)
    }

    async fn load_content(&self, article: &Article) -> Option<ArticleContent> {
        let mut content = match self
            .source
            .get_article(&article.id, article.language_id())
            .await
        {
            Ok(content) => content,
            Err(e) => {
                error!(error = %e, id = %article.id, "Error loading article");
                return None;
            }
        };

        mirror_attachments(
            self.source.as_ref(),
            &self.options.file_cache_dir,
            &article.id,
            &content.content,
        )
        .await;

        content.content = rewrite_content(&content.content, &article.id, &self.options.public_path);
        debug!(id = %article.id, "Article loaded");
        Some(content)
    }

    pub async fn article(&self, id: &str) -> Option<Article> {
        self.state.read().await.articles.get(id).cloned()
    }

    pub async fn articles_by_year(&self) -> Vec<YearArticles> {
        self.state.read().await.by_year.clone()
    }

    pub async fn latest_articles(&self) -> Vec<Article> {
        self.state.read().await.latest.clone()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.articles.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// 从 `{slug}-{id}` 中取出文章 id
pub fn article_id_from_slug(slug: &str) -> Option<&str> {
    slug.rsplit('-').next().filter(|id| !id.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use folio_adapter_emvi::MockContentSource;
    use folio_errors::AppError;

    fn article(id: &str, year: i32, month: u32, title: &str) -> Article {
        Article {
            id: id.to_string(),
            published: Utc.with_ymd_and_hms(year, month, 1, 12, 0, 0).unwrap(),
            mod_time: Utc.with_ymd_and_hms(year, month, 2, 12, 0, 0).unwrap(),
            latest_article_content: Some(ArticleContent {
                language_id: "en".to_string(),
                title: title.to_string(),
                ..Default::default()
            }),
        }
    }

    fn content(body: &str) -> ArticleContent {
        ArticleContent {
            language_id: "en".to_string(),
            title: "title".to_string(),
            content: body.to_string(),
            ..Default::default()
        }
    }

    fn options(dir: &std::path::Path, ttl: Duration) -> BlogOptions {
        BlogOptions {
            cache_ttl: ttl,
            file_cache_dir: dir.to_path_buf(),
            public_path: "/static/blog".to_string(),
            latest_articles: 2,
            tag: "blog".to_string(),
        }
    }

    fn paged_source(pages: Vec<Vec<Article>>) -> MockContentSource {
        let mut source = MockContentSource::new();
        let mut offset = 0;
        for page in pages.into_iter().chain(std::iter::once(Vec::new())) {
            let expected = offset;
            offset += page.len();
            source
                .expect_find_articles()
                .withf(move |query, filter| {
                    query.is_empty() && filter.offset == expected && filter.tags == "blog"
                })
                .returning(move |_, _| Ok(page.clone()));
        }
        source
    }

    #[tokio::test]
    async fn test_refresh_pages_and_groups_articles() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = paged_source(vec![
            vec![article("c", 2021, 3, "Third"), article("b", 2020, 6, "Second")],
            vec![article("a", 2020, 1, "First")],
        ]);
        source
            .expect_get_article()
            .times(3)
            .returning(|id, _| Ok(content(&format!(r#"<a href="/read/x-{}">link</a>"#, id))));

        let blog = Blog::new(Arc::new(source), options(dir.path(), Duration::from_secs(3600)));
        assert_eq!(blog.refresh().await.unwrap(), 3);

        let by_year = blog.articles_by_year().await;
        assert_eq!(by_year.len(), 2);
        assert_eq!(by_year[0].year, 2021);
        assert_eq!(by_year[1].year, 2020);
        assert_eq!(
            by_year[1].articles.iter().map(|a| a.id.as_str()).collect::<Vec<_>>(),
            vec!["b", "a"]
        );

        let latest = blog.latest_articles().await;
        assert_eq!(latest.iter().map(|a| a.id.as_str()).collect::<Vec<_>>(), vec!["c", "b"]);

        let a = blog.article("a").await.unwrap();
        assert_eq!(
            a.latest_article_content.unwrap().content,
            r#"<a href="/blog/x-a">link</a>"#
        );
    }

    #[tokio::test]
    async fn test_unchanged_articles_are_not_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = MockContentSource::new();
        source
            .expect_find_articles()
            .withf(|_, filter| filter.offset == 0)
            .returning(|_, _| Ok(vec![article("a", 2020, 1, "First")]));
        source
            .expect_find_articles()
            .withf(|_, filter| filter.offset == 1)
            .returning(|_, _| Ok(Vec::new()));
        source
            .expect_get_article()
            .times(1)
            .returning(|_, _| Ok(content("<p>body</p>")));

        let blog = Blog::new(Arc::new(source), options(dir.path(), Duration::ZERO));
        blog.refresh().await.unwrap();
        blog.refresh().await.unwrap();

        let a = blog.article("a").await.unwrap();
        assert_eq!(a.latest_article_content.unwrap().content, "<p>body</p>");
    }

    #[tokio::test]
    async fn test_failed_content_load_keeps_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = paged_source(vec![vec![article("a", 2020, 1, "First")]]);
        source
            .expect_get_article()
            .returning(|_, _| Err(AppError::external_service("boom")));

        let blog = Blog::new(Arc::new(source), options(dir.path(), Duration::from_secs(60)));
        blog.refresh().await.unwrap();

        let a = blog.article("a").await.unwrap();
        assert_eq!(a.title(), "First");
        assert!(!a.has_content());
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_previous_articles() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = MockContentSource::new();
        let mut calls = 0;
        source.expect_find_articles().returning(move |_, filter| {
            calls += 1;
            match (calls, filter.offset) {
                (1, 0) => Ok(vec![article("a", 2020, 1, "First")]),
                (2, _) => Ok(Vec::new()),
                _ => Err(AppError::external_service("503 Service Unavailable")),
            }
        });
        source
            .expect_get_article()
            .returning(|_, _| Ok(content("<p>body</p>")));

        let blog = Blog::new(Arc::new(source), options(dir.path(), Duration::ZERO));
        blog.refresh().await.unwrap();
        assert!(blog.refresh().await.is_err());

        assert_eq!(blog.len().await, 1);
        assert!(blog.article("a").await.is_some());
    }

    #[tokio::test]
    async fn test_refresh_if_required_respects_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = paged_source(vec![]);
        source.expect_get_article().never();

        let blog = Blog::new(Arc::new(source), options(dir.path(), Duration::from_secs(3600)));

        // 新建的缓存立即到期
        assert!(blog.refresh_if_required().await);
        assert!(!blog.refresh_if_required().await);
        assert!(blog.is_empty().await);
    }

    #[tokio::test]
    async fn test_init_creates_cache_dir() {
        let dir = tempfile::tempdir().unwrap();
        let cache_dir = dir.path().join("static").join("blog");
        let source = paged_source(vec![]);

        let blog = Blog::init(Arc::new(source), options(&cache_dir, Duration::from_secs(3600)))
            .await
            .unwrap();

        assert!(cache_dir.is_dir());
        assert!(!blog.refresh_if_required().await);
    }

    #[test]
    fn test_article_id_from_slug() {
        assert_eq!(article_id_from_slug("my-first-post-Xy3k9"), Some("Xy3k9"));
        assert_eq!(article_id_from_slug("Xy3k9"), Some("Xy3k9"));
        assert_eq!(article_id_from_slug("trailing-"), None);
        assert_eq!(article_id_from_slug(""), None);
    }

    #[test]
    fn test_options_from_config() {
        let options = BlogOptions::from(&BlogConfig::default());

        assert_eq!(options.public_path, "/static/blog");
        assert_eq!(options.cache_ttl, Duration::from_secs(3600));
        assert_eq!(options.latest_articles, 3);
    }
}
