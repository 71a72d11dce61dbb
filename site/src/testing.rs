//! 测试用的内存存储、模板与内容源

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use folio_adapter_emvi::{Article, ArticleContent, MockContentSource};
use folio_blog::BlogOptions;
use folio_errors::AppResult;
use folio_render::TemplateCache;
use folio_tracking::{
    ActiveVisitors, DayStats, Dimension, DimensionCount, Filter, Hit, HourStats, PathDayStats,
    PathVisitors, PlatformCount, Store, Tracker, TrackerOptions,
};
use secrecy::Secret;

#[derive(Default)]
pub(crate) struct MemoryStore {
    pub(crate) hits: Mutex<Vec<Hit>>,
    /// 读取接口返回固定的统计数据
    sample: bool,
}

impl MemoryStore {
    pub(crate) fn sample() -> Self {
        Self {
            sample: true,
            ..Default::default()
        }
    }
}

fn count(value: &str, visitors: i64) -> DimensionCount {
    DimensionCount {
        value: value.to_string(),
        visitors,
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }

    async fn save_hits(&self, hits: &[Hit]) -> AppResult<()> {
        self.hits.lock().unwrap().extend_from_slice(hits);
        Ok(())
    }

    async fn hit_days(&self, _before: NaiveDate) -> AppResult<Vec<NaiveDate>> {
        Ok(vec![])
    }

    async fn aggregate_day(&self, _day: NaiveDate) -> AppResult<u64> {
        Ok(0)
    }

    async fn active_visitors(&self, _since: DateTime<Utc>) -> AppResult<ActiveVisitors> {
        if !self.sample {
            return Ok(ActiveVisitors::default());
        }
        Ok(ActiveVisitors {
            pages: vec![PathVisitors {
                path: "/blog".to_string(),
                visitors: 2,
            }],
            total: 2,
        })
    }

    async fn visitors(&self, filter: &Filter) -> AppResult<Vec<DayStats>> {
        if !self.sample {
            return Ok(vec![]);
        }
        Ok(vec![DayStats {
            day: filter.from,
            visitors: 5,
            sessions: 6,
            bounces: 2,
        }])
    }

    async fn page_visitors(&self, filter: &Filter) -> AppResult<Vec<PathDayStats>> {
        if !self.sample {
            return Ok(vec![]);
        }
        Ok(vec![PathDayStats {
            path: "/blog/hello-world-abc".to_string(),
            day: filter.from,
            visitors: 4,
            sessions: 4,
            bounces: 1,
        }])
    }

    async fn visitor_hours(&self, filter: &Filter) -> AppResult<Vec<HourStats>> {
        if !self.sample {
            return Ok(vec![]);
        }
        Ok(vec![HourStats {
            day: filter.from,
            hour: 9,
            visitors: 3,
        }])
    }

    async fn dimension(&self, dimension: Dimension, _filter: &Filter) -> AppResult<Vec<DimensionCount>> {
        if !self.sample {
            return Ok(vec![]);
        }
        Ok(match dimension {
            Dimension::Referrer => vec![count("", 2), count("https://news.ycombinator.com/", 3)],
            Dimension::Country => vec![count("de", 4)],
            _ => vec![count("en", 3), count("", 1)],
        })
    }

    async fn platform(&self, _filter: &Filter) -> AppResult<PlatformCount> {
        if !self.sample {
            return Ok(PlatformCount::default());
        }
        Ok(PlatformCount {
            desktop: 3,
            mobile: 1,
            unknown: 1,
        })
    }
}

pub(crate) fn templates() -> TemplateCache {
    let templates: HashMap<String, String> = [
        ("about.html", "about:{% for a in latest %}[{{ a.title | slugify }}-{{ a.id }}]{% endfor %}"),
        ("legal.html", "legal"),
        ("blog.html", "blog:{% for y in years %}{{ y.year }}({{ y.articles | length }}){% endfor %}"),
        ("article.html", "<h1>{{ title }}</h1>{{ content | safe }}"),
        ("tracking.html", "tracking:{{ start }}..{{ end }}"),
        ("notfound.html", "notfound"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    TemplateCache::from_strings(templates).unwrap()
}

pub(crate) fn source() -> MockContentSource {
    let mut source = MockContentSource::new();
    source.expect_find_articles().returning(|_, filter| {
        if filter.offset > 0 {
            return Ok(vec![]);
        }
        Ok(vec![Article {
            id: "abc".to_string(),
            published: Utc.with_ymd_and_hms(2020, 9, 12, 10, 0, 0).unwrap(),
            mod_time: Utc.with_ymd_and_hms(2020, 9, 13, 10, 0, 0).unwrap(),
            latest_article_content: Some(ArticleContent {
                language_id: "en".to_string(),
                title: "Hello World".to_string(),
                ..Default::default()
            }),
        }])
    });
    source.expect_get_article().returning(|_, _| {
        Ok(ArticleContent {
            language_id: "en".to_string(),
            title: "Hello World".to_string(),
            content: r#"<p>See <a href="/read/other-xyz">this</a></p>"#.to_string(),
            ..Default::default()
        })
    });
    source
}

pub(crate) fn blog_options(dir: &Path) -> BlogOptions {
    BlogOptions {
        cache_ttl: Duration::from_secs(3600),
        file_cache_dir: dir.to_path_buf(),
        public_path: "/static/blog".to_string(),
        latest_articles: 3,
        tag: "blog".to_string(),
    }
}

/// 刷新间隔足够长，只有 `stop()` 才会写入
pub(crate) fn tracker(store: Arc<dyn Store>) -> Arc<Tracker> {
    Arc::new(Tracker::new(
        store,
        TrackerOptions {
            salt: Secret::new("salt".to_string()),
            referrer_blacklist: vec!["marvinblum.de".to_string()],
            session_max_age: chrono::Duration::minutes(30),
            batch_size: 100,
            flush_interval: Duration::from_secs(3600),
            queue_capacity: 100,
        },
    ))
}
