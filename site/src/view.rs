//! 模板数据

use chrono::{DateTime, Utc};
use folio_adapter_emvi::Article;
use folio_blog::YearArticles;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ArticleView {
    pub id: String,
    pub title: String,
    pub published: DateTime<Utc>,
    /// 已改写的 HTML 正文
    pub content: String,
}

impl From<&Article> for ArticleView {
    fn from(article: &Article) -> Self {
        Self {
            id: article.id.clone(),
            title: article.title().to_string(),
            published: article.published,
            content: article
                .latest_article_content
                .as_ref()
                .map(|c| c.content.clone())
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct YearView {
    pub year: i32,
    pub articles: Vec<ArticleView>,
}

impl From<&YearArticles> for YearView {
    fn from(group: &YearArticles) -> Self {
        Self {
            year: group.year,
            articles: group.articles.iter().map(ArticleView::from).collect(),
        }
    }
}
