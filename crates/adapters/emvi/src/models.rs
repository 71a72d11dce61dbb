use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 文章元数据
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    #[serde(default)]
    pub published: DateTime<Utc>,
    #[serde(default)]
    pub mod_time: DateTime<Utc>,
    #[serde(default)]
    pub latest_article_content: Option<ArticleContent>,
}

impl Article {
    pub fn title(&self) -> &str {
        self.latest_article_content
            .as_ref()
            .map(|c| c.title.as_str())
            .unwrap_or_default()
    }

    pub fn language_id(&self) -> &str {
        self.latest_article_content
            .as_ref()
            .map(|c| c.language_id.as_str())
            .unwrap_or_default()
    }

    /// 正文是否已加载
    pub fn has_content(&self) -> bool {
        self.latest_article_content
            .as_ref()
            .is_some_and(|c| !c.content.is_empty())
    }
}

/// 文章正文
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArticleContent {
    #[serde(default)]
    pub language_id: String,
    #[serde(default)]
    pub title: String,
    /// HTML 正文
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub mod_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    #[default]
    Descending,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Ascending => "asc",
            SortDirection::Descending => "desc",
        }
    }
}

/// 文章查询条件
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArticleFilter {
    pub offset: usize,
    /// 逗号分隔的标签
    pub tags: String,
    pub sort_published: Option<SortDirection>,
}

impl ArticleFilter {
    pub fn tagged(tags: impl Into<String>) -> Self {
        Self {
            tags: tags.into(),
            sort_published: Some(SortDirection::Descending),
            ..Default::default()
        }
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// 转换为查询参数
    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("offset", self.offset.to_string())];

        if !self.tags.is_empty() {
            params.push(("tags", self.tags.clone()));
        }
        if let Some(sort) = self.sort_published {
            params.push(("sort_published", sort.as_str().to_string()));
        }

        params
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ArticleResults {
    #[serde(default)]
    pub results: Vec<Article>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ArticleResponse {
    pub content: ArticleContent,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: u64,
}
