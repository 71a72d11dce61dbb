//! Emvi 内容 API 适配器
//!
//! 提供：
//! - 文章搜索（分页）
//! - 文章正文读取
//! - 附件下载

mod client;
mod models;

pub use client::EmviClient;
pub use models::*;

use async_trait::async_trait;
use folio_errors::AppResult;

/// 博客内容来源
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// 查询一页文章，空结果表示没有更多
    async fn find_articles(&self, query: &str, filter: &ArticleFilter) -> AppResult<Vec<Article>>;

    /// 读取文章某个语言的最新正文
    async fn get_article(&self, id: &str, language_id: &str) -> AppResult<ArticleContent>;

    /// 下载附件原始内容
    async fn download(&self, url: &str) -> AppResult<Vec<u8>>;
}
