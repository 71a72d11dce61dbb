//! 博客
//!
//! 从内容平台拉取带指定标签的文章并缓存在内存中，
//! 附件镜像到本地静态目录，正文中的链接改写为本站地址。

mod attachments;
mod cache;
mod content;

pub use attachments::mirror_attachments;
pub use cache::{Blog, BlogOptions, YearArticles, article_id_from_slug};
pub use content::{Attachment, find_attachments, is_safe_file_name, rewrite_content};
