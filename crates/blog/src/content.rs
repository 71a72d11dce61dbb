//! 文章 HTML 处理：内部链接与附件地址改写

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static LINK_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?iU)href="/read/([^"]+)""#).expect("valid link regex"));

static ATTACHMENT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?iU)(href|src)="([^"]+)/api/v1/content/([^"]+)""#)
        .expect("valid attachment regex")
});

/// 正文中引用的附件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// 下载地址
    pub url: String,
    pub file_name: String,
}

/// 文件名不能逃出文章目录
pub fn is_safe_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

/// 找出可以镜像到本地的附件
pub fn find_attachments(html: &str) -> Vec<Attachment> {
    ATTACHMENT_REGEX
        .captures_iter(html)
        .filter(|caps| is_safe_file_name(&caps[3]))
        .map(|caps| Attachment {
            url: format!("{}/api/v1/content/{}", &caps[2], &caps[3]),
            file_name: caps[3].to_string(),
        })
        .collect()
}

/// 改写文章正文
///
/// - `href="/read/{x}"` -> `href="/blog/{x}"`
/// - `(href|src)="{host}/api/v1/content/{file}"` -> `$1="{public_path}/{id}/{file}"`
pub fn rewrite_content(html: &str, article_id: &str, public_path: &str) -> String {
    let html = LINK_REGEX.replace_all(html, r#"href="/blog/$1""#);

    if !is_safe_file_name(article_id) {
        return html.into_owned();
    }

    ATTACHMENT_REGEX
        .replace_all(&html, |caps: &Captures| {
            if is_safe_file_name(&caps[3]) {
                format!(r#"{}="{}/{}/{}""#, &caps[1], public_path, article_id, &caps[3])
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}
