//! 附件本地镜像

use std::path::Path;

use folio_adapter_emvi::ContentSource;
use tracing::{debug, error, warn};

use crate::content::{find_attachments, is_safe_file_name};

/// 把正文引用的附件下载到 `{dir}/{article_id}/`，返回新下载的数量
///
/// 已存在的文件不会重复下载，单个附件失败只记录日志。
pub async fn mirror_attachments(
    source: &dyn ContentSource,
    dir: &Path,
    article_id: &str,
    html: &str,
) -> usize {
    if !is_safe_file_name(article_id) {
        warn!(id = %article_id, "Refusing to mirror attachments for unsafe article id");
        return 0;
    }

    let article_dir = dir.join(article_id);
    if let Err(e) = tokio::fs::create_dir_all(&article_dir).await {
        error!(error = %e, id = %article_id, "Error creating article file cache directory");
        return 0;
    }

    let mut downloaded = 0;

    for attachment in find_attachments(html) {
        let target = article_dir.join(&attachment.file_name);

        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            debug!(id = %article_id, file = %attachment.file_name, "Attachment already cached");
            continue;
        }

        let data = match source.download(&attachment.url).await {
            Ok(data) => data,
            Err(e) => {
                error!(error = %e, id = %article_id, url = %attachment.url, "Error downloading blog attachment");
                continue;
            }
        };

        if let Err(e) = tokio::fs::write(&target, data).await {
            error!(error = %e, id = %article_id, file = %attachment.file_name, "Error saving blog attachment on disk");
            continue;
        }

        downloaded += 1;
    }

    downloaded
}
