//! 页面模板渲染缓存
//!
//! 渲染结果按模板名缓存，内容变化时由调用方 [`TemplateCache::clear`]。
//! 开启热加载时每次渲染前重新读取模板文件且不使用缓存。

mod helpers;

use std::collections::HashMap;
use std::sync::Arc;

use folio_errors::{AppError, AppResult};
use parking_lot::RwLock;
use tera::Tera;
use tracing::{debug, error};

pub use tera::Context;

struct Inner {
    tera: Tera,
    pages: HashMap<String, Arc<str>>,
}

/// 模板渲染缓存
pub struct TemplateCache {
    inner: RwLock<Inner>,
    hot_reload: bool,
}

impl TemplateCache {
    /// 加载 `{template_dir}/**/*.html`
    pub fn new(template_dir: &str, hot_reload: bool) -> AppResult<Self> {
        let pattern = format!("{}/**/*.html", template_dir.trim_end_matches('/'));
        let mut tera = Tera::new(&pattern)
            .map_err(|e| AppError::template(format!("Failed to load templates: {}", e)))?;
        helpers::register(&mut tera);

        debug!(template_dir = %template_dir, hot_reload, "Templates loaded");

        Ok(Self::with_tera(tera, hot_reload))
    }

    /// 从内存中的模板字符串创建（用于测试）
    pub fn from_strings(templates: HashMap<String, String>) -> AppResult<Self> {
        let mut tera = Tera::default();
        helpers::register(&mut tera);
        tera.add_raw_templates(templates.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .map_err(|e| AppError::template(format!("Failed to add templates: {}", e)))?;

        Ok(Self::with_tera(tera, false))
    }

    fn with_tera(tera: Tera, hot_reload: bool) -> Self {
        Self {
            inner: RwLock::new(Inner {
                tera,
                pages: HashMap::new(),
            }),
            hot_reload,
        }
    }

    pub fn hot_reload(&self) -> bool {
        self.hot_reload
    }

    /// 渲染并缓存；渲染失败时不缓存
    pub fn render(&self, name: &str, context: &Context) -> AppResult<Arc<str>> {
        if !self.hot_reload {
            if let Some(page) = self.inner.read().pages.get(name) {
                return Ok(page.clone());
            }
        }

        let mut inner = self.inner.write();

        if !self.hot_reload {
            if let Some(page) = inner.pages.get(name) {
                return Ok(page.clone());
            }
        }

        if self.hot_reload {
            reload(&mut inner.tera)?;
        }

        debug!(name = %name, "Rendering template");
        let page: Arc<str> = render(&inner.tera, name, context)?.into();
        inner.pages.insert(name.to_string(), page.clone());
        metrics::counter!("template_renders_total", "template" => name.to_string()).increment(1);

        Ok(page)
    }

    /// 每次都重新渲染
    pub fn render_without_cache(&self, name: &str, context: &Context) -> AppResult<String> {
        if self.hot_reload {
            reload(&mut self.inner.write().tera)?;
        }

        let page = render(&self.inner.read().tera, name, context)?;
        metrics::counter!("template_renders_total", "template" => name.to_string()).increment(1);
        Ok(page)
    }

    pub fn clear(&self) {
        debug!("Clearing template cache");
        self.inner.write().pages.clear();
    }

    pub fn cached_pages(&self) -> usize {
        self.inner.read().pages.len()
    }
}

fn reload(tera: &mut Tera) -> AppResult<()> {
    debug!("Reloading templates");
    tera.full_reload()
        .map_err(|e| AppError::template(format!("Failed to reload templates: {}", e)))
}

fn render(tera: &Tera, name: &str, context: &Context) -> AppResult<String> {
    tera.render(name, context).map_err(|e| {
        error!(error = ?e, name = %name, "Error executing template");
        AppError::template(format!("Failed to render template {}: {}", name, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(templates: &[(&str, &str)]) -> TemplateCache {
        let templates = templates
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        TemplateCache::from_strings(templates).unwrap()
    }

    fn context(name: &str) -> Context {
        let mut context = Context::new();
        context.insert("name", name);
        context
    }

    #[test]
    fn test_render_is_cached_by_name() {
        let cache = cache(&[("hello.html", "<h1>Hello {{ name }}!</h1>")]);

        let first = cache.render("hello.html", &context("World")).unwrap();
        assert_eq!(&*first, "<h1>Hello World!</h1>");

        // 缓存命中时忽略新的上下文
        let second = cache.render("hello.html", &context("Again")).unwrap();
        assert_eq!(&*second, "<h1>Hello World!</h1>");
        assert_eq!(cache.cached_pages(), 1);
    }

    #[test]
    fn test_clear_forces_render() {
        let cache = cache(&[("hello.html", "{{ name }}")]);

        cache.render("hello.html", &context("one")).unwrap();
        cache.clear();
        assert_eq!(cache.cached_pages(), 0);

        let page = cache.render("hello.html", &context("two")).unwrap();
        assert_eq!(&*page, "two");
    }

    #[test]
    fn test_render_without_cache() {
        let cache = cache(&[("hello.html", "{{ name }}")]);

        assert_eq!(cache.render_without_cache("hello.html", &context("a")).unwrap(), "a");
        assert_eq!(cache.render_without_cache("hello.html", &context("b")).unwrap(), "b");
        assert_eq!(cache.cached_pages(), 0);
    }

    #[test]
    fn test_render_error_is_not_cached() {
        let cache = cache(&[("broken.html", "{{ missing.field }}")]);

        let err = cache.render("broken.html", &Context::new()).unwrap_err();
        assert!(matches!(err, AppError::Template(_)));
        assert_eq!(cache.cached_pages(), 0);

        assert!(cache.render("unknown.html", &Context::new()).is_err());
    }

    #[test]
    fn test_hot_reload_reads_files_again() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("page.html");
        std::fs::write(&file, "v1").unwrap();

        let cache = TemplateCache::new(dir.path().to_str().unwrap(), true).unwrap();
        assert_eq!(&*cache.render("page.html", &Context::new()).unwrap(), "v1");

        std::fs::write(&file, "v2").unwrap();
        assert_eq!(&*cache.render("page.html", &Context::new()).unwrap(), "v2");
    }

    #[test]
    fn test_helpers_are_registered_for_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("page.html"),
            "{{ 0.256 | multiply(by=100) | fixed }}",
        )
        .unwrap();

        let cache = TemplateCache::new(dir.path().to_str().unwrap(), false).unwrap();
        assert_eq!(&*cache.render("page.html", &Context::new()).unwrap(), "25.60");
    }
}
