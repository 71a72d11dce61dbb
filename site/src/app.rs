//! 路由组装

use axum::middleware::{from_fn, from_fn_with_state};
use axum::{Router, routing::get};
use tower::Layer;
use tower_http::compression::CompressionLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use folio_config::AppConfig;

use crate::cors::cors_layer;
use crate::middleware::track_hits;
use crate::routes;
use crate::security_headers::security_headers_middleware;
use crate::state::AppState;

pub struct RouterOptions {
    pub static_dir: String,
    pub allowed_origins: Vec<String>,
}

impl From<&AppConfig> for RouterOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            static_dir: config.static_dir.clone(),
            allowed_origins: config.allowed_origins(),
        }
    }
}

pub fn router(state: AppState, options: &RouterOptions) -> Router {
    let pages = Router::new()
        .route("/", get(routes::about))
        .route("/legal", get(routes::legal))
        .route("/blog", get(routes::blog))
        .route("/blog/{slug}", get(routes::article))
        .route("/tracking", get(routes::tracking))
        .route_layer(from_fn_with_state(state.clone(), track_hits));

    let static_files = CompressionLayer::new().layer(ServeDir::new(&options.static_dir));

    let mut app = Router::new()
        .merge(pages)
        .route("/notfound", get(routes::not_found))
        .route("/health", get(routes::health))
        .nest_service("/static", static_files)
        .fallback(routes::not_found);

    if state.metrics.is_some() {
        app = app.route("/metrics", get(routes::metrics));
    }

    app.with_state(state)
        .layer(from_fn(security_headers_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&options.allowed_origins))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use folio_render::TemplateCache;
    use folio_tracking::Tracker;
    use tower::ServiceExt;

    use crate::testing::{MemoryStore, blog_options, source, templates, tracker};

    const UA: &str = "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:84.0) Gecko/20100101 Firefox/84.0";

    struct TestApp {
        router: Router,
        store: Arc<MemoryStore>,
        tracker: Arc<Tracker>,
        dir: tempfile::TempDir,
    }

    async fn test_app() -> TestApp {
        test_app_with(templates(), MemoryStore::default()).await
    }

    async fn test_app_with(templates: TemplateCache, store: MemoryStore) -> TestApp {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(store);
        let tracker = tracker(store.clone());

        let state = AppState::build(
            templates,
            Arc::new(source()),
            blog_options(dir.path()),
            store.clone(),
            tracker.clone(),
            None,
            chrono::Duration::minutes(10),
        )
        .await
        .unwrap();
        let options = RouterOptions {
            static_dir: dir.path().to_string_lossy().into_owned(),
            allowed_origins: vec!["https://marvinblum.de".to_string()],
        };

        TestApp {
            router: router(state, &options),
            store,
            tracker,
            dir,
        }
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::USER_AGENT, UA)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_about_page_lists_latest_articles() {
        let app = test_app().await;

        let response = app.router.oneshot(get("/")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-frame-options"));
        assert_eq!(body_text(response).await, "about:[hello-world-abc]");
    }

    #[tokio::test]
    async fn test_blog_page_groups_by_year() {
        let app = test_app().await;

        let response = app.router.oneshot(get("/blog")).await.unwrap();

        assert_eq!(body_text(response).await, "blog:2020(1)");
    }

    #[tokio::test]
    async fn test_article_page() {
        let app = test_app().await;

        let response = app.router.oneshot(get("/blog/hello-world-abc")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_text(response).await,
            r#"<h1>Hello World</h1><p>See <a href="/blog/other-xyz">this</a></p>"#
        );
    }

    #[tokio::test]
    async fn test_unknown_article_redirects() {
        let app = test_app().await;

        let response = app.router.oneshot(get("/blog/missing-zzz")).await.unwrap();

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers().get(header::LOCATION).unwrap(), "/notfound");
    }

    #[tokio::test]
    async fn test_unknown_route_renders_not_found() {
        let app = test_app().await;

        let response = app.router.clone().oneshot(get("/does/not/exist")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_text(response).await, "notfound");

        let response = app.router.oneshot(get("/notfound")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_tracking_page_range() {
        let app = test_app().await;

        let response = app
            .router
            .oneshot(get("/tracking?start=2021-03-05&end=2021-03-01"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "tracking:2021-03-01..2021-03-01");
    }

    #[tokio::test]
    async fn test_health() {
        let app = test_app().await;

        let response = app.router.oneshot(get("/health")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["healthy"], true);
    }

    #[tokio::test]
    async fn test_metrics_route_disabled() {
        let app = test_app().await;

        let response = app.router.oneshot(get("/metrics")).await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_static_files() {
        let app = test_app().await;
        std::fs::write(app.dir.path().join("main.css"), "body{}").unwrap();

        let response = app.router.oneshot(get("/static/main.css")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "body{}");
    }

    #[tokio::test]
    async fn test_page_views_are_tracked() {
        let app = test_app().await;

        for uri in ["/", "/legal", "/does/not/exist", "/health", "/blog/missing-zzz"] {
            app.router.clone().oneshot(get(uri)).await.unwrap();
        }
        app.tracker.stop().await;

        let hits = app.store.hits.lock().unwrap();
        let paths: Vec<_> = hits.iter().map(|h| h.path.as_str()).collect();
        assert_eq!(paths, vec!["/", "/legal"]);
        assert_eq!(hits[0].browser, "Firefox");
    }

    #[tokio::test]
    async fn test_site_templates_render_every_page() {
        let templates =
            TemplateCache::new(concat!(env!("CARGO_MANIFEST_DIR"), "/../template"), false).unwrap();
        let app = test_app_with(templates, MemoryStore::sample()).await;

        let pages = [
            ("/", StatusCode::OK, r#"<a href="/blog/hello-world-abc">Hello World</a>"#),
            ("/", StatusCode::OK, "12 September 2020"),
            ("/legal", StatusCode::OK, "<h1>Legal</h1>"),
            ("/blog", StatusCode::OK, "<h2>2020</h2>"),
            ("/blog/hello-world-abc", StatusCode::OK, r#"<a href="/blog/other-xyz">this</a>"#),
            ("/notfound", StatusCode::NOT_FOUND, "<h1>404</h1>"),
            ("/does/not/exist", StatusCode::NOT_FOUND, "<h1>404</h1>"),
        ];

        for (uri, status, fragment) in pages {
            let response = app.router.clone().oneshot(get(uri)).await.unwrap();
            assert_eq!(response.status(), status, "{}", uri);

            let body = body_text(response).await;
            assert!(body.contains(fragment), "{} is missing {:?}", uri, fragment);
            assert!(body.trim_end().ends_with("</html>"), "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_site_tracking_template() {
        let templates =
            TemplateCache::new(concat!(env!("CARGO_MANIFEST_DIR"), "/../template"), false).unwrap();
        let app = test_app_with(templates, MemoryStore::sample()).await;

        let response = app
            .router
            .oneshot(get("/tracking?start=2021-03-01&end=2021-03-02"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_text(response).await;
        assert!(body.contains(r#"value="2021-03-01""#));
        // 模板输出经过 HTML 转义，`/` 变为 `&#x2F;`
        assert!(body.contains("&#x2F;blog&#x2F;hello-world-abc"));
        assert!(body.contains("news.ycombinator.com"));
        assert!(body.contains("<td><em>unknown</em></td>"));
        assert!(body.contains("<td>75.00</td>"));
        assert!(body.contains("<td>Desktop</td><td>3</td><td>60.00</td>"));
        assert!(body.contains(r#"data-visitors="3""#));
        assert!(body.contains(r#"drawChart("chart-page-1""#));
    }
}
