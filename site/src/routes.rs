//! 页面与运维路由

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use chrono::{Days, NaiveDate, Utc};
use folio_blog::article_id_from_slug;
use folio_errors::{AppError, AppResult};
use folio_render::Context;
use folio_telemetry::HealthStatus;
use folio_tracking::{Filter, TrackingReport};
use serde::Deserialize;
use tracing::debug;

use crate::state::AppState;
use crate::view::{ArticleView, YearView};

/// 统计页面默认展示的天数（含今天）
const DEFAULT_STATISTICS_DAYS: u64 = 7;

fn cached(state: &AppState, template: &str, context: &Context) -> AppResult<Html<String>> {
    let page = state.templates.render(template, context)?;
    Ok(Html(page.to_string()))
}

fn context_of<T: serde::Serialize>(data: &T) -> AppResult<Context> {
    Context::from_serialize(data)
        .map_err(|e| AppError::template(format!("Failed to create template context: {}", e)))
}

pub async fn about(State(state): State<AppState>) -> AppResult<Html<String>> {
    state.refresh_blog().await;

    let latest: Vec<ArticleView> = state
        .blog
        .latest_articles()
        .await
        .iter()
        .map(ArticleView::from)
        .collect();

    let mut context = Context::new();
    context.insert("latest", &latest);
    cached(&state, "about.html", &context)
}

pub async fn legal(State(state): State<AppState>) -> AppResult<Html<String>> {
    cached(&state, "legal.html", &Context::new())
}

pub async fn blog(State(state): State<AppState>) -> AppResult<Html<String>> {
    state.refresh_blog().await;

    let years: Vec<YearView> = state
        .blog
        .articles_by_year()
        .await
        .iter()
        .map(YearView::from)
        .collect();

    let mut context = Context::new();
    context.insert("years", &years);
    cached(&state, "blog.html", &context)
}

pub async fn article(State(state): State<AppState>, Path(slug): Path<String>) -> AppResult<Response> {
    state.refresh_blog().await;

    let article = match article_id_from_slug(&slug) {
        Some(id) => state.blog.article(id).await,
        None => None,
    };

    let Some(article) = article else {
        debug!(slug = %slug, "Article not found");
        return Ok((StatusCode::FOUND, [(header::LOCATION, "/notfound")]).into_response());
    };

    let context = context_of(&ArticleView::from(&article))?;
    let page = state.templates.render_without_cache("article.html", &context)?;
    Ok(Html(page).into_response())
}

#[derive(Debug, Default, Deserialize)]
pub struct StatisticsQuery {
    pub start: Option<String>,
    pub end: Option<String>,
}

impl StatisticsQuery {
    /// 无效或缺省的日期使用默认区间；开始日期不晚于结束日期
    pub fn filter(&self, today: NaiveDate) -> Filter {
        let end = parse_day(self.end.as_deref()).unwrap_or(today);
        let start = parse_day(self.start.as_deref()).unwrap_or_else(|| {
            today
                .checked_sub_days(Days::new(DEFAULT_STATISTICS_DAYS - 1))
                .unwrap_or(today)
        });

        Filter::new(start, end)
    }
}

fn parse_day(value: Option<&str>) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value?.trim(), "%Y-%m-%d").ok()
}

pub async fn tracking(
    State(state): State<AppState>,
    Query(query): Query<StatisticsQuery>,
) -> AppResult<Html<String>> {
    let today = Utc::now().date_naive();
    let filter = query.filter(today);

    let report = TrackingReport::collect(&state.analyzer, &filter, today, state.active_window).await;
    let context = context_of(&report)?;

    Ok(Html(state.templates.render_without_cache("tracking.html", &context)?))
}

pub async fn not_found(State(state): State<AppState>) -> AppResult<Response> {
    let page = cached(&state, "notfound.html", &Context::new())?;
    Ok((StatusCode::NOT_FOUND, page).into_response())
}

pub async fn health(State(state): State<AppState>) -> Response {
    let mut status = HealthStatus::new();

    match state.store.ping().await {
        Ok(()) => status.add_check("database", true, None),
        Err(e) => status.add_check("database", false, Some(e.to_string())),
    }
    status.add_check(
        "blog",
        true,
        Some(format!("{} articles", state.blog.len().await)),
    );

    let code = if status.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status)).into_response()
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
