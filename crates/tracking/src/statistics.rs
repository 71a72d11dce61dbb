//! 统计页面数据：图表序列与汇总报表

use chrono::NaiveDate;
use serde::Serialize;
use tracing::error;

use crate::analyzer::Analyzer;
use crate::model::{
    ActiveVisitors, DayStats, DimensionStats, Filter, HourVisitors, PageVisitors, PlatformStats,
    TimeOfDay,
};

/// 语言与来源只展示前几项
pub const TOP_ENTRIES: usize = 10;

/// 以逗号连接的图表数据，可直接嵌入脚本
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChartSeries {
    pub labels: String,
    pub visitors: String,
    pub sessions: String,
    pub bounces: String,
}

impl ChartSeries {
    pub fn daily(stats: &[DayStats]) -> Self {
        Self {
            labels: join(stats.iter().map(|s| format!("'{}'", s.day.format("%Y-%m-%d")))),
            visitors: join(stats.iter().map(|s| s.visitors.to_string())),
            sessions: join(stats.iter().map(|s| s.sessions.to_string())),
            bounces: join(stats.iter().map(|s| s.bounces.to_string())),
        }
    }

    /// 只有标签与访客
    pub fn hourly(hours: &[HourVisitors]) -> Self {
        Self {
            labels: join(hours.iter().map(|h| format!("'{}'", h.hour))),
            visitors: join(hours.iter().map(|h| h.visitors.to_string())),
            ..Default::default()
        }
    }
}

fn join(values: impl Iterator<Item = String>) -> String {
    values.collect::<Vec<_>>().join(",")
}

/// 单个页面的访客图表
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageChart {
    pub path: String,
    pub visitors: i64,
    pub chart: ChartSeries,
}

impl From<&PageVisitors> for PageChart {
    fn from(page: &PageVisitors) -> Self {
        Self {
            path: page.path.clone(),
            visitors: page.visitors,
            chart: ChartSeries::daily(&page.stats),
        }
    }
}

/// 按访客数降序
pub fn rank_pages(pages: &[PageChart]) -> Vec<PageChart> {
    let mut rank = pages.to_vec();
    rank.sort_by(|a, b| b.visitors.cmp(&a.visitors).then_with(|| a.path.cmp(&b.path)));
    rank
}

/// 统计页面的全部数据
///
/// 单项查询失败只记录日志并留空，页面其余部分照常展示。
#[derive(Debug, Clone, Default, Serialize)]
pub struct TrackingReport {
    pub start: String,
    pub end: String,
    pub active_visitors: ActiveVisitors,
    pub hourly_today: ChartSeries,
    pub total: ChartSeries,
    pub pages: Vec<PageChart>,
    pub page_rank: Vec<PageChart>,
    pub languages: Vec<DimensionStats>,
    pub referrers: Vec<DimensionStats>,
    pub os: Vec<DimensionStats>,
    pub browsers: Vec<DimensionStats>,
    pub countries: Vec<DimensionStats>,
    pub platform: PlatformStats,
    pub time_of_day: Vec<TimeOfDay>,
}

impl TrackingReport {
    pub async fn collect(
        analyzer: &Analyzer,
        filter: &Filter,
        today: NaiveDate,
        active_window: chrono::Duration,
    ) -> Self {
        let active_visitors = logged(
            analyzer.active_visitors(active_window).await,
            "Error reading active visitors",
        );
        let hourly_today = logged(
            analyzer.visitor_hours(&Filter::day(today)).await,
            "Error reading hourly visitors for today",
        );
        let total = logged(analyzer.visitors(filter).await, "Error reading visitor statistics");
        let pages: Vec<PageChart> = logged(
            analyzer.page_visitors(filter).await,
            "Error reading page statistics",
        )
        .iter()
        .map(PageChart::from)
        .collect();

        let mut languages = logged(analyzer.languages(filter).await, "Error reading language statistics");
        languages.truncate(TOP_ENTRIES);
        let mut referrers = logged(analyzer.referrers(filter).await, "Error reading referrer statistics");
        referrers.truncate(TOP_ENTRIES);

        Self {
            start: filter.from.format("%Y-%m-%d").to_string(),
            end: filter.to.format("%Y-%m-%d").to_string(),
            active_visitors,
            hourly_today: ChartSeries::hourly(&hourly_today),
            total: ChartSeries::daily(&total),
            page_rank: rank_pages(&pages),
            pages,
            languages,
            referrers,
            os: logged(analyzer.os(filter).await, "Error reading OS statistics"),
            browsers: logged(analyzer.browsers(filter).await, "Error reading browser statistics"),
            countries: logged(analyzer.countries(filter).await, "Error reading country statistics"),
            platform: logged(analyzer.platform(filter).await, "Error reading platform statistics"),
            time_of_day: logged(
                analyzer.time_of_day(filter).await,
                "Error reading visitor time of day statistics",
            ),
        }
    }
}

fn logged<T: Default>(result: folio_errors::AppResult<T>, message: &'static str) -> T {
    result.unwrap_or_else(|e| {
        error!(error = %e, "{}", message);
        T::default()
    })
}
