//! 统计查询

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use folio_errors::AppResult;

use crate::model::{
    ActiveVisitors, DayStats, Dimension, DimensionCount, DimensionStats, Filter, HourStats,
    HourVisitors, PageVisitors, PlatformStats, TimeOfDay, relative,
};
use crate::store::Store;

const HOURS: u32 = 24;

/// 在存储之上提供补零、排序与占比计算
pub struct Analyzer {
    store: Arc<dyn Store>,
}

impl Analyzer {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// 最近 `window` 内的访客
    pub async fn active_visitors(&self, window: chrono::Duration) -> AppResult<ActiveVisitors> {
        self.store.active_visitors(Utc::now() - window).await
    }

    /// 区间内每天一条，无数据的天补零
    pub async fn visitors(&self, filter: &Filter) -> AppResult<Vec<DayStats>> {
        let stats = self.store.visitors(filter).await?;
        Ok(fill_days(filter, stats))
    }

    /// 按小时合计区间内的访客，共 24 条
    pub async fn visitor_hours(&self, filter: &Filter) -> AppResult<Vec<HourVisitors>> {
        let stats = self.store.visitor_hours(filter).await?;
        Ok(sum_hours(stats.iter()))
    }

    /// 每个页面的每日访客，按 path 排序
    pub async fn page_visitors(&self, filter: &Filter) -> AppResult<Vec<PageVisitors>> {
        let rows = self.store.page_visitors(filter).await?;

        let mut pages: BTreeMap<String, Vec<DayStats>> = BTreeMap::new();
        for row in rows {
            pages.entry(row.path).or_default().push(DayStats {
                day: row.day,
                visitors: row.visitors,
                sessions: row.sessions,
                bounces: row.bounces,
            });
        }

        Ok(pages
            .into_iter()
            .map(|(path, stats)| {
                let stats = fill_days(filter, stats);
                PageVisitors {
                    path,
                    visitors: stats.iter().map(|s| s.visitors).sum(),
                    stats,
                }
            })
            .collect())
    }

    pub async fn languages(&self, filter: &Filter) -> AppResult<Vec<DimensionStats>> {
        self.dimension(Dimension::Language, filter).await
    }

    /// 直接访问（无来源）不计入，占比也只在有来源的访客之间计算
    pub async fn referrers(&self, filter: &Filter) -> AppResult<Vec<DimensionStats>> {
        let mut counts = self.store.dimension(Dimension::Referrer, filter).await?;
        counts.retain(|c| !c.value.is_empty());
        Ok(shares(counts))
    }

    pub async fn os(&self, filter: &Filter) -> AppResult<Vec<DimensionStats>> {
        self.dimension(Dimension::Os, filter).await
    }

    pub async fn browsers(&self, filter: &Filter) -> AppResult<Vec<DimensionStats>> {
        self.dimension(Dimension::Browser, filter).await
    }

    /// 国家代码统一为大写
    pub async fn countries(&self, filter: &Filter) -> AppResult<Vec<DimensionStats>> {
        let mut stats = self.dimension(Dimension::Country, filter).await?;
        for s in &mut stats {
            s.value = s.value.to_uppercase();
        }
        Ok(stats)
    }

    pub async fn platform(&self, filter: &Filter) -> AppResult<PlatformStats> {
        Ok(self.store.platform(filter).await?.into())
    }

    /// 区间内每天的 24 小时分布
    pub async fn time_of_day(&self, filter: &Filter) -> AppResult<Vec<TimeOfDay>> {
        let stats = self.store.visitor_hours(filter).await?;

        let mut by_day: HashMap<NaiveDate, Vec<&HourStats>> = HashMap::new();
        for s in &stats {
            by_day.entry(s.day).or_default().push(s);
        }

        Ok(filter
            .days()
            .map(|day| TimeOfDay {
                day,
                hours: sum_hours(by_day.get(&day).into_iter().flatten().copied()),
            })
            .collect())
    }

    async fn dimension(&self, dimension: Dimension, filter: &Filter) -> AppResult<Vec<DimensionStats>> {
        let counts = self.store.dimension(dimension, filter).await?;
        Ok(shares(counts))
    }
}

/// 按访客数降序，占比以传入的全部计数为分母
fn shares(counts: Vec<DimensionCount>) -> Vec<DimensionStats> {
    let total: i64 = counts.iter().map(|c| c.visitors).sum();

    let mut stats: Vec<DimensionStats> = counts
        .into_iter()
        .map(|c| DimensionStats {
            relative: relative(c.visitors, total),
            value: c.value,
            visitors: c.visitors,
        })
        .collect();
    stats.sort_by(|a, b| b.visitors.cmp(&a.visitors).then_with(|| a.value.cmp(&b.value)));
    stats
}

fn fill_days(filter: &Filter, stats: Vec<DayStats>) -> Vec<DayStats> {
    let mut by_day: HashMap<NaiveDate, DayStats> = stats.into_iter().map(|s| (s.day, s)).collect();

    filter
        .days()
        .map(|day| by_day.remove(&day).unwrap_or_else(|| DayStats::empty(day)))
        .collect()
}

fn sum_hours<'a>(stats: impl Iterator<Item = &'a HourStats>) -> Vec<HourVisitors> {
    let mut hours: Vec<HourVisitors> = (0..HOURS)
        .map(|hour| HourVisitors { hour, visitors: 0 })
        .collect();

    for s in stats {
        if let Some(bucket) = usize::try_from(s.hour).ok().and_then(|h| hours.get_mut(h)) {
            bucket.visitors += s.visitors;
        }
    }

    hours
}
