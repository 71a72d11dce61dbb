//! 访问数据存储接口

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use folio_errors::AppResult;

use crate::model::{
    ActiveVisitors, DayStats, Dimension, DimensionCount, Filter, Hit, HourStats, PathDayStats,
    PlatformCount,
};

/// 原始访问与按天汇总数据的存储
///
/// 读取接口同时统计已汇总的天和尚未处理的原始访问。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Store: Send + Sync {
    async fn ping(&self) -> AppResult<()>;

    async fn save_hits(&self, hits: &[Hit]) -> AppResult<()>;

    /// `before` 之前仍有原始访问的日期，升序
    async fn hit_days(&self, before: NaiveDate) -> AppResult<Vec<NaiveDate>>;

    /// 在一个事务内汇总某天的原始访问并删除，返回处理的访问数
    async fn aggregate_day(&self, day: NaiveDate) -> AppResult<u64>;

    async fn active_visitors(&self, since: DateTime<Utc>) -> AppResult<ActiveVisitors>;

    /// 有数据的天，升序
    async fn visitors(&self, filter: &Filter) -> AppResult<Vec<DayStats>>;

    /// 各页面有数据的天
    async fn page_visitors(&self, filter: &Filter) -> AppResult<Vec<PathDayStats>>;

    async fn visitor_hours(&self, filter: &Filter) -> AppResult<Vec<HourStats>>;

    async fn dimension(&self, dimension: Dimension, filter: &Filter) -> AppResult<Vec<DimensionCount>>;

    async fn platform(&self, filter: &Filter) -> AppResult<PlatformCount>;
}
