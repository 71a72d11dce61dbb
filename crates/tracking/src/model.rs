//! 访问统计数据模型

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::Serialize;

/// 一次页面访问
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hit {
    /// 访客指纹，按天变化
    pub fingerprint: String,
    /// 所属会话的开始时间
    pub session: DateTime<Utc>,
    pub time: DateTime<Utc>,
    pub path: String,
    pub url: String,
    pub language: String,
    pub user_agent: String,
    pub referrer: String,
    pub os: String,
    pub os_version: String,
    pub browser: String,
    pub browser_version: String,
    pub country_code: String,
    pub desktop: bool,
    pub mobile: bool,
}

/// 查询条件，日期均为 UTC 且包含首尾两天
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub from: NaiveDate,
    pub to: NaiveDate,
    /// 为空时统计全站
    pub path: Option<String>,
}

impl Filter {
    /// `from` 晚于 `to` 时取 `to`
    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        Self {
            from: from.min(to),
            to,
            path: None,
        }
    }

    pub fn day(day: NaiveDate) -> Self {
        Self::new(day, day)
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// 统计表中全站数据的 path 为空串
    pub fn path_key(&self) -> &str {
        self.path.as_deref().unwrap_or_default()
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + use<> {
        let to = self.to;
        self.from.iter_days().take_while(move |day| *day <= to)
    }

    /// `[from 00:00, to + 1 00:00)`
    pub fn time_range(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        let end = self.to.checked_add_days(Days::new(1)).unwrap_or(self.to);
        (start_of_day(self.from), start_of_day(end))
    }
}

pub fn start_of_day(day: NaiveDate) -> DateTime<Utc> {
    day.and_time(chrono::NaiveTime::MIN).and_utc()
}

/// 某天的访客数据
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct DayStats {
    pub day: NaiveDate,
    pub visitors: i64,
    pub sessions: i64,
    pub bounces: i64,
}

impl DayStats {
    pub fn empty(day: NaiveDate) -> Self {
        Self {
            day,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct PathDayStats {
    pub path: String,
    pub day: NaiveDate,
    pub visitors: i64,
    pub sessions: i64,
    pub bounces: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct HourStats {
    pub day: NaiveDate,
    pub hour: i32,
    pub visitors: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HourVisitors {
    pub hour: u32,
    pub visitors: i64,
}

/// 某天 24 小时的访客分布
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeOfDay {
    pub day: NaiveDate,
    pub hours: Vec<HourVisitors>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct PathVisitors {
    pub path: String,
    pub visitors: i64,
}

/// 当前在线访客
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActiveVisitors {
    pub pages: Vec<PathVisitors>,
    pub total: i64,
}

/// 单个页面在时间段内的访客
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageVisitors {
    pub path: String,
    pub visitors: i64,
    pub stats: Vec<DayStats>,
}

/// 按单一属性分组的统计维度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    Language,
    Referrer,
    Os,
    Browser,
    Country,
}

impl Dimension {
    pub const ALL: [Dimension; 5] = [
        Dimension::Language,
        Dimension::Referrer,
        Dimension::Os,
        Dimension::Browser,
        Dimension::Country,
    ];

    pub fn table(&self) -> &'static str {
        match self {
            Dimension::Language => "language_stats",
            Dimension::Referrer => "referrer_stats",
            Dimension::Os => "os_stats",
            Dimension::Browser => "browser_stats",
            Dimension::Country => "country_stats",
        }
    }

    /// `hit` 表与统计表共用的列名
    pub fn column(&self) -> &'static str {
        match self {
            Dimension::Language => "language",
            Dimension::Referrer => "referrer",
            Dimension::Os => "os",
            Dimension::Browser => "browser",
            Dimension::Country => "country_code",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct DimensionCount {
    pub value: String,
    pub visitors: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DimensionStats {
    pub value: String,
    pub visitors: i64,
    /// 0..=1
    pub relative: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, sqlx::FromRow)]
pub struct PlatformCount {
    pub desktop: i64,
    pub mobile: i64,
    pub unknown: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlatformStats {
    pub desktop: i64,
    pub mobile: i64,
    pub unknown: i64,
    pub relative_desktop: f64,
    pub relative_mobile: f64,
    pub relative_unknown: f64,
}

impl From<PlatformCount> for PlatformStats {
    fn from(count: PlatformCount) -> Self {
        let total = count.desktop + count.mobile + count.unknown;
        Self {
            desktop: count.desktop,
            mobile: count.mobile,
            unknown: count.unknown,
            relative_desktop: relative(count.desktop, total),
            relative_mobile: relative(count.mobile, total),
            relative_unknown: relative(count.unknown, total),
        }
    }
}

pub(crate) fn relative(part: i64, total: i64) -> f64 {
    if total > 0 {
        part as f64 / total as f64
    } else {
        0.0
    }
}
