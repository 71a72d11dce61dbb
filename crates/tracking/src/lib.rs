//! 页面访问统计
//!
//! - 记录访问：过滤爬虫与预加载请求，以加盐指纹区分访客，批量写入
//! - 每日汇总：把前一天及更早的原始访问汇总为按天统计
//! - 统计查询：访客、页面、语言、来源、系统、浏览器、国家、平台与时段

mod analyzer;
mod model;
mod postgres;
mod processor;
mod request;
mod session;
mod statistics;
mod store;
mod tracker;
pub mod useragent;

pub use analyzer::Analyzer;
pub use model::*;
pub use postgres::PgStore;
pub use processor::{Processor, run_at_midnight, until_midnight};
pub use request::{HitRequest, client_ip, fingerprint, is_prefetch, language, referrer};
pub use session::SessionCache;
pub use statistics::{ChartSeries, PageChart, TOP_ENTRIES, TrackingReport, rank_pages};
pub use store::Store;
pub use tracker::{Tracker, TrackerOptions};
