//! PostgreSQL 访问数据存储

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use folio_errors::{AppError, AppResult};
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, warn};

use crate::model::{
    ActiveVisitors, DayStats, Dimension, DimensionCount, Filter, Hit, HourStats, PathDayStats,
    PathVisitors, PlatformCount, start_of_day,
};
use crate::store::Store;

/// 单条 INSERT 的最大行数，避免超出参数上限
const INSERT_CHUNK: usize = 1000;

/// 查询区间内尚未汇总的原始访问
///
/// `$1`、`$2` 为时间区间；`visitor_hits` 为访客当天的访问次数，用于计算跳出。
const LIVE_HITS: &str = r#"
    SELECT (time AT TIME ZONE 'UTC')::date AS day,
           EXTRACT(HOUR FROM time AT TIME ZONE 'UTC')::int AS hour,
           path, fingerprint, session, language, referrer, os, browser, country_code, desktop, mobile,
           COUNT(*) OVER (PARTITION BY (time AT TIME ZONE 'UTC')::date, fingerprint) AS visitor_hits
    FROM hit
    WHERE time >= $1 AND time < $2
"#;

/// 统计表按 `$3`..`$4` 的日期与 `$5` 的 path 过滤
fn visitors_query() -> String {
    format!(
        r#"
        SELECT day, SUM(visitors)::bigint AS visitors, SUM(sessions)::bigint AS sessions, SUM(bounces)::bigint AS bounces
        FROM (
            SELECT day, visitors::bigint, sessions::bigint, bounces::bigint
            FROM visitor_stats
            WHERE day BETWEEN $3 AND $4 AND path = $5
            UNION ALL
            SELECT day,
                   COUNT(DISTINCT fingerprint),
                   COUNT(DISTINCT fingerprint || ':' || session::text),
                   COUNT(DISTINCT fingerprint) FILTER (WHERE visitor_hits = 1)
            FROM ({live}) h
            WHERE $5 = '' OR path = $5
            GROUP BY day
        ) s
        GROUP BY day
        ORDER BY day
        "#,
        live = LIVE_HITS
    )
}

fn page_visitors_query() -> String {
    format!(
        r#"
        SELECT path, day, SUM(visitors)::bigint AS visitors, SUM(sessions)::bigint AS sessions, SUM(bounces)::bigint AS bounces
        FROM (
            SELECT path, day, visitors::bigint, sessions::bigint, bounces::bigint
            FROM visitor_stats
            WHERE day BETWEEN $3 AND $4 AND path <> '' AND ($5 = '' OR path = $5)
            UNION ALL
            SELECT path, day,
                   COUNT(DISTINCT fingerprint),
                   COUNT(DISTINCT fingerprint || ':' || session::text),
                   COUNT(DISTINCT fingerprint) FILTER (WHERE visitor_hits = 1)
            FROM ({live}) h
            WHERE $5 = '' OR path = $5
            GROUP BY path, day
        ) s
        GROUP BY path, day
        ORDER BY path, day
        "#,
        live = LIVE_HITS
    )
}

fn visitor_hours_query() -> String {
    format!(
        r#"
        SELECT day, hour, SUM(visitors)::bigint AS visitors
        FROM (
            SELECT day, hour::int AS hour, visitors::bigint
            FROM visitor_time_stats
            WHERE day BETWEEN $3 AND $4 AND path = $5
            UNION ALL
            SELECT day, hour, COUNT(DISTINCT fingerprint)
            FROM ({live}) h
            WHERE $5 = '' OR path = $5
            GROUP BY day, hour
        ) s
        GROUP BY day, hour
        ORDER BY day, hour
        "#,
        live = LIVE_HITS
    )
}

fn dimension_query(dimension: Dimension) -> String {
    format!(
        r#"
        SELECT value, SUM(visitors)::bigint AS visitors
        FROM (
            SELECT {column} AS value, visitors::bigint
            FROM {table}
            WHERE day BETWEEN $3 AND $4 AND path = $5
            UNION ALL
            SELECT {column}, COUNT(DISTINCT fingerprint)
            FROM ({live}) h
            WHERE $5 = '' OR path = $5
            GROUP BY {column}
        ) s
        GROUP BY value
        ORDER BY visitors DESC, value
        "#,
        table = dimension.table(),
        column = dimension.column(),
        live = LIVE_HITS
    )
}

fn platform_query() -> String {
    format!(
        r#"
        SELECT COALESCE(SUM(desktop), 0)::bigint AS desktop,
               COALESCE(SUM(mobile), 0)::bigint AS mobile,
               COALESCE(SUM("unknown"), 0)::bigint AS "unknown"
        FROM (
            SELECT platform_desktop::bigint AS desktop, platform_mobile::bigint AS mobile, platform_unknown::bigint AS "unknown"
            FROM visitor_stats
            WHERE day BETWEEN $3 AND $4 AND path = $5
            UNION ALL
            SELECT COUNT(DISTINCT fingerprint) FILTER (WHERE desktop),
                   COUNT(DISTINCT fingerprint) FILTER (WHERE mobile),
                   COUNT(DISTINCT fingerprint) FILTER (WHERE NOT desktop AND NOT mobile)
            FROM ({live}) h
            WHERE $5 = '' OR path = $5
        ) s
        "#,
        live = LIVE_HITS
    )
}

/// 汇总某天：`$1`、`$2` 为当天的时间区间，`$3` 为日期
const AGGREGATE_VISITORS: &str = r#"
    INSERT INTO visitor_stats (day, path, visitors, sessions, bounces, platform_desktop, platform_mobile, platform_unknown)
    SELECT $3, COALESCE(path, ''),
           COUNT(DISTINCT fingerprint),
           COUNT(DISTINCT fingerprint || ':' || session::text),
           COUNT(DISTINCT fingerprint) FILTER (WHERE visitor_hits = 1),
           COUNT(DISTINCT fingerprint) FILTER (WHERE desktop),
           COUNT(DISTINCT fingerprint) FILTER (WHERE mobile),
           COUNT(DISTINCT fingerprint) FILTER (WHERE NOT desktop AND NOT mobile)
    FROM (
        SELECT path, fingerprint, session, desktop, mobile,
               COUNT(*) OVER (PARTITION BY fingerprint) AS visitor_hits
        FROM hit
        WHERE time >= $1 AND time < $2
    ) h
    GROUP BY GROUPING SETS ((path), ())
    ON CONFLICT (day, path) DO UPDATE SET
        visitors = visitor_stats.visitors + EXCLUDED.visitors,
        sessions = visitor_stats.sessions + EXCLUDED.sessions,
        bounces = visitor_stats.bounces + EXCLUDED.bounces,
        platform_desktop = visitor_stats.platform_desktop + EXCLUDED.platform_desktop,
        platform_mobile = visitor_stats.platform_mobile + EXCLUDED.platform_mobile,
        platform_unknown = visitor_stats.platform_unknown + EXCLUDED.platform_unknown
"#;

const AGGREGATE_HOURS: &str = r#"
    INSERT INTO visitor_time_stats (day, path, hour, visitors)
    SELECT $3, COALESCE(path, ''), hour, COUNT(DISTINCT fingerprint)
    FROM (
        SELECT path, fingerprint, EXTRACT(HOUR FROM time AT TIME ZONE 'UTC')::smallint AS hour
        FROM hit
        WHERE time >= $1 AND time < $2
    ) h
    GROUP BY GROUPING SETS ((path, hour), (hour))
    ON CONFLICT (day, path, hour) DO UPDATE SET
        visitors = visitor_time_stats.visitors + EXCLUDED.visitors
"#;

fn aggregate_dimension_query(dimension: Dimension) -> String {
    format!(
        r#"
        INSERT INTO {table} (day, path, {column}, visitors)
        SELECT $3, COALESCE(path, ''), {column}, COUNT(DISTINCT fingerprint)
        FROM hit
        WHERE time >= $1 AND time < $2
        GROUP BY GROUPING SETS ((path, {column}), ({column}))
        ON CONFLICT (day, path, {column}) DO UPDATE SET
            visitors = {table}.visitors + EXCLUDED.visitors
        "#,
        table = dimension.table(),
        column = dimension.column()
    )
}

fn db_error(context: &'static str) -> impl Fn(sqlx::Error) -> AppError {
    move |e| {
        warn!(error = %e, "{}", context);
        AppError::database(format!("{}: {}", context, e))
    }
}

/// PostgreSQL 存储
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_stats<T>(&self, sql: &str, filter: &Filter, context: &'static str) -> AppResult<Vec<T>>
    where
        T: for<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> + Send + Unpin,
    {
        let (start, end) = filter.time_range();

        sqlx::query_as::<_, T>(sql)
            .bind(start)
            .bind(end)
            .bind(filter.from)
            .bind(filter.to)
            .bind(filter.path_key())
            .fetch_all(&self.pool)
            .await
            .map_err(db_error(context))
    }
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_error("Error pinging database"))?;
        Ok(())
    }

    async fn save_hits(&self, hits: &[Hit]) -> AppResult<()> {
        for chunk in hits.chunks(INSERT_CHUNK) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO hit (fingerprint, session, time, path, url, language, user_agent, referrer, \
                 os, os_version, browser, browser_version, country_code, desktop, mobile) ",
            );

            builder.push_values(chunk, |mut row, hit| {
                row.push_bind(&hit.fingerprint)
                    .push_bind(hit.session)
                    .push_bind(hit.time)
                    .push_bind(&hit.path)
                    .push_bind(&hit.url)
                    .push_bind(&hit.language)
                    .push_bind(&hit.user_agent)
                    .push_bind(&hit.referrer)
                    .push_bind(&hit.os)
                    .push_bind(&hit.os_version)
                    .push_bind(&hit.browser)
                    .push_bind(&hit.browser_version)
                    .push_bind(&hit.country_code)
                    .push_bind(hit.desktop)
                    .push_bind(hit.mobile);
            });

            builder
                .build()
                .execute(&self.pool)
                .await
                .map_err(db_error("Error saving hits"))?;
        }

        debug!(count = hits.len(), "Hits saved");
        Ok(())
    }

    async fn hit_days(&self, before: NaiveDate) -> AppResult<Vec<NaiveDate>> {
        sqlx::query_scalar::<_, NaiveDate>(
            "SELECT DISTINCT (time AT TIME ZONE 'UTC')::date AS day FROM hit WHERE time < $1 ORDER BY day",
        )
        .bind(start_of_day(before))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Error reading days to process"))
    }

    async fn aggregate_day(&self, day: NaiveDate) -> AppResult<u64> {
        let filter = Filter::day(day);
        let (start, end) = filter.time_range();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("Error starting transaction"))?;

        let mut statements = vec![AGGREGATE_VISITORS.to_string(), AGGREGATE_HOURS.to_string()];
        statements.extend(Dimension::ALL.iter().map(|d| aggregate_dimension_query(*d)));

        for sql in &statements {
            sqlx::query(sql)
                .bind(start)
                .bind(end)
                .bind(day)
                .execute(&mut *tx)
                .await
                .map_err(db_error("Error aggregating hits"))?;
        }

        let deleted = sqlx::query("DELETE FROM hit WHERE time >= $1 AND time < $2")
            .bind(start)
            .bind(end)
            .execute(&mut *tx)
            .await
            .map_err(db_error("Error deleting processed hits"))?
            .rows_affected();

        tx.commit()
            .await
            .map_err(db_error("Error committing processed hits"))?;

        debug!(day = %day, hits = deleted, "Day aggregated");
        Ok(deleted)
    }

    async fn active_visitors(&self, since: DateTime<Utc>) -> AppResult<ActiveVisitors> {
        let pages = sqlx::query_as::<_, PathVisitors>(
            "SELECT path, COUNT(DISTINCT fingerprint) AS visitors FROM hit WHERE time >= $1 \
             GROUP BY path ORDER BY visitors DESC, path",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Error reading active visitors"))?;

        let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(DISTINCT fingerprint) FROM hit WHERE time >= $1")
            .bind(since)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error("Error reading active visitors"))?;

        Ok(ActiveVisitors { pages, total })
    }

    async fn visitors(&self, filter: &Filter) -> AppResult<Vec<DayStats>> {
        self.fetch_stats(&visitors_query(), filter, "Error reading visitor statistics")
            .await
    }

    async fn page_visitors(&self, filter: &Filter) -> AppResult<Vec<PathDayStats>> {
        self.fetch_stats(&page_visitors_query(), filter, "Error reading page statistics")
            .await
    }

    async fn visitor_hours(&self, filter: &Filter) -> AppResult<Vec<HourStats>> {
        self.fetch_stats(&visitor_hours_query(), filter, "Error reading hourly statistics")
            .await
    }

    async fn dimension(&self, dimension: Dimension, filter: &Filter) -> AppResult<Vec<DimensionCount>> {
        self.fetch_stats(&dimension_query(dimension), filter, "Error reading statistics")
            .await
    }

    async fn platform(&self, filter: &Filter) -> AppResult<PlatformCount> {
        let rows: Vec<PlatformCount> = self
            .fetch_stats(&platform_query(), filter, "Error reading platform statistics")
            .await?;
        Ok(rows.into_iter().next().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_queries_use_matching_table() {
        for dimension in Dimension::ALL {
            let read = dimension_query(dimension);
            let write = aggregate_dimension_query(dimension);

            for sql in [&read, &write] {
                assert!(sql.contains(dimension.table()));
                assert!(sql.contains(dimension.column()));
            }
            assert!(write.contains(&format!("ON CONFLICT (day, path, {})", dimension.column())));
        }
    }

    #[test]
    fn test_read_queries_include_live_hits() {
        for sql in [
            visitors_query(),
            page_visitors_query(),
            visitor_hours_query(),
            platform_query(),
            dimension_query(Dimension::Language),
        ] {
            assert!(sql.contains("FROM hit"));
            assert!(sql.contains("$5 = '' OR path = $5"));
        }
    }
}
