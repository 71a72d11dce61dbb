//! 每日汇总

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Days, Utc};
use folio_errors::AppResult;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::model::start_of_day;
use crate::store::Store;

/// 把之前各天的原始访问汇总到统计表
pub struct Processor {
    store: Arc<dyn Store>,
}

impl Processor {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// 处理今天之前所有仍有原始访问的天，返回处理的天数
    pub async fn process(&self) -> AppResult<usize> {
        let today = Utc::now().date_naive();
        let days = self.store.hit_days(today).await?;

        for day in &days {
            let hits = self.store.aggregate_day(*day).await?;
            debug!(day = %day, hits, "Processed tracking data");
        }

        Ok(days.len())
    }

    /// 执行一次并记录结果
    pub async fn run(&self) {
        info!("Processing tracking data...");

        match self.process().await {
            Ok(days) => info!(days, "Done processing tracking data"),
            Err(e) => error!(error = %e, "Error processing tracking data"),
        }
    }

    /// 每天 UTC 零点执行，取消返回的令牌即停止
    pub fn schedule(self: Arc<Self>) -> CancellationToken {
        run_at_midnight(move || {
            let processor = self.clone();
            async move { processor.run().await }
        })
    }
}

/// 距下一个 UTC 零点的时长
pub fn until_midnight(now: DateTime<Utc>) -> Duration {
    let next = now
        .date_naive()
        .checked_add_days(Days::new(1))
        .map(start_of_day)
        .unwrap_or(now);

    (next - now).to_std().unwrap_or_default()
}

/// 每天 UTC 零点执行任务，单次执行 panic 不会中断调度
pub fn run_at_midnight<F, Fut>(task: F) -> CancellationToken
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let token = CancellationToken::new();
    let cancelled = token.clone();

    tokio::spawn(async move {
        loop {
            let wait = until_midnight(Utc::now());
            debug!(wait_secs = wait.as_secs(), "Waiting for midnight");

            tokio::select! {
                _ = cancelled.cancelled() => break,
                _ = tokio::time::sleep(wait) => {
                    if let Err(e) = tokio::spawn(task()).await {
                        error!(error = %e, "Scheduled task failed");
                    }
                }
            }
        }

        debug!("Midnight schedule stopped");
    });

    token
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MockStore;
    use chrono::{NaiveDate, TimeZone};
    use folio_errors::AppError;
    use mockall::predicate::eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_until_midnight() {
        let now = Utc.with_ymd_and_hms(2021, 1, 1, 23, 30, 0).unwrap();
        assert_eq!(until_midnight(now), Duration::from_secs(30 * 60));

        let midnight = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(until_midnight(midnight), Duration::from_secs(24 * 3600));
    }

    #[tokio::test]
    async fn test_process_aggregates_each_day() {
        let days = vec![
            NaiveDate::from_ymd_opt(2021, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2021, 1, 2).unwrap(),
        ];
        let mut store = MockStore::new();
        let returned = days.clone();
        store
            .expect_hit_days()
            .times(1)
            .returning(move |_| Ok(returned.clone()));
        for day in &days {
            store
                .expect_aggregate_day()
                .with(eq(*day))
                .times(1)
                .returning(|_| Ok(5));
        }

        let processor = Processor::new(Arc::new(store));
        assert_eq!(processor.process().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_process_stops_on_error() {
        let mut store = MockStore::new();
        store
            .expect_hit_days()
            .returning(|_| Ok(vec![NaiveDate::from_ymd_opt(2021, 1, 1).unwrap()]));
        store
            .expect_aggregate_day()
            .returning(|_| Err(AppError::database("deadlock detected")));

        let processor = Processor::new(Arc::new(store));
        assert!(processor.process().await.is_err());
        // 失败只记录日志
        processor.run().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_at_midnight_until_cancelled() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();

        let token = run_at_midnight(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        // 零点之前不执行
        tokio::time::sleep(until_midnight(Utc::now()) / 2).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        token.cancel();
        tokio::time::sleep(Duration::from_secs(2 * 24 * 3600)).await;

        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(token.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_at_midnight_survives_panic() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let token = run_at_midnight(move || {
            let counter = counter.clone();
            let tx = tx.clone();
            async move {
                let run = counter.fetch_add(1, Ordering::SeqCst) + 1;
                let _ = tx.send(run);
                if run == 1 {
                    panic!("first run fails");
                }
            }
        });

        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
        assert_eq!(rx.recv().await, Some(3));
        token.cancel();

        assert!(runs.load(Ordering::SeqCst) >= 3);
    }
}
