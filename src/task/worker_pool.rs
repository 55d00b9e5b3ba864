// src/task/worker_pool.rs

use crate::{config, error::AppResult};
use futures::{StreamExt, future::BoxFuture, stream};
use log::{debug, error};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// 一次扇出执行的结果统计。部分成功是预期结果，
/// 例如 1000 张缩略图缓存成功 950 张。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolOutcome {
    pub completed: usize,
    pub failed: usize,
    /// 取消标志竖起后未被派发的子任务数。
    pub abandoned: usize,
}

impl PoolOutcome {
    pub fn dispatched(&self) -> usize {
        self.completed + self.failed
    }
}

enum SubResult {
    Done,
    Failed,
    Abandoned,
}

/// 任务内部的有界子池：拥有它的任务提交若干子任务，
/// 然后阻塞在 `await_completion_or_cancel` 直到全部完成或观察到取消。
///
/// 子池与宿主任务共享同一个取消标志；取消只在派发粒度生效，
/// 已在执行中的子任务不会被打断（除非它自己检查标志）。
pub struct WorkerPool {
    concurrency: usize,
    cancel: Arc<AtomicBool>,
    jobs: Vec<(String, BoxFuture<'static, AppResult<()>>)>,
}

impl WorkerPool {
    pub fn new(concurrency: usize, cancel: Arc<AtomicBool>) -> Self {
        Self {
            concurrency: concurrency.max(1),
            cancel,
            jobs: Vec::new(),
        }
    }

    /// 按可用并行度推导子池大小: max(核数 - 1, 2)。
    pub fn from_parallelism(cancel: Arc<AtomicBool>) -> Self {
        Self::new(config::derived_parallelism(), cancel)
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn submitted(&self) -> usize {
        self.jobs.len()
    }

    /// 入队一个子任务。label 只用于单项失败的日志。
    pub fn submit<F>(&mut self, label: impl Into<String>, fut: F)
    where
        F: Future<Output = AppResult<()>> + Send + 'static,
    {
        self.jobs.push((label.into(), Box::pin(fut)));
    }

    /// 驱动所有子任务，任意时刻在飞的不超过 concurrency 个。
    /// 单个子任务失败只记日志，绝不连累兄弟任务。
    pub async fn await_completion_or_cancel(self) -> PoolOutcome {
        let concurrency = self.concurrency;
        let cancel = self.cancel;

        // 包装必须在进入流组合器之前完成，包装后的 future 才能随宿主任务跨线程驱动
        let wrapped: Vec<_> = self
            .jobs
            .into_iter()
            .map(|(label, fut)| {
                let cancel = cancel.clone();
                async move {
                    // 派发检查点：取消后剩余子任务直接放弃，不再执行
                    if cancel.load(Ordering::Relaxed) {
                        debug!("子任务 '{}' 在派发前被放弃 (已取消)。", label);
                        return SubResult::Abandoned;
                    }
                    match fut.await {
                        Ok(()) => SubResult::Done,
                        Err(e) => {
                            error!("子任务 '{}' 失败: {}", label, e);
                            SubResult::Failed
                        }
                    }
                }
            })
            .collect();

        stream::iter(wrapped)
            .buffer_unordered(concurrency)
            .fold(PoolOutcome::default(), |mut outcome, res| async move {
                match res {
                    SubResult::Done => outcome.completed += 1,
                    SubResult::Failed => outcome.failed += 1,
                    SubResult::Abandoned => outcome.abandoned += 1,
                }
                outcome
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use crate::error::AppError;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pool_never_exceeds_concurrency() {
        let cancel = Arc::new(AtomicBool::new(false));
        let mut pool = WorkerPool::new(3, cancel);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for i in 0..50 {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            pool.submit(format!("job-{}", i), async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            });
        }

        let outcome = pool.await_completion_or_cancel().await;
        assert_eq!(outcome.completed, 50);
        assert!(peak.load(Ordering::SeqCst) <= 3, "并发峰值超过了子池上限");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_single_failure_never_aborts_siblings() {
        let cancel = Arc::new(AtomicBool::new(false));
        let mut pool = WorkerPool::new(4, cancel);
        for i in 0..10 {
            pool.submit(format!("job-{}", i), async move {
                if i % 3 == 0 {
                    Err(AppError::Other(anyhow!("模拟失败")))
                } else {
                    Ok(())
                }
            });
        }
        let outcome = pool.await_completion_or_cancel().await;
        assert_eq!(outcome.failed, 4);
        assert_eq!(outcome.completed, 6);
        assert_eq!(outcome.abandoned, 0);
    }

    #[test]
    fn test_derived_pool_size_has_floor_of_two() {
        let cancel = Arc::new(AtomicBool::new(false));
        let mut pool = WorkerPool::from_parallelism(cancel);
        assert!(pool.concurrency() >= 2);

        pool.submit("a", async { Ok(()) });
        pool.submit("b", async { Ok(()) });
        assert_eq!(pool.submitted(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancel_abandons_undispatched_jobs() {
        let cancel = Arc::new(AtomicBool::new(false));
        let mut pool = WorkerPool::new(1, cancel.clone());
        let done = Arc::new(AtomicUsize::new(0));

        for i in 0..100 {
            let cancel = cancel.clone();
            let done = done.clone();
            pool.submit(format!("job-{}", i), async move {
                done.fetch_add(1, Ordering::SeqCst);
                // 第 10 个子任务完成后竖起取消标志
                if done.load(Ordering::SeqCst) == 10 {
                    cancel.store(true, Ordering::SeqCst);
                }
                Ok(())
            });
        }

        let outcome = pool.await_completion_or_cancel().await;
        // 串行池：恰好 10 个被执行，其余全部在派发前被放弃
        assert_eq!(outcome.dispatched(), 10);
        assert_eq!(outcome.abandoned, 90);
        assert_eq!(done.load(Ordering::SeqCst), 10);
    }
}
