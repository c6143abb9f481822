use crate::error::ImportError;
use crate::jobs::{JobContext, JobExecutor, JobOutcome};
use crate::status::TaskStatus;
use crate::task::ImportTask;
use log::{debug, info, warn};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// 驱动单个任务的一次完整执行：尝试、超时、重试与最终失败
pub struct JobWorker {
    executor: Arc<dyn JobExecutor>,
    ctx: JobContext,
    retry_delay: Duration,
}

impl JobWorker {
    pub fn new(executor: Arc<dyn JobExecutor>, ctx: JobContext) -> Self {
        let retry_delay = ctx.config.retry_delay();
        Self {
            executor,
            ctx,
            retry_delay,
        }
    }

    /// 返回任务的最终状态，执行器的错误不会向外传播
    pub async fn run(&self, task: Arc<ImportTask>) -> TaskStatus {
        let tries = self.executor.tries().max(1);
        let mut last_error: Option<ImportError> = None;

        for attempt in 1..=tries {
            if let Err(e) = task.mark_started().await {
                warn!("[Task {}] Cannot start: {}", task.id, e);
                break;
            }
            if attempt > 1 {
                info!("[Task {}] Attempt {}/{}", task.id, attempt, tries);
                if let Err(e) = task.add_log(&format!("Retry attempt {}/{}", attempt, tries)).await {
                    warn!("[Task {}] {}", task.id, e);
                }
            }

            match self.attempt(&task).await {
                Ok(outcome) => {
                    debug!("[Task {}] Finished with {:?}", task.id, outcome);
                    return task.status();
                }
                Err(ImportError::Canceled(_)) => {
                    info!("[Task {}] Stopped after cancellation", task.id);
                    return task.status();
                }
                Err(_) if task.status() == TaskStatus::Cancelled => {
                    info!("[Task {}] Stopped after cancellation", task.id);
                    return task.status();
                }
                Err(e) => {
                    warn!(
                        "[Task {}] Attempt {}/{} failed: {}",
                        task.id, attempt, tries, e
                    );
                    if let Err(mark_err) = task.mark_failed(Some(&e.to_string())).await {
                        warn!("[Task {}] {}", task.id, mark_err);
                    }
                    last_error = Some(e);
                }
            }

            if attempt < tries {
                tokio::time::sleep(retry_backoff(self.retry_delay, attempt)).await;
                if task.status() != TaskStatus::Failed {
                    debug!("[Task {}] Status changed during backoff, not retrying", task.id);
                    return task.status();
                }
            }
        }

        if let Some(error) = last_error {
            if let Err(e) = self.executor.failed(&task, &error).await {
                warn!("[Task {}] Failure hook error: {}", task.id, e);
            }
        }
        task.status()
    }

    /// 单次尝试：执行、等待暂停结束、标记完成并写入总结
    async fn attempt(&self, task: &Arc<ImportTask>) -> Result<JobOutcome, ImportError> {
        let handle = self.executor.handle(task, &self.ctx);
        let outcome = match self.executor.timeout() {
            Some(limit) => tokio::time::timeout(limit, handle).await.map_err(|_| {
                ImportError::Timeout(format!(
                    "Job exceeded {}",
                    humantime::format_duration(limit)
                ))
            })??,
            None => handle.await?,
        };

        task.checkpoint().await?;
        task.mark_completed().await?;
        task.add_log(&outcome.summary).await?;
        Ok(outcome)
    }
}

/// 第 n 次失败后的等待时间 base * 2^(n-1)，溢出时取最大值
pub fn retry_backoff(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
}

impl fmt::Debug for JobWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobWorker")
            .field("task_type", &self.executor.task_type())
            .field("tries", &self.executor.tries())
            .field("timeout", &self.executor.timeout())
            .field("retry_delay", &self.retry_delay)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::test_support::context;
    use crate::task::{TaskSnapshot, TaskType};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// 前 `fail_times` 次失败，之后成功
    struct Flaky {
        tries: u32,
        fail_times: u32,
        calls: AtomicU32,
        failed_hook: AtomicU32,
        timeout: Option<Duration>,
        sleep: Duration,
    }

    impl Flaky {
        fn new(tries: u32, fail_times: u32) -> Self {
            Self {
                tries,
                fail_times,
                calls: AtomicU32::new(0),
                failed_hook: AtomicU32::new(0),
                timeout: None,
                sleep: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl JobExecutor for Flaky {
        fn task_type(&self) -> TaskType {
            TaskType::ApiImport
        }

        fn tries(&self) -> u32 {
            self.tries
        }

        fn timeout(&self) -> Option<Duration> {
            self.timeout
        }

        async fn handle(
            &self,
            task: &Arc<ImportTask>,
            _ctx: &JobContext,
        ) -> Result<JobOutcome, ImportError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.sleep).await;
            task.update_progress(Some(call as u64)).await?;
            if call <= self.fail_times {
                return Err(ImportError::Process(format!("boom {}", call)));
            }
            Ok(JobOutcome::new(call as u64, format!("done after {} calls", call)))
        }

        async fn failed(&self, task: &Arc<ImportTask>, error: &ImportError) -> Result<(), ImportError> {
            self.failed_hook.fetch_add(1, Ordering::SeqCst);
            task.mark_failed(Some(&error.to_string())).await
        }
    }

    async fn setup(dir: &std::path::Path) -> (JobContext, Arc<ImportTask>) {
        let ctx = context(dir, |c| c.retry_delay_ms = 5);
        let task = ImportTask::create(
            TaskSnapshot::new(TaskType::ApiImport, "flaky", json!({}), 10),
            Arc::clone(&ctx.persistence),
            None,
        )
        .await
        .unwrap();
        (ctx, task)
    }

    #[test]
    fn backoff_doubles_and_saturates() {
        let base = Duration::from_millis(100);
        assert_eq!(retry_backoff(base, 1), base);
        assert_eq!(retry_backoff(base, 3), Duration::from_millis(400));
        assert_eq!(retry_backoff(base, 40), base.saturating_mul(u32::MAX));
        assert_eq!(retry_backoff(Duration::ZERO, 40), Duration::ZERO);
    }

    #[tokio::test]
    async fn large_retry_budget_runs_to_exhaustion() {
        let dir = tempfile::tempdir().unwrap();
        let (_, task) = setup(dir.path()).await;
        let ctx = context(dir.path(), |c| c.retry_delay_ms = 0);
        let executor = Arc::new(Flaky::new(40, 40));

        let status = JobWorker::new(executor.clone(), ctx).run(Arc::clone(&task)).await;
        assert_eq!(status, TaskStatus::Failed);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 40);
        assert_eq!(executor.failed_hook.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn success_completes_and_logs_summary() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, task) = setup(dir.path()).await;
        let executor = Arc::new(Flaky::new(1, 0));

        let status = JobWorker::new(executor, ctx).run(Arc::clone(&task)).await;
        assert_eq!(status, TaskStatus::Completed);
        let snapshot = task.snapshot().await;
        assert_eq!(snapshot.progress, 100.0);
        assert!(snapshot.logs.last().unwrap().ends_with("done after 1 calls"));
    }

    #[tokio::test]
    async fn retries_until_success() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, task) = setup(dir.path()).await;
        let executor = Arc::new(Flaky::new(3, 2));

        let status = JobWorker::new(executor.clone(), ctx).run(Arc::clone(&task)).await;
        assert_eq!(status, TaskStatus::Completed);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 3);
        assert_eq!(executor.failed_hook.load(Ordering::SeqCst), 0);

        let snapshot = task.snapshot().await;
        assert_eq!(snapshot.error_message, Some("boom 2".to_string()));
        assert!(snapshot.logs.iter().any(|l| l.ends_with("Retry attempt 3/3")));
    }

    #[tokio::test]
    async fn exhausted_tries_run_failure_hook_once() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, task) = setup(dir.path()).await;
        let executor = Arc::new(Flaky::new(2, 5));

        let status = JobWorker::new(executor.clone(), ctx).run(Arc::clone(&task)).await;
        assert_eq!(status, TaskStatus::Failed);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
        assert_eq!(executor.failed_hook.load(Ordering::SeqCst), 1);

        let snapshot = task.snapshot().await;
        assert_eq!(snapshot.error_message.as_deref(), Some("boom 2"));
        let failures = snapshot
            .logs
            .iter()
            .filter(|l| l.ends_with("Task failed: boom 2"))
            .count();
        assert_eq!(failures, 1);
        assert!(snapshot.progress < 100.0);
    }

    #[tokio::test]
    async fn job_timeout_fails_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, task) = setup(dir.path()).await;
        let mut flaky = Flaky::new(1, 0);
        flaky.timeout = Some(Duration::from_millis(50));
        flaky.sleep = Duration::from_secs(5);

        let status = JobWorker::new(Arc::new(flaky), ctx).run(Arc::clone(&task)).await;
        assert_eq!(status, TaskStatus::Failed);
        assert_eq!(
            task.snapshot().await.error_message.as_deref(),
            Some("Timed out: Job exceeded 50ms")
        );
    }

    #[tokio::test]
    async fn cancelled_task_is_left_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, task) = setup(dir.path()).await;
        let mut flaky = Flaky::new(3, 0);
        flaky.sleep = Duration::from_millis(200);

        let runner = {
            let task = Arc::clone(&task);
            tokio::spawn(async move { JobWorker::new(Arc::new(flaky), ctx).run(task).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        task.cancel().await.unwrap();

        assert_eq!(runner.await.unwrap(), TaskStatus::Cancelled);
        assert!(task.snapshot().await.error_message.is_none());
    }
}
