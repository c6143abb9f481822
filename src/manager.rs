use crate::config::ImportConfig;
use crate::error::ImportError;
use crate::events::TaskEvent;
use crate::jobs::{
    ApiImportExecutor, ExtractionExecutor, FileUploadExecutor, JobContext, JobExecutor,
    WebScrapingExecutor,
};
use crate::persistence::PersistenceManager;
use crate::request::ImportTaskRequest;
use crate::resource::ResourceItem;
use crate::stats::ImportStats;
use crate::status::TaskStatus;
use crate::storage::LocalStorage;
use crate::system::SystemStatus;
use crate::task::{ImportTask, TaskSnapshot, TaskType};
use crate::worker::JobWorker;
use dashmap::{DashMap, DashSet};
use futures_util::future::join_all;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, OnceCell, OwnedSemaphorePermit, Semaphore, broadcast};

/// 任务详情：记录、日志与产出资源
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDetail {
    pub task: TaskSnapshot,
    pub resources: Vec<ResourceItem>,
}

/// 资源分页结果，页码从 1 开始
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcePage {
    pub items: Vec<ResourceItem>,
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
    pub last_page: usize,
}

pub const DEFAULT_RESOURCES_PER_PAGE: usize = 15;

pub struct ImportManager {
    pub config: Arc<ImportConfig>,
    pub tasks: Arc<DashMap<u32, Arc<ImportTask>>>,
    pub persistence: OnceCell<Arc<PersistenceManager>>,
    pub pending_queue: Arc<Mutex<VecDeque<u32>>>,
    pub task_event_tx: broadcast::Sender<TaskEvent>,

    executors: DashMap<TaskType, Arc<dyn JobExecutor>>,
    /// 正在执行的任务，每个任务同一时刻只有一个执行器
    active: DashSet<u32>,
    semaphore: Arc<Semaphore>,
}

impl ImportManager {
    pub fn new(config: ImportConfig) -> Result<Arc<Self>, ImportError> {
        config.validate()?;
        let (task_event_tx, _) = broadcast::channel(1024);
        let max_concurrent = config.max_concurrent_jobs;

        Ok(Arc::new(Self {
            config: Arc::new(config),
            tasks: Arc::new(DashMap::new()),
            persistence: OnceCell::new(),
            pending_queue: Arc::new(Mutex::new(VecDeque::new())),
            task_event_tx,
            executors: DashMap::new(),
            active: DashSet::new(),
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
        }))
    }

    /// 按配置打开存储，注册默认执行器并恢复任务
    pub async fn init(self: &Arc<Self>) -> Result<(), ImportError> {
        let persistence = Arc::new(PersistenceManager::new(&self.config).await?);
        self.init_with(persistence).await
    }

    pub async fn init_with(
        self: &Arc<Self>,
        persistence: Arc<PersistenceManager>,
    ) -> Result<(), ImportError> {
        self.persistence
            .set(persistence)
            .map_err(|_| ImportError::ConfigError("Persistence already initialized".into()))?;

        tokio::fs::create_dir_all(&self.config.storage_dir)
            .await
            .map_err(|e| ImportError::Io(format!("Failed to create storage dir: {}", e)))?;

        self.register_default_executors()?;
        self.load_tasks().await?;
        self.spawn_listener();
        Ok(())
    }

    fn register_default_executors(&self) -> Result<(), ImportError> {
        self.register_executor(Arc::new(WebScrapingExecutor::new()));
        self.register_executor(Arc::new(FileUploadExecutor::default()));
        self.register_executor(Arc::new(ApiImportExecutor::from_config(
            &self.config.api_import,
        )?));
        self.register_executor(Arc::new(ExtractionExecutor::new(&self.config.extraction)));
        Ok(())
    }

    /// 同类型的执行器会被替换
    pub fn register_executor(&self, executor: Arc<dyn JobExecutor>) {
        let task_type = executor.task_type();
        debug!("[Manager] Registered executor for {}", task_type);
        self.executors.insert(task_type, executor);
    }

    /// 执行器退出后调度下一个排队任务
    fn spawn_listener(self: &Arc<Self>) {
        let manager: Weak<Self> = Arc::downgrade(self);
        let mut rx = self.task_event_tx.subscribe();
        tokio::spawn(async move {
            loop {
                let event = rx.recv().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                match event {
                    Ok(TaskEvent::Finished { id, status }) => {
                        debug!("[Manager] Task {} finished as {}", id, status);
                        if let Err(e) = manager.spawn_next_task().await {
                            error!("[Manager] Failed to spawn next task after {}: {}", id, e);
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("[Manager] Event listener lagged by {} events", skipped);
                        if let Err(e) = manager.spawn_next_task().await {
                            error!("[Manager] Failed to spawn next task: {}", e);
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    pub fn persistence(&self) -> Result<Arc<PersistenceManager>, ImportError> {
        self.persistence
            .get()
            .cloned()
            .ok_or_else(|| ImportError::ConfigError("Persistence not initialized".into()))
    }

    fn job_context(&self) -> Result<JobContext, ImportError> {
        Ok(JobContext::new(Arc::clone(&self.config), self.persistence()?))
    }

    /// 只读加载存储中的任务，不改动任何记录
    async fn load_tasks(&self) -> Result<(), ImportError> {
        let persistence = self.persistence()?;
        let snapshots = persistence.load_tasks().await?;

        for snapshot in snapshots {
            let task = ImportTask::from_snapshot(
                snapshot,
                Some(Arc::clone(&persistence)),
                Some(self.task_event_tx.clone()),
            );
            self.tasks.insert(task.id, task);
        }

        info!("[Manager] Loaded {} tasks", self.tasks.len());
        Ok(())
    }

    /// 接管中断的任务：running 但本进程没有执行器的任务改为 paused，返回被接管的 id
    pub async fn recover_interrupted(&self) -> Result<Vec<u32>, ImportError> {
        let mut recovered = Vec::new();
        for task in self.get_all_tasks() {
            if task.status() != TaskStatus::Running || self.active.contains(&task.id) {
                continue;
            }
            self.take_over(&task).await?;
            recovered.push(task.id);
        }
        recovered.sort_unstable();
        if !recovered.is_empty() {
            info!("[Manager] Recovered {} interrupted tasks", recovered.len());
        }
        Ok(recovered)
    }

    async fn take_over(&self, task: &Arc<ImportTask>) -> Result<(), ImportError> {
        task.mark_interrupted().await.inspect_err(|e| {
            error!("[Task {}] Failed to restore as paused: {}", task.id, e);
        })
    }

    //----------------------------------------------------------------------------------------------

    pub async fn create_task(&self, request: ImportTaskRequest) -> Result<u32, ImportError> {
        let task = ImportTask::create(
            request.into_snapshot(),
            self.persistence()?,
            Some(self.task_event_tx.clone()),
        )
        .await?;
        let task_id = task.id;
        info!("[Manager] Created {} task {} '{}'", task.task_type, task_id, task.name);
        self.tasks.insert(task_id, task);
        Ok(task_id)
    }

    /// 创建并立即调度
    pub async fn submit(self: &Arc<Self>, request: ImportTaskRequest) -> Result<u32, ImportError> {
        let task_id = self.create_task(request).await?;
        self.dispatch(task_id).await
    }

    /// 有空闲名额时立即执行，否则进入等待队列(去重)
    pub async fn dispatch(self: &Arc<Self>, task_id: u32) -> Result<u32, ImportError> {
        let task = self.dispatchable(task_id)?;

        let mut queue = self.pending_queue.lock().await;
        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => {
                self.run_task(task, permit)?;
            }
            Err(_) => {
                if !queue.contains(&task_id) {
                    queue.push_back(task_id);
                    debug!(
                        "[Manager] Task {} queued (queue len = {}, permits={})",
                        task_id,
                        queue.len(),
                        self.semaphore.available_permits()
                    );
                } else {
                    debug!("[Manager] Task {} already in queue", task_id);
                }
            }
        }
        Ok(task_id)
    }

    /// 调度所有 pending 任务，按 id 顺序
    pub async fn dispatch_pending(self: &Arc<Self>) -> Result<Vec<u32>, ImportError> {
        let mut pending: Vec<u32> = self
            .tasks
            .iter()
            .filter(|entry| entry.value().status() == TaskStatus::Pending)
            .map(|entry| *entry.key())
            .collect();
        pending.sort_unstable();

        for task_id in &pending {
            if let Err(e) = self.dispatch(*task_id).await {
                error!("[Task {}] Failed to dispatch: {}", task_id, e);
            }
        }
        Ok(pending)
    }

    fn dispatchable(&self, task_id: u32) -> Result<Arc<ImportTask>, ImportError> {
        let task = self
            .get_task(task_id)
            .ok_or(ImportError::TaskNotFound(task_id))?;
        if self.active.contains(&task_id) {
            return Err(ImportError::TaskAlreadyRunning(task_id));
        }
        match task.status() {
            TaskStatus::Pending | TaskStatus::Paused => Ok(task),
            TaskStatus::Running => Err(ImportError::TaskAlreadyRunning(task_id)),
            other => Err(ImportError::invalid_transition(other, "dispatch")),
        }
    }

    fn run_task(
        self: &Arc<Self>,
        task: Arc<ImportTask>,
        permit: OwnedSemaphorePermit,
    ) -> Result<(), ImportError> {
        let ctx = self.job_context()?;
        if !self.active.insert(task.id) {
            return Err(ImportError::TaskAlreadyRunning(task.id));
        }
        let executor = self
            .executors
            .get(&task.task_type)
            .map(|entry| Arc::clone(entry.value()));
        let manager = Arc::clone(self);

        debug!(
            "[Manager] Starting task {} (permits left = {})",
            task.id,
            self.semaphore.available_permits()
        );

        tokio::spawn(async move {
            let _permit = permit;
            let status = match executor {
                Some(executor) => JobWorker::new(executor, ctx).run(Arc::clone(&task)).await,
                None => {
                    let err = ImportError::UnsupportedTaskType(task.task_type.to_string());
                    if let Err(e) = task.mark_failed(Some(&err.to_string())).await {
                        error!("[Task {}] {}", task.id, e);
                    }
                    task.status()
                }
            };
            drop(_permit);
            manager.active.remove(&task.id);

            info!("[Task {}] Finished as {}", task.id, status);
            let _ = manager.task_event_tx.send(TaskEvent::Finished {
                id: task.id,
                status,
            });
        });
        Ok(())
    }

    /// 按空闲名额依次启动排队任务，跳过已不可执行的任务
    async fn spawn_next_task(self: &Arc<Self>) -> Result<(), ImportError> {
        loop {
            let mut queue = self.pending_queue.lock().await;
            if queue.is_empty() {
                return Ok(());
            }
            let Ok(permit) = self.semaphore.clone().try_acquire_owned() else {
                return Ok(());
            };
            let Some(task_id) = queue.pop_front() else {
                return Ok(());
            };

            match self
                .dispatchable(task_id)
                .and_then(|task| self.run_task(task, permit))
            {
                Ok(()) => debug!("[Manager] Started queued task {}", task_id),
                Err(e) => warn!("[Manager] Skipped queued task {}: {}", task_id, e),
            }
        }
    }

    async fn remove_from_queue(&self, task_id: u32) {
        let mut queue = self.pending_queue.lock().await;
        if let Some(pos) = queue.iter().position(|id| *id == task_id) {
            queue.remove(pos);
            debug!(
                "[Manager] Removed task {} from pending queue (new len={})",
                task_id,
                queue.len()
            );
        }
    }

    /// 等待任务的执行器退出，未调度的任务立即返回当前状态
    pub async fn wait_for_task(&self, task_id: u32) -> Result<TaskStatus, ImportError> {
        let mut rx = self.task_event_tx.subscribe();
        loop {
            let task = self
                .get_task(task_id)
                .ok_or(ImportError::TaskNotFound(task_id))?;
            {
                let queue = self.pending_queue.lock().await;
                if !self.active.contains(&task_id) && !queue.contains(&task_id) {
                    return Ok(task.status());
                }
            }

            match rx.recv().await {
                Ok(TaskEvent::Finished { id, status }) if id == task_id => return Ok(status),
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return Ok(task.status()),
            }
        }
    }

    //------------------------------------ admin ---------------------------------------------------

    pub async fn pause(&self, task_id: u32) -> Result<(), ImportError> {
        let task = self.require_task(task_id)?;
        task.pause().await
    }

    /// 有执行器时唤醒它，否则重新调度；没有执行器的 running 任务视为中断并接管
    pub async fn resume(self: &Arc<Self>, task_id: u32) -> Result<(), ImportError> {
        let task = self.require_task(task_id)?;
        if self.active.contains(&task_id) {
            return task.resume().await;
        }
        match task.status() {
            TaskStatus::Paused => self.dispatch(task_id).await.map(|_| ()),
            TaskStatus::Running => {
                self.take_over(&task).await?;
                self.dispatch(task_id).await.map(|_| ())
            }
            other => Err(ImportError::invalid_transition(other, "resume")),
        }
    }

    /// running 与 paused 之间切换
    pub async fn toggle_pause(self: &Arc<Self>, task_id: u32) -> Result<TaskStatus, ImportError> {
        let task = self.require_task(task_id)?;
        match task.status() {
            TaskStatus::Running => self.pause(task_id).await?,
            TaskStatus::Paused => self.resume(task_id).await?,
            other => return Err(ImportError::invalid_transition(other, "pause/resume")),
        }
        Ok(task.status())
    }

    /// 已完成或已失败的任务不能取消
    pub async fn cancel(&self, task_id: u32) -> Result<(), ImportError> {
        let task = self.require_task(task_id)?;
        task.cancel().await?;
        self.remove_from_queue(task_id).await;
        Ok(())
    }

    /// 仅限失败任务：重置后重新调度
    pub async fn retry(self: &Arc<Self>, task_id: u32) -> Result<u32, ImportError> {
        let task = self.require_task(task_id)?;
        if self.active.contains(&task_id) {
            return Err(ImportError::TaskAlreadyRunning(task_id));
        }
        if task.status() != TaskStatus::Failed {
            return Err(ImportError::invalid_transition(task.status(), "retry"));
        }
        task.reset_for_retry().await?;
        info!("[Task {}] Retrying", task_id);
        self.dispatch(task_id).await
    }

    /// 删除任务及其日志与资源记录，运行中的任务先取消
    pub async fn delete_task(&self, task_id: u32) -> Result<u32, ImportError> {
        let persistence = self.persistence()?;
        let task = self.get_task(task_id);

        if let Some(task) = &task {
            if task.status().is_active() {
                if let Err(e) = task.cancel().await {
                    warn!("[Task {}] Cancel before delete failed: {}", task_id, e);
                }
            }
        } else if persistence.load_task(task_id).await?.is_none() {
            error!("[Task {}] Not found when trying to delete", task_id);
            return Err(ImportError::TaskNotFound(task_id));
        }

        self.remove_from_queue(task_id).await;
        persistence.delete_task(task_id).await?;
        self.tasks.remove(&task_id);

        info!("[Task {}] Deleted", task_id);
        Ok(task_id)
    }

    /// 删除资源文件(若有)与记录
    pub async fn delete_resource(&self, resource_id: u32) -> Result<(), ImportError> {
        let persistence = self.persistence()?;
        let resource = persistence
            .load_resource(resource_id)
            .await?
            .ok_or(ImportError::ResourceNotFound(resource_id))?;

        if let Some(path) = resource.file_path.as_deref() {
            let storage = LocalStorage::new(&self.config.storage_dir);
            match storage.delete(path).await {
                Ok(true) => debug!("[Manager] Removed file {}", path),
                Ok(false) => warn!("[Manager] File {} of resource {} already gone", path, resource_id),
                Err(e) => warn!("[Manager] Failed to remove {}: {}", path, e),
            }
        }
        persistence.delete_resource(resource_id).await?;
        info!("[Manager] Deleted resource {}", resource_id);
        Ok(())
    }

    pub async fn task_detail(&self, task_id: u32) -> Result<TaskDetail, ImportError> {
        let persistence = self.persistence()?;
        let task = match self.get_task(task_id) {
            Some(task) => task.snapshot().await,
            None => persistence
                .load_task(task_id)
                .await?
                .ok_or(ImportError::TaskNotFound(task_id))?,
        };
        let resources = persistence.load_resources(task_id).await?;
        Ok(TaskDetail { task, resources })
    }

    pub async fn list_tasks(&self) -> Vec<TaskSnapshot> {
        let tasks = self.get_all_tasks();
        let mut snapshots = join_all(tasks.iter().map(|task| task.snapshot())).await;
        snapshots.sort_by_key(|t| t.id);
        snapshots
    }

    pub async fn stats(&self) -> Result<ImportStats, ImportError> {
        ImportStats::collect(&*self.persistence()?).await
    }

    /// 按创建时间倒序分页，page 与 per_page 为 0 时按 1 处理
    pub async fn list_resources(&self, page: usize, per_page: usize) -> Result<ResourcePage, ImportError> {
        let page = page.max(1);
        let per_page = per_page.max(1);
        let mut resources = self.persistence()?.load_all_resources().await?;
        resources.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = resources.len();
        let items = resources
            .into_iter()
            .skip((page - 1).saturating_mul(per_page))
            .take(per_page)
            .collect();
        Ok(ResourcePage {
            items,
            total,
            page,
            per_page,
            last_page: total.div_ceil(per_page).max(1),
        })
    }

    pub async fn system_status(&self) -> Result<SystemStatus, ImportError> {
        Ok(SystemStatus::collect(&self.config, &*self.persistence()?).await)
    }

    //----------------------------------------------------------------------------------------------

    fn require_task(&self, task_id: u32) -> Result<Arc<ImportTask>, ImportError> {
        self.get_task(task_id)
            .ok_or(ImportError::TaskNotFound(task_id))
    }

    pub fn get_task(&self, id: u32) -> Option<Arc<ImportTask>> {
        self.tasks.get(&id).map(|v| Arc::clone(v.value()))
    }

    pub fn get_all_tasks(&self) -> Vec<Arc<ImportTask>> {
        self.tasks
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn is_active(&self, task_id: u32) -> bool {
        self.active.contains(&task_id)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<TaskEvent> {
        self.task_event_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobOutcome;
    use crate::resource::ResourceKind;
    use crate::request::ResourceItemRequest;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// 等待 `gate` 放行后完成
    struct Gated {
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl JobExecutor for Gated {
        fn task_type(&self) -> TaskType {
            TaskType::FileUpload
        }

        async fn handle(
            &self,
            task: &Arc<ImportTask>,
            _ctx: &JobContext,
        ) -> Result<JobOutcome, ImportError> {
            self.gate.notified().await;
            task.checkpoint().await?;
            task.update_progress(Some(1)).await?;
            Ok(JobOutcome::new(1, "gated job done"))
        }
    }

    async fn manager(dir: &std::path::Path, max_jobs: usize) -> Arc<ImportManager> {
        let config = ImportConfig::builder()
            .storage_dir(dir.join("storage"))
            .max_concurrent_jobs(max_jobs)
            .retry_delay_ms(5)
            .build()
            .unwrap();
        let manager = ImportManager::new(config).unwrap();
        manager
            .init_with(Arc::new(PersistenceManager::in_memory()))
            .await
            .unwrap();
        manager
    }

    fn upload_request(name: &str) -> ImportTaskRequest {
        ImportTaskRequest::builder(TaskType::FileUpload, name)
            .total_items(1)
            .build()
    }

    #[tokio::test]
    async fn queues_beyond_concurrency_limit() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), 1).await;
        let gate = Arc::new(Notify::new());
        manager.register_executor(Arc::new(Gated { gate: gate.clone() }));

        let first = manager.submit(upload_request("first")).await.unwrap();
        let second = manager.submit(upload_request("second")).await.unwrap();
        assert!(manager.is_active(first));
        assert!(!manager.is_active(second));
        assert_eq!(manager.pending_queue.lock().await.len(), 1);

        gate.notify_one();
        assert_eq!(manager.wait_for_task(first).await.unwrap(), TaskStatus::Completed);

        tokio::time::sleep(Duration::from_millis(50)).await;
        gate.notify_one();
        assert_eq!(manager.wait_for_task(second).await.unwrap(), TaskStatus::Completed);
        assert!(manager.pending_queue.lock().await.is_empty());
    }

    #[tokio::test]
    async fn rejects_second_dispatch_of_active_task() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), 2).await;
        let gate = Arc::new(Notify::new());
        manager.register_executor(Arc::new(Gated { gate: gate.clone() }));

        let id = manager.submit(upload_request("once")).await.unwrap();
        assert_eq!(
            manager.dispatch(id).await.unwrap_err(),
            ImportError::TaskAlreadyRunning(id)
        );

        gate.notify_one();
        manager.wait_for_task(id).await.unwrap();
        assert!(matches!(
            manager.dispatch(id).await.unwrap_err(),
            ImportError::InvalidTransition { .. }
        ));
    }

    #[tokio::test]
    async fn batch_process_has_no_executor() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), 2).await;

        let id = manager
            .submit(ImportTaskRequest::builder(TaskType::BatchProcess, "batch").build())
            .await
            .unwrap();
        assert_eq!(manager.wait_for_task(id).await.unwrap(), TaskStatus::Failed);
        let detail = manager.task_detail(id).await.unwrap();
        assert_eq!(
            detail.task.error_message.as_deref(),
            Some("Unsupported task type: batch-process")
        );
    }

    #[tokio::test]
    async fn pause_resume_and_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), 2).await;
        let gate = Arc::new(Notify::new());
        manager.register_executor(Arc::new(Gated { gate: gate.clone() }));

        let id = manager.submit(upload_request("pausable")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(manager.toggle_pause(id).await.unwrap(), TaskStatus::Paused);

        gate.notify_one();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(manager.is_active(id));
        assert_eq!(manager.get_task(id).unwrap().status(), TaskStatus::Paused);

        assert_eq!(manager.toggle_pause(id).await.unwrap(), TaskStatus::Running);
        assert_eq!(manager.wait_for_task(id).await.unwrap(), TaskStatus::Completed);

        assert!(matches!(
            manager.cancel(id).await.unwrap_err(),
            ImportError::InvalidTransition { .. }
        ));
    }

    #[tokio::test]
    async fn cancel_queued_task_removes_it_from_queue() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), 1).await;
        let gate = Arc::new(Notify::new());
        manager.register_executor(Arc::new(Gated { gate: gate.clone() }));

        let running = manager.submit(upload_request("running")).await.unwrap();
        let queued = manager.submit(upload_request("queued")).await.unwrap();
        manager.cancel(queued).await.unwrap();
        assert!(manager.pending_queue.lock().await.is_empty());

        gate.notify_one();
        manager.wait_for_task(running).await.unwrap();
        assert_eq!(manager.get_task(queued).unwrap().status(), TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn retry_only_for_failed_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), 2).await;

        let id = manager
            .submit(ImportTaskRequest::builder(TaskType::BatchProcess, "batch").build())
            .await
            .unwrap();
        manager.wait_for_task(id).await.unwrap();

        manager.retry(id).await.unwrap();
        assert_eq!(manager.wait_for_task(id).await.unwrap(), TaskStatus::Failed);
        let logs = manager.task_detail(id).await.unwrap().task.logs;
        assert!(logs.iter().any(|l| l.ends_with("Task queued for retry")));

        let pending = manager.create_task(upload_request("pending")).await.unwrap();
        assert!(manager.retry(pending).await.is_err());
    }

    #[tokio::test]
    async fn loading_leaves_running_tasks_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = Arc::new(PersistenceManager::in_memory());
        let interrupted = ImportTask::create(
            TaskSnapshot::new(TaskType::FileUpload, "interrupted", json!({"files": []}), 0),
            Arc::clone(&persistence),
            None,
        )
        .await
        .unwrap();
        interrupted.mark_started().await.unwrap();

        let config = ImportConfig::builder()
            .storage_dir(dir.path().join("storage"))
            .build()
            .unwrap();
        let manager = ImportManager::new(config).unwrap();
        manager.init_with(Arc::clone(&persistence)).await.unwrap();

        let restored = manager.get_task(interrupted.id).unwrap();
        assert_eq!(restored.status(), TaskStatus::Running);
        let stored = persistence.load_task(interrupted.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Running);
        assert!(!stored.logs.iter().any(|l| l.contains("interrupted")));

        manager.resume(interrupted.id).await.unwrap();
        assert!(
            restored
                .logs()
                .await
                .iter()
                .any(|l| l.ends_with("Task interrupted, restored as paused"))
        );
        assert_eq!(
            manager.wait_for_task(interrupted.id).await.unwrap(),
            TaskStatus::Completed
        );
    }

    #[tokio::test]
    async fn recover_pauses_only_orphaned_running_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = Arc::new(PersistenceManager::in_memory());
        let orphan = ImportTask::create(
            TaskSnapshot::new(TaskType::FileUpload, "orphan", json!({"files": []}), 0),
            Arc::clone(&persistence),
            None,
        )
        .await
        .unwrap();
        orphan.mark_started().await.unwrap();

        let config = ImportConfig::builder()
            .storage_dir(dir.path().join("storage"))
            .build()
            .unwrap();
        let manager = ImportManager::new(config).unwrap();
        manager.init_with(Arc::clone(&persistence)).await.unwrap();
        let gate = Arc::new(Notify::new());
        manager.register_executor(Arc::new(Gated { gate: gate.clone() }));
        let live = manager.submit(upload_request("live")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(manager.is_active(live));

        assert_eq!(manager.recover_interrupted().await.unwrap(), vec![orphan.id]);
        assert_eq!(manager.get_task(orphan.id).unwrap().status(), TaskStatus::Paused);
        assert_eq!(manager.get_task(live).unwrap().status(), TaskStatus::Running);
        assert!(manager.recover_interrupted().await.unwrap().is_empty());

        gate.notify_one();
        assert_eq!(manager.wait_for_task(live).await.unwrap(), TaskStatus::Completed);
    }

    #[tokio::test]
    async fn delete_cascades_and_resource_delete_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), 2).await;
        let persistence = manager.persistence().unwrap();

        let id = manager.create_task(upload_request("to delete")).await.unwrap();
        let storage = LocalStorage::new(dir.path().join("storage"));
        storage.put("uploads/a.txt", b"abc").await.unwrap();
        let mut resource = ResourceItemRequest::builder("a.txt", ResourceKind::Material)
            .task_id(id)
            .file("uploads/a.txt", 3)
            .build()
            .into_item();
        resource.id = persistence.insert_resource(&resource).await.unwrap();

        manager.delete_resource(resource.id).await.unwrap();
        assert!(!storage.exists("uploads/a.txt").await.unwrap());
        assert_eq!(
            manager.delete_resource(resource.id).await.unwrap_err(),
            ImportError::ResourceNotFound(resource.id)
        );

        manager.delete_task(id).await.unwrap();
        assert!(manager.get_task(id).is_none());
        assert!(persistence.load_task(id).await.unwrap().is_none());
        assert_eq!(
            manager.delete_task(id).await.unwrap_err(),
            ImportError::TaskNotFound(id)
        );
    }

    #[tokio::test]
    async fn resources_are_paged_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), 2).await;
        let persistence = manager.persistence().unwrap();

        let base = chrono::Utc::now();
        let mut ids = Vec::new();
        for (i, minutes) in [30, 10, 20, 0, 40].iter().enumerate() {
            let mut resource = ResourceItemRequest::builder(format!("r{}", i), ResourceKind::Vocabulary)
                .build()
                .into_item();
            resource.created_at = Some(base - chrono::Duration::minutes(*minutes));
            ids.push(persistence.insert_resource(&resource).await.unwrap());
        }

        let first = manager.list_resources(1, 2).await.unwrap();
        assert_eq!(first.total, 5);
        assert_eq!(first.last_page, 3);
        let names: Vec<_> = first.items.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["r3", "r1"]);

        let last = manager.list_resources(3, 2).await.unwrap();
        assert_eq!(last.items.len(), 1);
        assert_eq!(last.items[0].name, "r4");
        assert!(manager.list_resources(4, 2).await.unwrap().items.is_empty());

        let clamped = manager.list_resources(0, 0).await.unwrap();
        assert_eq!((clamped.page, clamped.per_page), (1, 1));
        assert_eq!(clamped.items[0].name, "r3");

        for id in ids {
            persistence.delete_resource(id).await.unwrap();
        }
        let page = manager.list_resources(1, DEFAULT_RESOURCES_PER_PAGE).await.unwrap();
        assert_eq!((page.total, page.last_page), (0, 1));
    }

    #[tokio::test]
    async fn stats_reflect_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), 2).await;
        assert_eq!(manager.stats().await.unwrap().success_rate, 100.0);

        let id = manager
            .submit(ImportTaskRequest::builder(TaskType::BatchProcess, "batch").build())
            .await
            .unwrap();
        manager.wait_for_task(id).await.unwrap();
        assert_eq!(manager.stats().await.unwrap().success_rate, 0.0);
    }
}
