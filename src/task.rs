use crate::error::ImportError;
use crate::events::TaskEvent;
use crate::persistence::PersistenceManager;
use crate::status::TaskStatus;
use chrono::{DateTime, Local, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast, watch};

/// 未完成任务的进度上限，100 只在完成时出现
pub const MAX_PENDING_PROGRESS: f64 = 99.0;

/// 导入任务类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    WebScraping,
    FileUpload,
    ApiImport,
    BatchProcess,
    VideoExtraction,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::WebScraping => "web-scraping",
            TaskType::FileUpload => "file-upload",
            TaskType::ApiImport => "api-import",
            TaskType::BatchProcess => "batch-process",
            TaskType::VideoExtraction => "video-extraction",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = ImportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "web-scraping" => Ok(TaskType::WebScraping),
            "file-upload" => Ok(TaskType::FileUpload),
            "api-import" => Ok(TaskType::ApiImport),
            "batch-process" => Ok(TaskType::BatchProcess),
            "video-extraction" => Ok(TaskType::VideoExtraction),
            other => Err(ImportError::UnsupportedTaskType(other.to_string())),
        }
    }
}

/// 任务记录的只读副本，用于持久化与展示
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: u32,
    pub task_type: TaskType,
    pub name: String,
    pub status: TaskStatus,
    pub progress: f64,
    pub total_items: u64,
    pub items_processed: u64,
    pub config: Value,
    pub logs: Vec<String>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl TaskSnapshot {
    /// 新建 pending 记录，id 由存储分配
    pub fn new(task_type: TaskType, name: impl Into<String>, config: Value, total_items: u64) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            task_type,
            name: name.into(),
            status: TaskStatus::Pending,
            progress: 0.0,
            total_items,
            items_processed: 0,
            config,
            logs: Vec::new(),
            error_message: None,
            started_at: None,
            completed_at: None,
            created_at: Some(now),
            updated_at: Some(now),
        }
    }
}

#[derive(Debug, Clone)]
struct TaskState {
    status: TaskStatus,
    progress: f64,
    total_items: u64,
    items_processed: u64,
    logs: Vec<String>,
    error_message: Option<String>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

pub struct ImportTask {
    pub id: u32,
    pub task_type: TaskType,
    pub name: String,
    pub config: Value,
    pub created_at: Option<DateTime<Utc>>,

    state: Mutex<TaskState>,
    status_tx: watch::Sender<TaskStatus>,
    persistence: Option<Arc<PersistenceManager>>,
    event_tx: Option<broadcast::Sender<TaskEvent>>,
}

impl ImportTask {
    pub fn from_snapshot(
        snapshot: TaskSnapshot,
        persistence: Option<Arc<PersistenceManager>>,
        event_tx: Option<broadcast::Sender<TaskEvent>>,
    ) -> Arc<Self> {
        let (status_tx, _) = watch::channel(snapshot.status);
        Arc::new(Self {
            id: snapshot.id,
            task_type: snapshot.task_type,
            name: snapshot.name,
            config: snapshot.config,
            created_at: snapshot.created_at,
            state: Mutex::new(TaskState {
                status: snapshot.status,
                progress: snapshot.progress,
                total_items: snapshot.total_items,
                items_processed: snapshot.items_processed,
                logs: snapshot.logs,
                error_message: snapshot.error_message,
                started_at: snapshot.started_at,
                completed_at: snapshot.completed_at,
                updated_at: snapshot.updated_at,
            }),
            status_tx,
            persistence,
            event_tx,
        })
    }

    /// 写入存储并分配 id
    pub async fn create(
        mut snapshot: TaskSnapshot,
        persistence: Arc<PersistenceManager>,
        event_tx: Option<broadcast::Sender<TaskEvent>>,
    ) -> Result<Arc<Self>, ImportError> {
        snapshot.id = persistence.insert_task(&snapshot).await?;
        debug!(
            "[Task {}] Created {} task '{}'",
            snapshot.id, snapshot.task_type, snapshot.name
        );
        let task = Self::from_snapshot(snapshot, Some(persistence), event_tx);
        task.emit(TaskEvent::Created(task.id));
        Ok(task)
    }

    pub fn status(&self) -> TaskStatus {
        *self.status_tx.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<TaskStatus> {
        self.status_tx.subscribe()
    }

    pub async fn snapshot(&self) -> TaskSnapshot {
        let state = self.state.lock().await;
        self.snapshot_of(&state)
    }

    pub async fn logs(&self) -> Vec<String> {
        self.state.lock().await.logs.clone()
    }

    //----------------------------------- mutators -----------------------------------------------

    pub async fn mark_started(&self) -> Result<(), ImportError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        self.commit_status(&mut state, TaskStatus::Running, |next| {
            next.started_at = Some(now);
            next.completed_at = None;
            next.updated_at = Some(now);
        })
        .await?;
        self.push_log(&mut state, "Task started").await?;

        info!("[Task {}] Started", self.id);
        self.emit(TaskEvent::Started(self.id));
        Ok(())
    }

    /// 覆盖已处理条数并重新计算进度，返回新的进度值
    pub async fn update_progress(&self, items_processed: Option<u64>) -> Result<f64, ImportError> {
        let mut state = self.state.lock().await;
        self.ensure_in_flight(&state, "progress")?;

        if let Some(items) = items_processed {
            state.items_processed = if state.total_items > 0 {
                items.min(state.total_items)
            } else {
                items
            };
        }

        state.progress = if state.total_items == 0 {
            0.0
        } else {
            let computed = state.items_processed as f64 / state.total_items as f64 * 100.0;
            computed.max(state.progress).min(MAX_PENDING_PROGRESS)
        };
        state.updated_at = Some(Utc::now());
        self.persist(&state).await?;

        debug!(
            "[Task {}] Progress: {}/{} ({:.2}%)",
            self.id, state.items_processed, state.total_items, state.progress
        );
        self.emit(TaskEvent::Progress {
            id: self.id,
            processed: state.items_processed,
            total: state.total_items,
            progress: state.progress,
        });
        Ok(state.progress)
    }

    /// 直接设置百分比进度，用于只报告百分比的外部进程
    pub async fn set_progress(&self, percent: f64) -> Result<f64, ImportError> {
        let mut state = self.state.lock().await;
        self.ensure_in_flight(&state, "progress")?;

        state.progress = percent
            .clamp(0.0, MAX_PENDING_PROGRESS)
            .max(state.progress);
        state.updated_at = Some(Utc::now());
        self.persist(&state).await?;

        self.emit(TaskEvent::Progress {
            id: self.id,
            processed: state.items_processed,
            total: state.total_items,
            progress: state.progress,
        });
        Ok(state.progress)
    }

    pub async fn set_total_items(&self, total_items: u64) -> Result<(), ImportError> {
        let mut state = self.state.lock().await;
        if state.status.is_terminal() {
            return Err(ImportError::invalid_transition(state.status, "total items update"));
        }
        state.total_items = total_items;
        if total_items > 0 && state.items_processed > total_items {
            state.items_processed = total_items;
        }
        state.updated_at = Some(Utc::now());
        self.persist(&state).await
    }

    pub async fn mark_completed(&self) -> Result<(), ImportError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        self.commit_status(&mut state, TaskStatus::Completed, |next| {
            next.progress = 100.0;
            next.completed_at = Some(now);
            next.updated_at = Some(now);
        })
        .await?;
        self.push_log(&mut state, "Task completed").await?;

        info!("[Task {}] Completed", self.id);
        self.emit(TaskEvent::Completed(self.id));
        Ok(())
    }

    /// 重复以相同信息标记失败时不做任何事
    pub async fn mark_failed(&self, message: Option<&str>) -> Result<(), ImportError> {
        let mut state = self.state.lock().await;
        if state.status == TaskStatus::Failed && state.error_message.as_deref() == message {
            debug!("[Task {}] Already failed with the same message", self.id);
            return Ok(());
        }

        let now = Utc::now();
        self.commit_status(&mut state, TaskStatus::Failed, |next| {
            next.completed_at = Some(now);
            next.updated_at = Some(now);
            next.error_message = message.map(str::to_string);
        })
        .await?;

        let reason = message.unwrap_or("unknown error");
        self.push_log(&mut state, &format!("Task failed: {}", reason))
            .await?;

        warn!("[Task {}] Failed: {}", self.id, reason);
        self.emit(TaskEvent::Failed(self.id, reason.to_string()));
        Ok(())
    }

    pub async fn add_log(&self, message: &str) -> Result<(), ImportError> {
        let mut state = self.state.lock().await;
        self.push_log(&mut state, message).await
    }

    pub async fn pause(&self) -> Result<(), ImportError> {
        self.pause_with("Task paused").await
    }

    /// 进程重启时仍处于 running 的任务恢复为 paused
    pub async fn mark_interrupted(&self) -> Result<(), ImportError> {
        self.pause_with("Task interrupted, restored as paused").await
    }

    pub async fn resume(&self) -> Result<(), ImportError> {
        let mut state = self.state.lock().await;
        if state.status != TaskStatus::Paused {
            return Err(ImportError::invalid_transition(state.status, "resume"));
        }
        self.commit_status(&mut state, TaskStatus::Running, |next| {
            next.updated_at = Some(Utc::now());
        })
        .await?;
        self.push_log(&mut state, "Task resumed").await?;

        debug!("[Task {}] Resumed", self.id);
        self.emit(TaskEvent::Resumed(self.id));
        Ok(())
    }

    pub async fn cancel(&self) -> Result<(), ImportError> {
        let mut state = self.state.lock().await;
        if matches!(state.status, TaskStatus::Completed | TaskStatus::Failed) {
            return Err(ImportError::invalid_transition(
                state.status,
                TaskStatus::Cancelled,
            ));
        }
        let now = Utc::now();
        self.commit_status(&mut state, TaskStatus::Cancelled, |next| {
            next.completed_at = Some(now);
            next.updated_at = Some(now);
        })
        .await?;
        self.push_log(&mut state, "Task cancelled").await?;

        info!("[Task {}] Cancelled", self.id);
        self.emit(TaskEvent::Canceled(self.id));
        Ok(())
    }

    /// failed -> pending，清空计数与错误信息
    pub async fn reset_for_retry(&self) -> Result<(), ImportError> {
        let mut state = self.state.lock().await;
        self.commit_status(&mut state, TaskStatus::Pending, |next| {
            next.progress = 0.0;
            next.items_processed = 0;
            next.error_message = None;
            next.started_at = None;
            next.completed_at = None;
            next.updated_at = Some(Utc::now());
        })
        .await?;
        self.push_log(&mut state, "Task queued for retry").await
    }

    /// 执行器在工作单元之间调用：暂停时等待，取消时返回 `Canceled`
    pub async fn checkpoint(&self) -> Result<(), ImportError> {
        let mut rx = self.status_tx.subscribe();
        let status = {
            let current = rx
                .wait_for(|s| *s != TaskStatus::Paused)
                .await
                .map_err(|_| ImportError::Other(format!("Task {} status channel closed", self.id)))?;
            *current
        };

        match status {
            TaskStatus::Cancelled => Err(ImportError::Canceled(self.id)),
            _ => Ok(()),
        }
    }

    //----------------------------------- internals ----------------------------------------------

    async fn pause_with(&self, message: &str) -> Result<(), ImportError> {
        let mut state = self.state.lock().await;
        self.commit_status(&mut state, TaskStatus::Paused, |next| {
            next.updated_at = Some(Utc::now());
        })
        .await?;
        self.push_log(&mut state, message).await?;

        debug!("[Task {}] Paused", self.id);
        self.emit(TaskEvent::Paused(self.id));
        Ok(())
    }

    fn ensure_in_flight(&self, state: &TaskState, action: &str) -> Result<(), ImportError> {
        match state.status {
            TaskStatus::Running | TaskStatus::Paused => Ok(()),
            TaskStatus::Cancelled => Err(ImportError::Canceled(self.id)),
            other => Err(ImportError::invalid_transition(other, action)),
        }
    }

    /// 在副本上迁移并落库，写入成功后才替换内存状态并广播
    async fn commit_status(
        &self,
        state: &mut TaskState,
        status: TaskStatus,
        apply: impl FnOnce(&mut TaskState),
    ) -> Result<(), ImportError> {
        let mut next = state.clone();
        next.status = state.status.transition(status)?;
        apply(&mut next);
        self.persist(&next).await?;
        *state = next;
        self.status_tx.send_replace(status);
        Ok(())
    }

    async fn push_log(&self, state: &mut TaskState, message: &str) -> Result<(), ImportError> {
        let line = format!("{} - {}", Local::now().format("%H:%M:%S"), message);
        if let Some(persistence) = self.persistence.as_ref() {
            persistence.append_log(self.id, &line).await?;
        }
        state.logs.push(line.clone());
        self.emit(TaskEvent::Log { id: self.id, line });
        Ok(())
    }

    async fn persist(&self, state: &TaskState) -> Result<(), ImportError> {
        if let Some(persistence) = self.persistence.as_ref() {
            if let Err(e) = persistence.save_task(&self.snapshot_of(state)).await {
                warn!("[Task {}] Failed to persist task: {}", self.id, e);
                return Err(e);
            }
        }
        Ok(())
    }

    fn snapshot_of(&self, state: &TaskState) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id,
            task_type: self.task_type,
            name: self.name.clone(),
            status: state.status,
            progress: state.progress,
            total_items: state.total_items,
            items_processed: state.items_processed,
            config: self.config.clone(),
            logs: state.logs.clone(),
            error_message: state.error_message.clone(),
            started_at: state.started_at,
            completed_at: state.completed_at,
            created_at: self.created_at,
            updated_at: state.updated_at,
        }
    }

    fn emit(&self, event: TaskEvent) {
        if let Some(tx) = self.event_tx.as_ref() {
            let _ = tx.send(event);
        }
    }
}

impl fmt::Debug for ImportTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImportTask")
            .field("id", &self.id)
            .field("task_type", &self.task_type)
            .field("name", &self.name)
            .field("status", &self.status())
            .field("config", &self.config)
            .field("created_at", &self.created_at)
            .finish()
    }
}
