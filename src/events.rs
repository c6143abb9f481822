use crate::status::TaskStatus;

#[derive(Debug, Clone)]
pub enum TaskEvent {
    Created(u32),
    Started(u32),
    Progress {
        id: u32,
        processed: u64,
        total: u64,
        progress: f64,
    },
    Log {
        id: u32,
        line: String,
    },
    Paused(u32),
    Resumed(u32),
    Completed(u32),
    Failed(u32, String),
    Canceled(u32),
    /// 执行器退出，并发名额已释放
    Finished {
        id: u32,
        status: TaskStatus,
    },
}

impl TaskEvent {
    pub fn task_id(&self) -> u32 {
        match self {
            TaskEvent::Created(id)
            | TaskEvent::Started(id)
            | TaskEvent::Paused(id)
            | TaskEvent::Resumed(id)
            | TaskEvent::Completed(id)
            | TaskEvent::Failed(id, _)
            | TaskEvent::Canceled(id) => *id,
            TaskEvent::Progress { id, .. }
            | TaskEvent::Log { id, .. }
            | TaskEvent::Finished { id, .. } => *id,
        }
    }
}
