use crate::error::ImportError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 导入任务状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// 状态迁移表，failed -> running 为自动重试，failed -> pending 为手动重试
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Running | Cancelled | Failed)
                | (Running, Completed | Failed | Paused | Cancelled)
                | (Paused, Running | Cancelled | Failed)
                | (Failed, Failed | Running | Pending)
        )
    }

    pub fn transition(self, next: TaskStatus) -> Result<TaskStatus, ImportError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(ImportError::invalid_transition(self, next))
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// 执行器持有任务期间的状态
    pub fn is_active(self) -> bool {
        matches!(self, TaskStatus::Running | TaskStatus::Paused)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = ImportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "paused" => Ok(TaskStatus::Paused),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(ImportError::Parse(format!("unknown task status '{}'", other))),
        }
    }
}

/// 资源状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    Pending,
    Downloading,
    Processing,
    Completed,
    Error,
}

impl ResourceStatus {
    pub fn can_transition_to(self, next: ResourceStatus) -> bool {
        use ResourceStatus::*;
        matches!(
            (self, next),
            (Pending, Downloading | Processing | Completed | Error)
                | (Downloading, Processing | Completed | Error)
                | (Processing, Completed | Error)
        )
    }

    pub fn transition(self, next: ResourceStatus) -> Result<ResourceStatus, ImportError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(ImportError::invalid_transition(self, next))
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ResourceStatus::Completed | ResourceStatus::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceStatus::Pending => "pending",
            ResourceStatus::Downloading => "downloading",
            ResourceStatus::Processing => "processing",
            ResourceStatus::Completed => "completed",
            ResourceStatus::Error => "error",
        }
    }

    /// 状态显示文本
    pub fn label(self) -> &'static str {
        match self {
            ResourceStatus::Pending => "Waiting",
            ResourceStatus::Downloading => "Downloading",
            ResourceStatus::Processing => "Processing",
            ResourceStatus::Completed => "Completed",
            ResourceStatus::Error => "Error",
        }
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ResourceStatus {
    type Err = ImportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ResourceStatus::Pending),
            "downloading" => Ok(ResourceStatus::Downloading),
            "processing" => Ok(ResourceStatus::Processing),
            "completed" => Ok(ResourceStatus::Completed),
            "error" => Ok(ResourceStatus::Error),
            other => Err(ImportError::Parse(format!(
                "unknown resource status '{}'",
                other
            ))),
        }
    }
}

/// 数据库备份状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupStatus {
    Creating,
    Completed,
    Failed,
}

impl BackupStatus {
    pub fn can_transition_to(self, next: BackupStatus) -> bool {
        matches!(
            (self, next),
            (BackupStatus::Creating, BackupStatus::Completed | BackupStatus::Failed)
        )
    }

    pub fn transition(self, next: BackupStatus) -> Result<BackupStatus, ImportError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(ImportError::invalid_transition(self, next))
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BackupStatus::Creating => "creating",
            BackupStatus::Completed => "completed",
            BackupStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BackupStatus {
    type Err = ImportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "creating" => Ok(BackupStatus::Creating),
            "completed" => Ok(BackupStatus::Completed),
            "failed" => Ok(BackupStatus::Failed),
            other => Err(ImportError::Parse(format!("unknown backup status '{}'", other))),
        }
    }
}
