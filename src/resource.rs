use crate::error::ImportError;
use crate::stats::format_bytes;
use crate::status::ResourceStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// 资源类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Course,
    Material,
    Vocabulary,
    Audio,
    Video,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Course => "course",
            ResourceKind::Material => "material",
            ResourceKind::Vocabulary => "vocabulary",
            ResourceKind::Audio => "audio",
            ResourceKind::Video => "video",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ResourceKind::Course => "Course",
            ResourceKind::Material => "Learning material",
            ResourceKind::Vocabulary => "Vocabulary",
            ResourceKind::Audio => "Audio",
            ResourceKind::Video => "Video",
        }
    }

    /// 按文件扩展名推断资源类型，无法识别的归为学习材料
    pub fn from_extension(name: &str) -> Self {
        let ext = name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "mp3" | "wav" | "m4a" | "aac" | "ogg" | "flac" => ResourceKind::Audio,
            "mp4" | "mkv" | "webm" | "mov" | "avi" => ResourceKind::Video,
            _ => ResourceKind::Material,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = ImportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "course" => Ok(ResourceKind::Course),
            "material" => Ok(ResourceKind::Material),
            "vocabulary" => Ok(ResourceKind::Vocabulary),
            "audio" => Ok(ResourceKind::Audio),
            "video" => Ok(ResourceKind::Video),
            other => Err(ImportError::Parse(format!("unknown resource kind '{}'", other))),
        }
    }
}

/// 任务产出的资源记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceItem {
    pub id: u32,
    pub task_id: Option<u32>,
    pub name: String,
    pub kind: ResourceKind,
    pub source: Option<String>,
    pub status: ResourceStatus,
    pub progress: f64,
    pub file_path: Option<String>,
    pub file_size: Option<u64>,
    pub content: Option<String>,
    pub metadata: Value,
    pub count: u64,
    pub error_message: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ResourceItem {
    pub fn new(task_id: Option<u32>, name: impl Into<String>, kind: ResourceKind) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            task_id,
            name: name.into(),
            kind,
            source: None,
            status: ResourceStatus::Pending,
            progress: 0.0,
            file_path: None,
            file_size: None,
            content: None,
            metadata: Value::Object(Default::default()),
            count: 0,
            error_message: None,
            created_at: Some(now),
            updated_at: Some(now),
        }
    }

    fn set_status(&mut self, next: ResourceStatus) -> Result<(), ImportError> {
        self.status = self.status.transition(next)?;
        self.updated_at = Some(Utc::now());
        Ok(())
    }

    pub fn mark_downloading(&mut self) -> Result<(), ImportError> {
        self.set_status(ResourceStatus::Downloading)
    }

    pub fn mark_processing(&mut self) -> Result<(), ImportError> {
        self.set_status(ResourceStatus::Processing)
    }

    pub fn mark_completed(&mut self) -> Result<(), ImportError> {
        self.set_status(ResourceStatus::Completed)?;
        self.progress = 100.0;
        Ok(())
    }

    pub fn mark_error(&mut self, message: impl Into<String>) -> Result<(), ImportError> {
        self.set_status(ResourceStatus::Error)?;
        self.error_message = Some(message.into());
        Ok(())
    }

    /// 进度限制在 [0, 100]，且不回退
    pub fn update_progress(&mut self, progress: f64) {
        if self.status.is_terminal() {
            return;
        }
        self.progress = progress.clamp(0.0, 100.0).max(self.progress);
        self.updated_at = Some(Utc::now());
    }

    pub fn readable_file_size(&self) -> String {
        match self.file_size {
            Some(size) if size > 0 => format_bytes(size),
            _ => "N/A".to_string(),
        }
    }

    pub fn status_label(&self) -> &'static str {
        self.status.label()
    }

    pub fn kind_label(&self) -> &'static str {
        self.kind.label()
    }
}
