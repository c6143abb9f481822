use crate::error::ImportError;
use crate::stats::format_bytes;
use crate::status::BackupStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 一次数据库快照的元数据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseBackup {
    pub id: u32,
    pub filename: String,
    /// 相对存储根目录的路径
    pub filepath: String,
    pub description: Option<String>,
    pub file_size: u64,
    pub file_size_human: Option<String>,
    pub tables_count: u32,
    pub database_name: String,
    pub database_driver: String,
    pub status: BackupStatus,
    pub backup_started_at: Option<DateTime<Utc>>,
    pub backup_completed_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
}

impl DatabaseBackup {
    pub fn new(
        filename: impl Into<String>,
        filepath: impl Into<String>,
        description: Option<String>,
        database_name: impl Into<String>,
        database_driver: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            filename: filename.into(),
            filepath: filepath.into(),
            description,
            file_size: 0,
            file_size_human: None,
            tables_count: 0,
            database_name: database_name.into(),
            database_driver: database_driver.into(),
            status: BackupStatus::Creating,
            backup_started_at: Some(now),
            backup_completed_at: None,
            created_at: Some(now),
        }
    }

    pub fn mark_completed(&mut self, file_size: u64, tables_count: u32) -> Result<(), ImportError> {
        self.status = self.status.transition(BackupStatus::Completed)?;
        self.file_size = file_size;
        self.file_size_human = Some(format_bytes(file_size));
        self.tables_count = tables_count;
        self.backup_completed_at = Some(Utc::now());
        Ok(())
    }

    /// 失败原因只写日志，不落库
    pub fn mark_failed(&mut self) -> Result<(), ImportError> {
        self.status = self.status.transition(BackupStatus::Failed)?;
        self.backup_completed_at = Some(Utc::now());
        Ok(())
    }

    /// 开始到完成的耗时，精确到秒
    pub fn duration(&self) -> Option<Duration> {
        let started = self.backup_started_at?;
        let completed = self.backup_completed_at?;
        let secs = (completed - started).num_seconds().max(0) as u64;
        Some(Duration::from_secs(secs))
    }

    pub fn duration_human(&self) -> String {
        self.duration()
            .map(|d| humantime::format_duration(d).to_string())
            .unwrap_or_default()
    }
}
