use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DBImportTask {
    pub id: u32,
    pub task_type: String, // web-scraping / file-upload / api-import / batch-process / video-extraction
    pub name: String,
    pub status: String, // pending / running / paused / completed / failed / cancelled
    pub progress: f64,
    pub total_items: u64,
    pub items_processed: u64,
    pub config: String, // JSON
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DBTaskLog {
    pub id: u32,
    pub task_id: u32,
    pub line: String,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DBResourceItem {
    pub id: u32,
    pub task_id: Option<u32>,
    pub name: String,
    pub kind: String, // course / material / vocabulary / audio / video
    pub source: Option<String>,
    pub status: String, // pending / downloading / processing / completed / error
    pub progress: f64,
    pub file_path: Option<String>,
    pub file_size: Option<u64>,
    pub content: Option<String>,
    pub metadata: String, // JSON
    pub count: u64,
    pub error_message: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DBDatabaseBackup {
    pub id: u32,
    pub filename: String,
    pub filepath: String,
    pub description: Option<String>,
    pub file_size: u64,
    pub file_size_human: Option<String>,
    pub tables_count: u32,
    pub database_name: String,
    pub database_driver: String,
    pub status: String, // creating / completed / failed
    pub backup_started_at: Option<DateTime<Utc>>,
    pub backup_completed_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
}
