use crate::backup::DatabaseBackup;
use crate::config::ImportConfig;
use crate::error::ImportError;
use crate::repository::models::{DBDatabaseBackup, DBImportTask, DBResourceItem};
use crate::repository::{ImportRepository, MemoryRepository, SqliteRepository};
use crate::resource::ResourceItem;
use crate::task::TaskSnapshot;

use log::warn;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PersistenceType {
    Memory,
    Sqlite(PathBuf),
}

pub struct PersistenceManager {
    repository: Arc<dyn ImportRepository>,
}

impl PersistenceManager {
    pub async fn new(config: &ImportConfig) -> Result<Self, ImportError> {
        let repository: Arc<dyn ImportRepository> = match &config.persistence_type {
            PersistenceType::Memory => Arc::new(MemoryRepository::new()),
            PersistenceType::Sqlite(path) => Arc::new(SqliteRepository::new(path).await?),
        };
        Ok(Self { repository })
    }

    pub fn with_repository(repository: Arc<dyn ImportRepository>) -> Self {
        Self { repository }
    }

    /// 内存存储，测试与一次性命令使用
    pub fn in_memory() -> Self {
        Self::with_repository(Arc::new(MemoryRepository::new()))
    }

    pub fn repository(&self) -> Arc<dyn ImportRepository> {
        Arc::clone(&self.repository)
    }

    //------------------------------------------------------------------------------------------
    /// 新建任务记录，返回分配的 id
    pub async fn insert_task(&self, task: &TaskSnapshot) -> Result<u32, ImportError> {
        let db_task = self.task_to_db(task)?;
        self.repository.insert_task(&db_task).await
    }

    pub async fn save_task(&self, task: &TaskSnapshot) -> Result<(), ImportError> {
        let db_task = self.task_to_db(task)?;
        self.repository.save_task(&db_task).await
    }

    /// 加载单个 Task（含日志）
    pub async fn load_task(&self, task_id: u32) -> Result<Option<TaskSnapshot>, ImportError> {
        match self.repository.load_task(task_id).await? {
            Some(db_task) => {
                let logs = self.load_logs(task_id).await?;
                Ok(Some(self.db_to_task(db_task, logs)?))
            }
            None => Ok(None),
        }
    }

    /// 加载所有 Task，无法解析的记录跳过
    pub async fn load_tasks(&self) -> Result<Vec<TaskSnapshot>, ImportError> {
        let mut tasks = Vec::new();
        for db_task in self.repository.load_tasks().await? {
            let id = db_task.id;
            let logs = self.load_logs(id).await?;
            match self.db_to_task(db_task, logs) {
                Ok(task) => tasks.push(task),
                Err(e) => warn!("[Task {}] Skipping unreadable record: {}", id, e),
            }
        }
        Ok(tasks)
    }

    pub async fn delete_task(&self, task_id: u32) -> Result<(), ImportError> {
        self.repository.delete_task(task_id).await
    }

    //------------------------------------------------------------------------------------------
    pub async fn append_log(&self, task_id: u32, line: &str) -> Result<(), ImportError> {
        self.repository.append_log(task_id, line).await
    }

    pub async fn load_logs(&self, task_id: u32) -> Result<Vec<String>, ImportError> {
        Ok(self
            .repository
            .load_logs(task_id)
            .await?
            .into_iter()
            .map(|l| l.line)
            .collect())
    }

    //------------------------------------------------------------------------------------------
    pub async fn insert_resource(&self, resource: &ResourceItem) -> Result<u32, ImportError> {
        let db_resource = self.resource_to_db(resource)?;
        self.repository.insert_resource(&db_resource).await
    }

    pub async fn save_resource(&self, resource: &ResourceItem) -> Result<(), ImportError> {
        let db_resource = self.resource_to_db(resource)?;
        self.repository.save_resource(&db_resource).await
    }

    pub async fn load_resource(&self, resource_id: u32) -> Result<Option<ResourceItem>, ImportError> {
        self.repository
            .load_resource(resource_id)
            .await?
            .map(|r| self.db_to_resource(r))
            .transpose()
    }

    pub async fn load_resources(&self, task_id: u32) -> Result<Vec<ResourceItem>, ImportError> {
        self.repository
            .load_resources(task_id)
            .await?
            .into_iter()
            .map(|r| self.db_to_resource(r))
            .collect()
    }

    pub async fn load_all_resources(&self) -> Result<Vec<ResourceItem>, ImportError> {
        self.repository
            .load_all_resources()
            .await?
            .into_iter()
            .map(|r| self.db_to_resource(r))
            .collect()
    }

    pub async fn delete_resource(&self, resource_id: u32) -> Result<(), ImportError> {
        self.repository.delete_resource(resource_id).await
    }

    //------------------------------------------------------------------------------------------
    pub async fn insert_backup(&self, backup: &DatabaseBackup) -> Result<u32, ImportError> {
        self.repository.insert_backup(&self.backup_to_db(backup)).await
    }

    pub async fn save_backup(&self, backup: &DatabaseBackup) -> Result<(), ImportError> {
        self.repository.save_backup(&self.backup_to_db(backup)).await
    }

    pub async fn load_backup(&self, filename: &str) -> Result<Option<DatabaseBackup>, ImportError> {
        self.repository
            .load_backup_by_filename(filename)
            .await?
            .map(|b| self.db_to_backup(b))
            .transpose()
    }

    /// 按创建时间倒序
    pub async fn load_backups(&self) -> Result<Vec<DatabaseBackup>, ImportError> {
        self.repository
            .load_backups()
            .await?
            .into_iter()
            .map(|b| self.db_to_backup(b))
            .collect()
    }

    pub async fn delete_backup(&self, backup_id: u32) -> Result<(), ImportError> {
        self.repository.delete_backup(backup_id).await
    }

    //------------------------------------------------------------------------------------------

    /// 转换 TaskSnapshot -> DBImportTask
    fn task_to_db(&self, task: &TaskSnapshot) -> Result<DBImportTask, ImportError> {
        Ok(DBImportTask {
            id: task.id,
            task_type: task.task_type.to_string(),
            name: task.name.clone(),
            status: task.status.to_string(),
            progress: task.progress,
            total_items: task.total_items,
            items_processed: task.items_processed,
            config: serde_json::to_string(&task.config)?,
            error_message: task.error_message.clone(),
            started_at: task.started_at,
            completed_at: task.completed_at,
            created_at: task.created_at,
            updated_at: task.updated_at,
        })
    }

    /// DBImportTask -> TaskSnapshot
    fn db_to_task(
        &self,
        model: DBImportTask,
        logs: Vec<String>,
    ) -> Result<TaskSnapshot, ImportError> {
        Ok(TaskSnapshot {
            id: model.id,
            task_type: model.task_type.parse()?,
            name: model.name,
            status: model.status.parse()?,
            progress: model.progress,
            total_items: model.total_items,
            items_processed: model.items_processed,
            config: serde_json::from_str(&model.config)?,
            logs,
            error_message: model.error_message,
            started_at: model.started_at,
            completed_at: model.completed_at,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }

    /// 转换 ResourceItem -> DBResourceItem
    fn resource_to_db(&self, resource: &ResourceItem) -> Result<DBResourceItem, ImportError> {
        Ok(DBResourceItem {
            id: resource.id,
            task_id: resource.task_id,
            name: resource.name.clone(),
            kind: resource.kind.to_string(),
            source: resource.source.clone(),
            status: resource.status.to_string(),
            progress: resource.progress,
            file_path: resource.file_path.clone(),
            file_size: resource.file_size,
            content: resource.content.clone(),
            metadata: serde_json::to_string(&resource.metadata)?,
            count: resource.count,
            error_message: resource.error_message.clone(),
            created_at: resource.created_at,
            updated_at: resource.updated_at,
        })
    }

    /// DBResourceItem -> ResourceItem
    fn db_to_resource(&self, model: DBResourceItem) -> Result<ResourceItem, ImportError> {
        Ok(ResourceItem {
            id: model.id,
            task_id: model.task_id,
            name: model.name,
            kind: model.kind.parse()?,
            source: model.source,
            status: model.status.parse()?,
            progress: model.progress,
            file_path: model.file_path,
            file_size: model.file_size,
            content: model.content,
            metadata: serde_json::from_str(&model.metadata)?,
            count: model.count,
            error_message: model.error_message,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }

    /// 转换 DatabaseBackup -> DBDatabaseBackup
    fn backup_to_db(&self, backup: &DatabaseBackup) -> DBDatabaseBackup {
        DBDatabaseBackup {
            id: backup.id,
            filename: backup.filename.clone(),
            filepath: backup.filepath.clone(),
            description: backup.description.clone(),
            file_size: backup.file_size,
            file_size_human: backup.file_size_human.clone(),
            tables_count: backup.tables_count,
            database_name: backup.database_name.clone(),
            database_driver: backup.database_driver.clone(),
            status: backup.status.to_string(),
            backup_started_at: backup.backup_started_at,
            backup_completed_at: backup.backup_completed_at,
            created_at: backup.created_at,
        }
    }

    /// DBDatabaseBackup -> DatabaseBackup
    fn db_to_backup(&self, model: DBDatabaseBackup) -> Result<DatabaseBackup, ImportError> {
        Ok(DatabaseBackup {
            id: model.id,
            filename: model.filename,
            filepath: model.filepath,
            description: model.description,
            file_size: model.file_size,
            file_size_human: model.file_size_human,
            tables_count: model.tables_count,
            database_name: model.database_name,
            database_driver: model.database_driver,
            status: model.status.parse()?,
            backup_started_at: model.backup_started_at,
            backup_completed_at: model.backup_completed_at,
            created_at: model.created_at,
        })
    }
}

impl Clone for PersistenceManager {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
        }
    }
}
