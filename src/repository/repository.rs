use crate::error::ImportError;
use crate::repository::models::{DBDatabaseBackup, DBImportTask, DBResourceItem, DBTaskLog};
use async_trait::async_trait;

#[async_trait]
pub trait ImportRepository: Send + Sync {
    // 任务
    async fn load_tasks(&self) -> Result<Vec<DBImportTask>, ImportError>;
    async fn load_task(&self, task_id: u32) -> Result<Option<DBImportTask>, ImportError>;
    /// 插入新任务，忽略 `task.id`，返回分配的 id
    async fn insert_task(&self, task: &DBImportTask) -> Result<u32, ImportError>;
    async fn save_task(&self, task: &DBImportTask) -> Result<(), ImportError>;
    /// 删除任务及其日志、资源记录
    async fn delete_task(&self, task_id: u32) -> Result<(), ImportError>;

    // 日志，只追加
    async fn append_log(&self, task_id: u32, line: &str) -> Result<(), ImportError>;
    async fn load_logs(&self, task_id: u32) -> Result<Vec<DBTaskLog>, ImportError>;

    // 资源
    async fn insert_resource(&self, resource: &DBResourceItem) -> Result<u32, ImportError>;
    async fn save_resource(&self, resource: &DBResourceItem) -> Result<(), ImportError>;
    async fn load_resource(&self, resource_id: u32)
    -> Result<Option<DBResourceItem>, ImportError>;
    async fn load_resources(&self, task_id: u32) -> Result<Vec<DBResourceItem>, ImportError>;
    async fn load_all_resources(&self) -> Result<Vec<DBResourceItem>, ImportError>;
    async fn delete_resource(&self, resource_id: u32) -> Result<(), ImportError>;

    // 备份记录
    async fn insert_backup(&self, backup: &DBDatabaseBackup) -> Result<u32, ImportError>;
    async fn save_backup(&self, backup: &DBDatabaseBackup) -> Result<(), ImportError>;
    async fn load_backup_by_filename(
        &self,
        filename: &str,
    ) -> Result<Option<DBDatabaseBackup>, ImportError>;
    /// 按创建时间倒序
    async fn load_backups(&self) -> Result<Vec<DBDatabaseBackup>, ImportError>;
    async fn delete_backup(&self, backup_id: u32) -> Result<(), ImportError>;
}
