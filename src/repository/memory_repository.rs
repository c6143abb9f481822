use super::repository::ImportRepository;
use crate::ImportError;
use crate::repository::models::{DBDatabaseBackup, DBImportTask, DBResourceItem, DBTaskLog};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::RwLock;

/// 进程内存储，进程退出即丢失
#[derive(Default)]
pub struct MemoryRepository {
    tasks: Arc<RwLock<HashMap<u32, DBImportTask>>>,
    logs: Arc<RwLock<Vec<DBTaskLog>>>,
    resources: Arc<RwLock<HashMap<u32, DBResourceItem>>>,
    backups: Arc<RwLock<HashMap<u32, DBDatabaseBackup>>>,

    next_task_id: AtomicU32,
    next_log_id: AtomicU32,
    next_resource_id: AtomicU32,
    next_backup_id: AtomicU32,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(counter: &AtomicU32) -> u32 {
        counter.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl ImportRepository for MemoryRepository {
    // ---------------- Task ----------------
    async fn load_tasks(&self) -> Result<Vec<DBImportTask>, ImportError> {
        let mut tasks: Vec<_> = self.tasks.read().await.values().cloned().collect();
        tasks.sort_by_key(|t| t.id);
        Ok(tasks)
    }

    async fn load_task(&self, task_id: u32) -> Result<Option<DBImportTask>, ImportError> {
        Ok(self.tasks.read().await.get(&task_id).cloned())
    }

    async fn insert_task(&self, task: &DBImportTask) -> Result<u32, ImportError> {
        let id = Self::next_id(&self.next_task_id);
        let now = Utc::now();
        let mut row = task.clone();
        row.id = id;
        row.created_at = Some(row.created_at.unwrap_or(now));
        row.updated_at = Some(now);
        self.tasks.write().await.insert(id, row);
        Ok(id)
    }

    async fn save_task(&self, task: &DBImportTask) -> Result<(), ImportError> {
        let mut row = task.clone();
        row.updated_at = Some(Utc::now());
        self.tasks.write().await.insert(task.id, row);
        Ok(())
    }

    async fn delete_task(&self, task_id: u32) -> Result<(), ImportError> {
        self.tasks.write().await.remove(&task_id);

        // 删除关联日志
        self.logs.write().await.retain(|l| l.task_id != task_id);

        // 删除关联资源
        self.resources
            .write()
            .await
            .retain(|_, r| r.task_id != Some(task_id));

        Ok(())
    }

    // ---------------- Log ----------------
    async fn append_log(&self, task_id: u32, line: &str) -> Result<(), ImportError> {
        let log = DBTaskLog {
            id: Self::next_id(&self.next_log_id),
            task_id,
            line: line.to_string(),
            created_at: Some(Utc::now()),
        };
        self.logs.write().await.push(log);
        Ok(())
    }

    async fn load_logs(&self, task_id: u32) -> Result<Vec<DBTaskLog>, ImportError> {
        Ok(self
            .logs
            .read()
            .await
            .iter()
            .filter(|l| l.task_id == task_id)
            .cloned()
            .collect())
    }

    // ---------------- Resource ----------------
    async fn insert_resource(&self, resource: &DBResourceItem) -> Result<u32, ImportError> {
        let id = Self::next_id(&self.next_resource_id);
        let now = Utc::now();
        let mut row = resource.clone();
        row.id = id;
        row.created_at = Some(row.created_at.unwrap_or(now));
        row.updated_at = Some(now);
        self.resources.write().await.insert(id, row);
        Ok(id)
    }

    async fn save_resource(&self, resource: &DBResourceItem) -> Result<(), ImportError> {
        let mut row = resource.clone();
        row.updated_at = Some(Utc::now());
        self.resources.write().await.insert(resource.id, row);
        Ok(())
    }

    async fn load_resource(
        &self,
        resource_id: u32,
    ) -> Result<Option<DBResourceItem>, ImportError> {
        Ok(self.resources.read().await.get(&resource_id).cloned())
    }

    async fn load_resources(&self, task_id: u32) -> Result<Vec<DBResourceItem>, ImportError> {
        let mut resources: Vec<_> = self
            .resources
            .read()
            .await
            .values()
            .filter(|r| r.task_id == Some(task_id))
            .cloned()
            .collect();
        resources.sort_by_key(|r| r.id);
        Ok(resources)
    }

    async fn load_all_resources(&self) -> Result<Vec<DBResourceItem>, ImportError> {
        let mut resources: Vec<_> = self.resources.read().await.values().cloned().collect();
        resources.sort_by_key(|r| r.id);
        Ok(resources)
    }

    async fn delete_resource(&self, resource_id: u32) -> Result<(), ImportError> {
        self.resources.write().await.remove(&resource_id);
        Ok(())
    }

    // ---------------- Backup ----------------
    async fn insert_backup(&self, backup: &DBDatabaseBackup) -> Result<u32, ImportError> {
        let mut backups = self.backups.write().await;
        if backups.values().any(|b| b.filename == backup.filename) {
            return Err(ImportError::Database(format!(
                "backup filename '{}' already exists",
                backup.filename
            )));
        }

        let id = Self::next_id(&self.next_backup_id);
        let mut row = backup.clone();
        row.id = id;
        row.created_at = Some(row.created_at.unwrap_or_else(Utc::now));
        backups.insert(id, row);
        Ok(id)
    }

    async fn save_backup(&self, backup: &DBDatabaseBackup) -> Result<(), ImportError> {
        self.backups.write().await.insert(backup.id, backup.clone());
        Ok(())
    }

    async fn load_backup_by_filename(
        &self,
        filename: &str,
    ) -> Result<Option<DBDatabaseBackup>, ImportError> {
        Ok(self
            .backups
            .read()
            .await
            .values()
            .find(|b| b.filename == filename)
            .cloned())
    }

    async fn load_backups(&self) -> Result<Vec<DBDatabaseBackup>, ImportError> {
        let mut backups: Vec<_> = self.backups.read().await.values().cloned().collect();
        backups.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(backups)
    }

    async fn delete_backup(&self, backup_id: u32) -> Result<(), ImportError> {
        self.backups.write().await.remove(&backup_id);
        Ok(())
    }
}
