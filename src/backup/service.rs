use crate::backup::database::{DatabaseClient, SqlxDatabaseClient};
use crate::backup::dump::{CommandDumper, DatabaseDumper};
use crate::backup::record::DatabaseBackup;
use crate::config::{BackupConfig, DatabaseConfig, ImportConfig};
use crate::error::ImportError;
use crate::persistence::PersistenceManager;
use crate::stats::format_bytes;
use crate::status::BackupStatus;
use crate::storage::LocalStorage;
use chrono::Local;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// 管理端操作的统一返回结构，失败不抛错
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceResponse<T> {
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
}

impl<T> ServiceResponse<T> {
    pub fn ok(message: impl Into<String>, data: Option<T>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupDownload {
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
    pub content: Vec<u8>,
}

pub struct BackupService {
    backup: BackupConfig,
    database: DatabaseConfig,
    storage: LocalStorage,
    persistence: Arc<PersistenceManager>,
    dumper: Arc<dyn DatabaseDumper>,
    client: Arc<dyn DatabaseClient>,
}

impl BackupService {
    pub fn new(config: &ImportConfig, persistence: Arc<PersistenceManager>) -> Result<Self, ImportError> {
        let client = SqlxDatabaseClient::new(&config.database)?;
        Ok(Self::with_parts(
            config,
            persistence,
            Arc::new(CommandDumper::new(config.backup.clone())),
            Arc::new(client),
        ))
    }

    pub fn with_parts(
        config: &ImportConfig,
        persistence: Arc<PersistenceManager>,
        dumper: Arc<dyn DatabaseDumper>,
        client: Arc<dyn DatabaseClient>,
    ) -> Self {
        Self {
            backup: config.backup.clone(),
            database: config.database.clone(),
            storage: LocalStorage::new(&config.storage_dir),
            persistence,
            dumper,
            client,
        }
    }

    /// 生成新的备份文件名，精确到微秒
    fn next_filename() -> String {
        format!("backup_{}.sql", Local::now().format("%Y-%m-%d_%H-%M-%S-%6f"))
    }

    fn relative_path(&self, filename: &str) -> String {
        self.backup
            .path
            .join(filename)
            .to_string_lossy()
            .replace('\\', "/")
    }

    //------------------------------------------------------------------------------------------

    pub async fn backup(&self, description: Option<&str>) -> ServiceResponse<DatabaseBackup> {
        let filename = Self::next_filename();
        let mut record = DatabaseBackup::new(
            filename.clone(),
            self.relative_path(&filename),
            description.map(str::to_string),
            self.database.database.clone(),
            self.database.driver.clone(),
        );

        match self.persistence.insert_backup(&record).await {
            Ok(id) => record.id = id,
            Err(e) => {
                error!("[Backup] Failed to create backup record: {}", e);
                return ServiceResponse::fail(format!("Database backup failed: {}", e));
            }
        }
        info!("[Backup] Creating {}", filename);

        match self.run_backup(&mut record).await {
            Ok(()) => {
                info!(
                    "[Backup] {} completed: {} ({} tables) in {}",
                    record.filename,
                    bytesize::ByteSize(record.file_size),
                    record.tables_count,
                    record.duration_human()
                );
                if let Err(e) = self.cleanup_old_backups().await {
                    error!("[Backup] Cleanup of old backups failed: {}", e);
                }
                ServiceResponse::ok("Database backup succeeded", Some(record))
            }
            Err(e) => {
                error!("[Backup] {} failed: {}", record.filename, e);
                if let Err(rm_err) = self.storage.delete(&record.filepath).await {
                    warn!("[Backup] Failed to remove partial file {}: {}", record.filepath, rm_err);
                }
                if record.status == BackupStatus::Creating {
                    if let Err(mark_err) = record.mark_failed() {
                        warn!("[Backup] {}", mark_err);
                    }
                }
                if let Err(save_err) = self.persistence.save_backup(&record).await {
                    error!("[Backup] Failed to record failure of {}: {}", record.filename, save_err);
                }
                ServiceResponse::fail(format!("Database backup failed: {}", e))
            }
        }
    }

    async fn run_backup(&self, record: &mut DatabaseBackup) -> Result<(), ImportError> {
        let payload = self.dumper.dump(&self.database).await?;
        self.storage.put(&record.filepath, &payload).await?;
        let size = self.storage.size(&record.filepath).await?;
        let tables = self.client.tables_count().await?;

        let mut completed = record.clone();
        completed.mark_completed(size, tables)?;
        self.persistence.save_backup(&completed).await?;
        *record = completed;
        Ok(())
    }

    /// 只保留最新的 max_backups 个已完成备份，返回删除数量
    pub async fn cleanup_old_backups(&self) -> Result<usize, ImportError> {
        let completed: Vec<DatabaseBackup> = self
            .persistence
            .load_backups()
            .await?
            .into_iter()
            .filter(|b| b.status == BackupStatus::Completed)
            .collect();

        let mut removed = 0;
        for backup in completed.iter().skip(self.backup.max_backups) {
            if !self.storage.delete(&backup.filepath).await? {
                warn!("[Backup] File of {} already missing", backup.filename);
            }
            self.persistence.delete_backup(backup.id).await?;
            info!("[Backup] Removed old backup {}", backup.filename);
            removed += 1;
        }
        Ok(removed)
    }

    /// 原样执行备份中的 SQL，没有事务和回滚
    pub async fn restore(&self, filename: &str) -> ServiceResponse<()> {
        let record = match self.lookup(filename).await {
            Ok(record) => record,
            Err(response) => return response,
        };

        let result = async {
            let sql = self.storage.get_string(&record.filepath).await?;
            self.client.execute_script(&sql).await
        }
        .await;

        match result {
            Ok(()) => {
                info!("[Backup] Restored database from {}", filename);
                ServiceResponse::ok("Database restored successfully", None)
            }
            Err(e) => {
                error!("[Backup] Restore from {} failed: {}", filename, e);
                ServiceResponse::fail(format!("Database restore failed: {}", e))
            }
        }
    }

    pub async fn download_backup(&self, filename: &str) -> ServiceResponse<BackupDownload> {
        let record = match self.lookup(filename).await {
            Ok(record) => record,
            Err(response) => return response,
        };

        let result = async {
            let content = self.storage.get(&record.filepath).await?;
            Ok::<_, ImportError>(BackupDownload {
                filename: record.filename.clone(),
                path: self.storage.path(&record.filepath)?,
                size: content.len() as u64,
                content,
            })
        }
        .await;

        match result {
            Ok(download) => ServiceResponse::ok("Backup file ready", Some(download)),
            Err(e) => {
                error!("[Backup] Download of {} failed: {}", filename, e);
                ServiceResponse::fail(format!("Backup download failed: {}", e))
            }
        }
    }

    pub async fn delete_backup(&self, filename: &str) -> ServiceResponse<()> {
        let record = match self.lookup(filename).await {
            Ok(record) => record,
            Err(response) => return response,
        };

        let result = async {
            self.storage.delete(&record.filepath).await?;
            self.persistence.delete_backup(record.id).await
        }
        .await;

        match result {
            Ok(()) => {
                info!("[Backup] Deleted {}", filename);
                ServiceResponse::ok("Backup deleted successfully", None)
            }
            Err(e) => {
                error!("[Backup] Delete of {} failed: {}", filename, e);
                ServiceResponse::fail(format!("Backup delete failed: {}", e))
            }
        }
    }

    /// 按创建时间倒序
    pub async fn list_backups(&self) -> ServiceResponse<Vec<DatabaseBackup>> {
        match self.persistence.load_backups().await {
            Ok(mut backups) => {
                for backup in backups.iter_mut() {
                    if backup.file_size_human.is_none() && backup.file_size > 0 {
                        backup.file_size_human = Some(format_bytes(backup.file_size));
                    }
                }
                ServiceResponse::ok(format!("{} backups", backups.len()), Some(backups))
            }
            Err(e) => {
                error!("[Backup] Failed to list backups: {}", e);
                ServiceResponse::fail(format!("Failed to list backups: {}", e))
            }
        }
    }

    /// 记录与文件都存在才返回
    async fn lookup<T>(&self, filename: &str) -> Result<DatabaseBackup, ServiceResponse<T>> {
        let record = match self.persistence.load_backup(filename).await {
            Ok(Some(record)) => record,
            Ok(None) => return Err(ServiceResponse::fail("Backup record not found")),
            Err(e) => {
                error!("[Backup] Failed to load record {}: {}", filename, e);
                return Err(ServiceResponse::fail(format!("Failed to load backup: {}", e)));
            }
        };

        match self.storage.exists(&record.filepath).await {
            Ok(true) => Ok(record),
            Ok(false) => Err(ServiceResponse::fail("Backup file not found")),
            Err(e) => Err(ServiceResponse::fail(format!("Failed to load backup: {}", e))),
        }
    }
}
