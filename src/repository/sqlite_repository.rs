use crate::ImportError;
use crate::repository::models::{DBDatabaseBackup, DBImportTask, DBResourceItem, DBTaskLog};
use crate::repository::repository::ImportRepository;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::fs;
use std::path::Path;
use std::sync::Arc;

pub struct SqliteRepository {
    pool: Arc<SqlitePool>,
}

/// 时间统一以 RFC3339 文本存储
fn parse_time(row: &SqliteRow, column: &str) -> Option<DateTime<Utc>> {
    row.try_get::<Option<String>, _>(column)
        .ok()
        .flatten()
        .and_then(|s| {
            DateTime::parse_from_rfc3339(&s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        })
}

fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn format_time(dt: Option<DateTime<Utc>>) -> Option<String> {
    dt.map(timestamp)
}

fn row_to_task(row: &SqliteRow) -> DBImportTask {
    DBImportTask {
        id: row.get::<i64, _>("id") as u32,
        task_type: row.get("task_type"),
        name: row.get("name"),
        status: row.get("status"),
        progress: row.get("progress"),
        total_items: row.get::<i64, _>("total_items") as u64,
        items_processed: row.get::<i64, _>("items_processed") as u64,
        config: row.get("config"),
        error_message: row.get("error_message"),
        started_at: parse_time(row, "started_at"),
        completed_at: parse_time(row, "completed_at"),
        created_at: parse_time(row, "created_at"),
        updated_at: parse_time(row, "updated_at"),
    }
}

fn row_to_log(row: &SqliteRow) -> DBTaskLog {
    DBTaskLog {
        id: row.get::<i64, _>("id") as u32,
        task_id: row.get::<i64, _>("task_id") as u32,
        line: row.get("line"),
        created_at: parse_time(row, "created_at"),
    }
}

fn row_to_resource(row: &SqliteRow) -> DBResourceItem {
    DBResourceItem {
        id: row.get::<i64, _>("id") as u32,
        task_id: row
            .get::<Option<i64>, _>("task_id")
            .map(|v| v as u32),
        name: row.get("name"),
        kind: row.get("kind"),
        source: row.get("source"),
        status: row.get("status"),
        progress: row.get("progress"),
        file_path: row.get("file_path"),
        file_size: row.get::<Option<i64>, _>("file_size").map(|v| v as u64),
        content: row.get("content"),
        metadata: row.get("metadata"),
        count: row.get::<i64, _>("count") as u64,
        error_message: row.get("error_message"),
        created_at: parse_time(row, "created_at"),
        updated_at: parse_time(row, "updated_at"),
    }
}

fn row_to_backup(row: &SqliteRow) -> DBDatabaseBackup {
    DBDatabaseBackup {
        id: row.get::<i64, _>("id") as u32,
        filename: row.get("filename"),
        filepath: row.get("filepath"),
        description: row.get("description"),
        file_size: row.get::<i64, _>("file_size") as u64,
        file_size_human: row.get("file_size_human"),
        tables_count: row.get::<i64, _>("tables_count") as u32,
        database_name: row.get("database_name"),
        database_driver: row.get("database_driver"),
        status: row.get("status"),
        backup_started_at: parse_time(row, "backup_started_at"),
        backup_completed_at: parse_time(row, "backup_completed_at"),
        created_at: parse_time(row, "created_at"),
    }
}

impl SqliteRepository {
    pub async fn new(db_path: &Path) -> Result<Self, ImportError> {
        let cwd = std::env::current_dir()?;
        let db_abs = if db_path.is_absolute() {
            db_path.to_path_buf()
        } else {
            cwd.join(db_path)
        };

        if let Some(parent) = db_abs.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    ImportError::Io(format!("Failed to create directory {:?}: {}", parent, e))
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(&db_abs)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        // 创建表
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS import_tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_type TEXT NOT NULL,
                name TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                progress REAL NOT NULL DEFAULT 0,
                total_items INTEGER NOT NULL DEFAULT 0,
                items_processed INTEGER NOT NULL DEFAULT 0,
                config TEXT NOT NULL DEFAULT '{}',
                error_message TEXT,
                started_at TEXT,
                completed_at TEXT,
                created_at TEXT,
                updated_at TEXT
            );
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS task_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id INTEGER NOT NULL,
                line TEXT NOT NULL,
                created_at TEXT
            );
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_task_logs_task ON task_logs(task_id, id)")
            .execute(&pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS resource_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id INTEGER,                           -- 允许无归属任务
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                source TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                progress REAL NOT NULL DEFAULT 0,
                file_path TEXT,
                file_size INTEGER,
                content TEXT,
                metadata TEXT NOT NULL DEFAULT '{}',
                count INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                created_at TEXT,
                updated_at TEXT
            );
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS database_backups (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                filename TEXT UNIQUE NOT NULL,
                filepath TEXT NOT NULL,
                description TEXT,
                file_size INTEGER NOT NULL DEFAULT 0,
                file_size_human TEXT,
                tables_count INTEGER NOT NULL DEFAULT 0,
                database_name TEXT NOT NULL,
                database_driver TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'creating',
                backup_started_at TEXT,
                backup_completed_at TEXT,
                created_at TEXT
            );
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

#[async_trait]
impl ImportRepository for SqliteRepository {
    // ---------------- Task ----------------
    async fn load_tasks(&self) -> Result<Vec<DBImportTask>, ImportError> {
        let rows = sqlx::query("SELECT * FROM import_tasks ORDER BY id")
            .fetch_all(&*self.pool)
            .await?;
        Ok(rows.iter().map(row_to_task).collect())
    }

    async fn load_task(&self, task_id: u32) -> Result<Option<DBImportTask>, ImportError> {
        let row = sqlx::query("SELECT * FROM import_tasks WHERE id = ?1")
            .bind(task_id as i64)
            .fetch_optional(&*self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_task))
    }

    async fn insert_task(&self, task: &DBImportTask) -> Result<u32, ImportError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO import_tasks
                (task_type, name, status, progress, total_items, items_processed, config,
                 error_message, started_at, completed_at, created_at, updated_at)
            VALUES
                (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(&task.task_type)
        .bind(&task.name)
        .bind(&task.status)
        .bind(task.progress)
        .bind(task.total_items as i64)
        .bind(task.items_processed as i64)
        .bind(&task.config)
        .bind(&task.error_message)
        .bind(format_time(task.started_at))
        .bind(format_time(task.completed_at))
        .bind(format_time(Some(task.created_at.unwrap_or(now))))
        .bind(timestamp(now))
        .execute(&*self.pool)
        .await?;

        Ok(result.last_insert_rowid() as u32)
    }

    async fn save_task(&self, task: &DBImportTask) -> Result<(), ImportError> {
        sqlx::query(
            r#"
            INSERT INTO import_tasks
                (id, task_type, name, status, progress, total_items, items_processed, config,
                 error_message, started_at, completed_at, created_at, updated_at)
            VALUES
                (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ON CONFLICT(id) DO UPDATE SET
                status=excluded.status,
                progress=excluded.progress,
                total_items=excluded.total_items,
                items_processed=excluded.items_processed,
                config=excluded.config,
                error_message=excluded.error_message,
                started_at=excluded.started_at,
                completed_at=excluded.completed_at,
                updated_at=excluded.updated_at
            "#,
        )
        .bind(task.id as i64)
        .bind(&task.task_type)
        .bind(&task.name)
        .bind(&task.status)
        .bind(task.progress)
        .bind(task.total_items as i64)
        .bind(task.items_processed as i64)
        .bind(&task.config)
        .bind(&task.error_message)
        .bind(format_time(task.started_at))
        .bind(format_time(task.completed_at))
        .bind(format_time(task.created_at))
        .bind(timestamp(Utc::now()))
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    async fn delete_task(&self, task_id: u32) -> Result<(), ImportError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM task_logs WHERE task_id = ?1")
            .bind(task_id as i64)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM resource_items WHERE task_id = ?1")
            .bind(task_id as i64)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM import_tasks WHERE id = ?1")
            .bind(task_id as i64)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    // ---------------- Log ----------------
    async fn append_log(&self, task_id: u32, line: &str) -> Result<(), ImportError> {
        sqlx::query("INSERT INTO task_logs (task_id, line, created_at) VALUES (?1, ?2, ?3)")
            .bind(task_id as i64)
            .bind(line)
            .bind(timestamp(Utc::now()))
            .execute(&*self.pool)
            .await?;
        Ok(())
    }

    async fn load_logs(&self, task_id: u32) -> Result<Vec<DBTaskLog>, ImportError> {
        let rows = sqlx::query("SELECT * FROM task_logs WHERE task_id = ?1 ORDER BY id")
            .bind(task_id as i64)
            .fetch_all(&*self.pool)
            .await?;
        Ok(rows.iter().map(row_to_log).collect())
    }

    // ---------------- Resource ----------------
    async fn insert_resource(&self, resource: &DBResourceItem) -> Result<u32, ImportError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO resource_items
                (task_id, name, kind, source, status, progress, file_path, file_size, content,
                 metadata, count, error_message, created_at, updated_at)
            VALUES
                (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
        )
        .bind(resource.task_id.map(|v| v as i64))
        .bind(&resource.name)
        .bind(&resource.kind)
        .bind(&resource.source)
        .bind(&resource.status)
        .bind(resource.progress)
        .bind(&resource.file_path)
        .bind(resource.file_size.map(|v| v as i64))
        .bind(&resource.content)
        .bind(&resource.metadata)
        .bind(resource.count as i64)
        .bind(&resource.error_message)
        .bind(format_time(Some(resource.created_at.unwrap_or(now))))
        .bind(timestamp(now))
        .execute(&*self.pool)
        .await?;

        Ok(result.last_insert_rowid() as u32)
    }

    async fn save_resource(&self, resource: &DBResourceItem) -> Result<(), ImportError> {
        sqlx::query(
            r#"
            UPDATE resource_items SET
                name=?2, kind=?3, source=?4, status=?5, progress=?6, file_path=?7,
                file_size=?8, content=?9, metadata=?10, count=?11, error_message=?12,
                updated_at=?13
            WHERE id = ?1
            "#,
        )
        .bind(resource.id as i64)
        .bind(&resource.name)
        .bind(&resource.kind)
        .bind(&resource.source)
        .bind(&resource.status)
        .bind(resource.progress)
        .bind(&resource.file_path)
        .bind(resource.file_size.map(|v| v as i64))
        .bind(&resource.content)
        .bind(&resource.metadata)
        .bind(resource.count as i64)
        .bind(&resource.error_message)
        .bind(timestamp(Utc::now()))
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    async fn load_resource(
        &self,
        resource_id: u32,
    ) -> Result<Option<DBResourceItem>, ImportError> {
        let row = sqlx::query("SELECT * FROM resource_items WHERE id = ?1")
            .bind(resource_id as i64)
            .fetch_optional(&*self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_resource))
    }

    async fn load_resources(&self, task_id: u32) -> Result<Vec<DBResourceItem>, ImportError> {
        let rows = sqlx::query("SELECT * FROM resource_items WHERE task_id = ?1 ORDER BY id")
            .bind(task_id as i64)
            .fetch_all(&*self.pool)
            .await?;
        Ok(rows.iter().map(row_to_resource).collect())
    }

    async fn load_all_resources(&self) -> Result<Vec<DBResourceItem>, ImportError> {
        let rows = sqlx::query("SELECT * FROM resource_items ORDER BY id")
            .fetch_all(&*self.pool)
            .await?;
        Ok(rows.iter().map(row_to_resource).collect())
    }

    async fn delete_resource(&self, resource_id: u32) -> Result<(), ImportError> {
        sqlx::query("DELETE FROM resource_items WHERE id = ?1")
            .bind(resource_id as i64)
            .execute(&*self.pool)
            .await?;
        Ok(())
    }

    // ---------------- Backup ----------------
    async fn insert_backup(&self, backup: &DBDatabaseBackup) -> Result<u32, ImportError> {
        let result = sqlx::query(
            r#"
            INSERT INTO database_backups
                (filename, filepath, description, file_size, file_size_human, tables_count,
                 database_name, database_driver, status, backup_started_at,
                 backup_completed_at, created_at)
            VALUES
                (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(&backup.filename)
        .bind(&backup.filepath)
        .bind(&backup.description)
        .bind(backup.file_size as i64)
        .bind(&backup.file_size_human)
        .bind(backup.tables_count as i64)
        .bind(&backup.database_name)
        .bind(&backup.database_driver)
        .bind(&backup.status)
        .bind(format_time(backup.backup_started_at))
        .bind(format_time(backup.backup_completed_at))
        .bind(format_time(Some(backup.created_at.unwrap_or_else(Utc::now))))
        .execute(&*self.pool)
        .await?;

        Ok(result.last_insert_rowid() as u32)
    }

    async fn save_backup(&self, backup: &DBDatabaseBackup) -> Result<(), ImportError> {
        sqlx::query(
            r#"
            UPDATE database_backups SET
                filepath=?2, description=?3, file_size=?4, file_size_human=?5,
                tables_count=?6, status=?7, backup_started_at=?8, backup_completed_at=?9
            WHERE id = ?1
            "#,
        )
        .bind(backup.id as i64)
        .bind(&backup.filepath)
        .bind(&backup.description)
        .bind(backup.file_size as i64)
        .bind(&backup.file_size_human)
        .bind(backup.tables_count as i64)
        .bind(&backup.status)
        .bind(format_time(backup.backup_started_at))
        .bind(format_time(backup.backup_completed_at))
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    async fn load_backup_by_filename(
        &self,
        filename: &str,
    ) -> Result<Option<DBDatabaseBackup>, ImportError> {
        let row = sqlx::query("SELECT * FROM database_backups WHERE filename = ?1")
            .bind(filename)
            .fetch_optional(&*self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_backup))
    }

    async fn load_backups(&self) -> Result<Vec<DBDatabaseBackup>, ImportError> {
        let rows = sqlx::query("SELECT * FROM database_backups ORDER BY created_at DESC, id DESC")
            .fetch_all(&*self.pool)
            .await?;
        Ok(rows.iter().map(row_to_backup).collect())
    }

    async fn delete_backup(&self, backup_id: u32) -> Result<(), ImportError> {
        sqlx::query("DELETE FROM database_backups WHERE id = ?1")
            .bind(backup_id as i64)
            .execute(&*self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task(name: &str) -> DBImportTask {
        DBImportTask {
            id: 0,
            task_type: "api-import".into(),
            name: name.into(),
            status: "pending".into(),
            progress: 0.0,
            total_items: 100,
            items_processed: 0,
            config: r#"{"endpoint":"https://example.com"}"#.into(),
            error_message: None,
            started_at: None,
            completed_at: None,
            created_at: None,
            updated_at: None,
        }
    }

    fn sample_resource(task_id: Option<u32>) -> DBResourceItem {
        DBResourceItem {
            id: 0,
            task_id,
            name: "lesson-1".into(),
            kind: "material".into(),
            source: Some("https://example.com".into()),
            status: "completed".into(),
            progress: 100.0,
            file_path: None,
            file_size: None,
            content: Some("{}".into()),
            metadata: "{}".into(),
            count: 10,
            error_message: None,
            created_at: None,
            updated_at: None,
        }
    }

    #[tokio::test]
    async fn task_round_trip_and_update() {
        let dir = tempfile::tempdir().unwrap();
        let repo = SqliteRepository::new(&dir.path().join("tasks.db"))
            .await
            .unwrap();

        let id = repo.insert_task(&sample_task("first")).await.unwrap();
        let mut row = repo.load_task(id).await.unwrap().unwrap();
        assert_eq!(row.name, "first");
        assert!(row.created_at.is_some());

        row.status = "running".into();
        row.items_processed = 40;
        row.progress = 40.0;
        row.started_at = Some(Utc::now());
        repo.save_task(&row).await.unwrap();

        let loaded = repo.load_task(id).await.unwrap().unwrap();
        assert_eq!(loaded.status, "running");
        assert_eq!(loaded.items_processed, 40);
        assert!(loaded.started_at.is_some());
        assert_eq!(loaded.created_at, row.created_at);
    }

    #[tokio::test]
    async fn logs_are_appended_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let repo = SqliteRepository::new(&dir.path().join("logs.db"))
            .await
            .unwrap();
        let id = repo.insert_task(&sample_task("logs")).await.unwrap();

        for line in ["one", "two", "three"] {
            repo.append_log(id, line).await.unwrap();
        }

        let lines: Vec<_> = repo
            .load_logs(id)
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.line)
            .collect();
        assert_eq!(lines, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn delete_task_cascades_but_keeps_orphans() {
        let dir = tempfile::tempdir().unwrap();
        let repo = SqliteRepository::new(&dir.path().join("cascade.db"))
            .await
            .unwrap();
        let id = repo.insert_task(&sample_task("cascade")).await.unwrap();
        repo.append_log(id, "started").await.unwrap();
        repo.insert_resource(&sample_resource(Some(id))).await.unwrap();
        let orphan = repo.insert_resource(&sample_resource(None)).await.unwrap();

        repo.delete_task(id).await.unwrap();

        assert!(repo.load_task(id).await.unwrap().is_none());
        assert!(repo.load_logs(id).await.unwrap().is_empty());
        let remaining = repo.load_all_resources().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, orphan);
        assert_eq!(remaining[0].task_id, None);
    }

    #[tokio::test]
    async fn backup_filenames_are_unique_and_listed_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let repo = SqliteRepository::new(&dir.path().join("backups.db"))
            .await
            .unwrap();

        let make = |name: &str, secs: i64| DBDatabaseBackup {
            id: 0,
            filename: name.into(),
            filepath: format!("database_backups/{}", name),
            description: None,
            file_size: 0,
            file_size_human: None,
            tables_count: 0,
            database_name: "llp".into(),
            database_driver: "pgsql".into(),
            status: "creating".into(),
            backup_started_at: None,
            backup_completed_at: None,
            created_at: DateTime::from_timestamp(1_700_000_000 + secs, 0),
        };

        repo.insert_backup(&make("a.sql", 0)).await.unwrap();
        repo.insert_backup(&make("b.sql", 10)).await.unwrap();
        assert!(repo.insert_backup(&make("a.sql", 20)).await.is_err());

        let names: Vec<_> = repo
            .load_backups()
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.filename)
            .collect();
        assert_eq!(names, vec!["b.sql", "a.sql"]);
    }
}
