use async_trait::async_trait;
use importkit::config::{ExtractionConfig, ScrapingConfig};
use importkit::jobs::api_import::BatchQuery;
use importkit::jobs::{ApiImportExecutor, ImportApiClient};
use importkit::{ImportTask, JobContext, JobExecutor, JobOutcome};
use importkit::persistence::{PersistenceManager, PersistenceType};
use importkit::{
    ImportConfig, ImportError, ImportManager, ImportTaskRequest, ResourceKind, TaskStatus,
    TaskType,
};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

fn write_script(dir: &Path, name: &str, body: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path.to_string_lossy().to_string()
}

fn base_config(dir: &Path) -> importkit::config::ImportConfigBuilder {
    ImportConfig::builder()
        .storage_dir(dir.join("storage"))
        .temp_dir(dir)
        .python_path("sh")
        .retry_delay_ms(5)
}

async fn start(config: ImportConfig) -> Arc<ImportManager> {
    let manager = ImportManager::new(config).unwrap();
    manager
        .init_with(Arc::new(PersistenceManager::in_memory()))
        .await
        .unwrap();
    manager
}

/// 第二批开始一直返回 500
struct FailingSecondBatch {
    calls: AtomicU64,
}

#[async_trait]
impl ImportApiClient for FailingSecondBatch {
    async fn fetch_batch(
        &self,
        _endpoint: &str,
        _api_key: &str,
        query: &BatchQuery,
    ) -> Result<String, ImportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if query.offset > 0 {
            return Err(ImportError::HttpStatus(500, "Internal Server Error".into()));
        }
        Ok(r#"[{"word":"hola"}]"#.to_string())
    }
}

#[tokio::test]
async fn extraction_with_missing_audio_fails_the_task() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "extract.sh",
        "echo 'Progress: 45%'\necho '{\"audio_path\":\"a.wav\"}'\n",
    );
    let config = base_config(dir.path())
        .extraction(ExtractionConfig {
            script_path: script.into(),
            ..ExtractionConfig::default()
        })
        .build()
        .unwrap();
    let manager = start(config).await;

    let id = manager
        .submit(
            ImportTaskRequest::builder(TaskType::VideoExtraction, "clip")
                .option("video_url", "https://www.bilibili.com/video/BV1xx")
                .option("start_time", "00:00:10")
                .option("end_time", "00:00:20")
                .build(),
        )
        .await
        .unwrap();

    assert_eq!(manager.wait_for_task(id).await.unwrap(), TaskStatus::Failed);
    let detail = manager.task_detail(id).await.unwrap();
    assert_eq!(
        detail.task.error_message.as_deref(),
        Some("Audio file not found: a.wav")
    );
    assert!(detail.task.progress < 100.0);
    assert!(detail.task.logs.iter().any(|l| l.ends_with("Retry attempt 3/3")));
    assert!(detail.resources.is_empty());
}

#[tokio::test]
async fn api_import_failing_second_batch_keeps_first_batch() {
    let dir = tempfile::tempdir().unwrap();
    let manager = start(base_config(dir.path()).build().unwrap()).await;
    let client = Arc::new(FailingSecondBatch {
        calls: AtomicU64::new(0),
    });
    manager.register_executor(Arc::new(ApiImportExecutor::new(client.clone())));

    let id = manager
        .submit(
            ImportTaskRequest::builder(TaskType::ApiImport, "vocab")
                .option("endpoint", "https://api.example.com/words")
                .option("api_key", "k-123")
                .option("batch_size", 25)
                .build(),
        )
        .await
        .unwrap();

    assert_eq!(manager.wait_for_task(id).await.unwrap(), TaskStatus::Failed);
    assert_eq!(client.calls.load(Ordering::SeqCst), 2);

    let detail = manager.task_detail(id).await.unwrap();
    let task = detail.task;
    assert_eq!(task.items_processed, 10);
    assert_eq!(
        task.error_message.as_deref(),
        Some("API request failed: 500 (Internal Server Error)")
    );
    assert!(task.logs.iter().any(|l| l.ends_with("Batch completed, imported 10 records")));
    assert!(task.logs.iter().any(|l| l.contains("Batch failed: API request failed: 500")));
    assert_eq!(detail.resources.len(), 1);
    assert_eq!(detail.resources[0].kind, ResourceKind::Material);
}

#[tokio::test]
async fn scraping_runs_to_completion_and_updates_stats() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "scraper.sh",
        r#"echo "Scraped: https://a.com/1"
echo "Scraped: https://a.com/2"
echo 'RESULT: {"items":[{"title":"Lesson 1","url":"https://a.com/1","content":"hola"},{"title":"Lesson 2","url":"https://a.com/2","content":"adios"}]}'
"#,
    );
    let config = base_config(dir.path())
        .scraping(ScrapingConfig {
            script_path: script.into(),
            ..ScrapingConfig::default()
        })
        .build()
        .unwrap();
    let manager = start(config).await;

    let id = manager
        .submit(
            ImportTaskRequest::builder(TaskType::WebScraping, "site")
                .option("urls", vec!["https://a.com/1", "https://a.com/2"])
                .build(),
        )
        .await
        .unwrap();

    assert_eq!(manager.wait_for_task(id).await.unwrap(), TaskStatus::Completed);
    let detail = manager.task_detail(id).await.unwrap();
    assert_eq!(detail.task.progress, 100.0);
    assert_eq!(detail.task.items_processed, 2);
    assert_eq!(detail.resources.len(), 2);
    assert!(
        detail
            .task
            .logs
            .iter()
            .any(|l| l.ends_with("Web scraping finished, 2 pages processed"))
    );

    let stats = manager.stats().await.unwrap();
    assert_eq!(stats.total_resources, 2);
    assert_eq!(stats.today_imported, 2);
    assert_eq!(stats.success_rate, 100.0);
}

#[tokio::test]
async fn interrupted_task_is_recovered_then_resumed() {
    let dir = tempfile::tempdir().unwrap();
    let config = base_config(dir.path())
        .persistence_type(PersistenceType::Sqlite(dir.path().join("tasks.db")))
        .build()
        .unwrap();

    let first = ImportManager::new(config.clone()).unwrap();
    first.init().await.unwrap();
    let id = first
        .create_task(
            ImportTaskRequest::builder(TaskType::FileUpload, "uploads")
                .config(json!({"files": []}))
                .build(),
        )
        .await
        .unwrap();
    first.get_task(id).unwrap().mark_started().await.unwrap();

    let second = ImportManager::new(config).unwrap();
    second.init().await.unwrap();
    assert_eq!(second.get_task(id).unwrap().status(), TaskStatus::Running);

    assert_eq!(second.recover_interrupted().await.unwrap(), vec![id]);
    assert_eq!(second.get_task(id).unwrap().status(), TaskStatus::Paused);

    second.resume(id).await.unwrap();
    assert_eq!(second.wait_for_task(id).await.unwrap(), TaskStatus::Completed);
    let logs = second.task_detail(id).await.unwrap().task.logs;
    assert!(logs.iter().any(|l| l.ends_with("Task interrupted, restored as paused")));
    assert!(logs.iter().any(|l| l.ends_with("File upload finished, 0 files processed")));
}

/// 放行前一直阻塞的上传执行器
struct HeldUpload {
    release: Arc<Notify>,
}

#[async_trait]
impl JobExecutor for HeldUpload {
    fn task_type(&self) -> TaskType {
        TaskType::FileUpload
    }

    async fn handle(&self, task: &Arc<ImportTask>, _ctx: &JobContext) -> Result<JobOutcome, ImportError> {
        self.release.notified().await;
        task.checkpoint().await?;
        Ok(JobOutcome::new(0, "held upload released"))
    }
}

#[tokio::test]
async fn reading_commands_do_not_touch_tasks_owned_elsewhere() {
    let dir = tempfile::tempdir().unwrap();
    let config = base_config(dir.path())
        .persistence_type(PersistenceType::Sqlite(dir.path().join("shared.db")))
        .build()
        .unwrap();

    let owner = ImportManager::new(config.clone()).unwrap();
    owner.init().await.unwrap();
    let release = Arc::new(Notify::new());
    owner.register_executor(Arc::new(HeldUpload {
        release: release.clone(),
    }));
    let id = owner
        .submit(ImportTaskRequest::builder(TaskType::FileUpload, "long upload").build())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(owner.get_task(id).unwrap().status(), TaskStatus::Running);

    let observer = ImportManager::new(config).unwrap();
    observer.init().await.unwrap();
    let listed = observer.list_tasks().await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].status, TaskStatus::Running);
    assert_eq!(observer.stats().await.unwrap().running_tasks, 1);
    observer.task_detail(id).await.unwrap();

    let stored = observer.persistence().unwrap().load_task(id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Running);
    assert!(!stored.logs.iter().any(|l| l.contains("interrupted")));
    assert_eq!(owner.get_task(id).unwrap().status(), TaskStatus::Running);

    release.notify_one();
    assert_eq!(owner.wait_for_task(id).await.unwrap(), TaskStatus::Completed);
    let stored = observer.persistence().unwrap().load_task(id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Completed);
}
