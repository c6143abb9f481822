use crate::error::ImportError;
use crate::jobs::{JobContext, JobExecutor, JobOutcome};
use crate::request::ResourceItemRequest;
use crate::resource::{ResourceItem, ResourceKind};
use crate::task::{ImportTask, TaskType};
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;

const TEXT_EXTENSIONS: [&str; 7] = ["txt", "csv", "md", "json", "srt", "vtt", "tsv"];

/// 已上传文件的描述，来自任务配置 `files`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub original_name: String,
    /// 相对存储根目录
    #[serde(default)]
    pub stored_path: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

impl FileDescriptor {
    pub fn extension(&self) -> String {
        self.original_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default()
    }

    pub fn is_text(&self) -> bool {
        TEXT_EXTENSIONS.contains(&self.extension().as_str())
            || self
                .mime_type
                .as_deref()
                .is_some_and(|m| m.starts_with("text/"))
    }
}

pub fn parse_files(config: &Value) -> Result<Vec<FileDescriptor>, ImportError> {
    match config.get("files") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(files) => serde_json::from_value(files.clone())
            .map_err(|e| ImportError::InvalidTaskConfig(format!("invalid 'files': {}", e))),
    }
}

/// 单个文件的处理步骤，可替换为真正的解析流程
#[async_trait]
pub trait FileProcessor: Send + Sync {
    async fn process(
        &self,
        file: &FileDescriptor,
        resource: &mut ResourceItem,
        ctx: &JobContext,
    ) -> Result<(), ImportError>;
}

/// 校验文件存在、记录大小，文本类文件保存内容
#[derive(Debug, Default)]
pub struct DefaultFileProcessor;

#[async_trait]
impl FileProcessor for DefaultFileProcessor {
    async fn process(
        &self,
        file: &FileDescriptor,
        resource: &mut ResourceItem,
        ctx: &JobContext,
    ) -> Result<(), ImportError> {
        let Some(path) = file.stored_path.as_deref() else {
            resource.file_size = file.size;
            return Ok(());
        };

        if !ctx.storage.exists(path).await? {
            return Err(ImportError::MissingOutput(format!(
                "Uploaded file not found: {}",
                path
            )));
        }
        resource.file_size = Some(ctx.storage.size(path).await?);
        resource.update_progress(50.0);

        if file.is_text() {
            let bytes = ctx.storage.get(path).await?;
            let text = String::from_utf8_lossy(&bytes).to_string();
            resource.count = text.lines().filter(|l| !l.trim().is_empty()).count() as u64;
            resource.content = Some(text);
        }
        Ok(())
    }
}

pub struct FileUploadExecutor {
    processor: Arc<dyn FileProcessor>,
}

impl Default for FileUploadExecutor {
    fn default() -> Self {
        Self::new(Arc::new(DefaultFileProcessor))
    }
}

impl FileUploadExecutor {
    pub fn new(processor: Arc<dyn FileProcessor>) -> Self {
        Self { processor }
    }

    async fn process_file(
        &self,
        task: &ImportTask,
        ctx: &JobContext,
        file: &FileDescriptor,
    ) -> Result<(), ImportError> {
        let mut request = ResourceItemRequest::builder(
            file.original_name.clone(),
            ResourceKind::from_extension(&file.original_name),
        )
        .task_id(task.id)
        .metadata(json!({ "mime_type": file.mime_type }));
        if let Some(path) = &file.stored_path {
            request = request.source(path.clone()).file(path.clone(), file.size.unwrap_or(0));
        }
        let mut resource = ctx.create_resource(request.build()).await?;

        resource.mark_processing()?;
        let result = self.processor.process(file, &mut resource, ctx).await;
        match result {
            Ok(()) => resource.mark_completed()?,
            Err(ref e) => resource.mark_error(e.to_string())?,
        }
        ctx.persistence.save_resource(&resource).await?;
        debug!(
            "[Task {}] Resource {} is {}",
            task.id, resource.id, resource.status
        );
        result
    }
}

#[async_trait]
impl JobExecutor for FileUploadExecutor {
    fn task_type(&self) -> TaskType {
        TaskType::FileUpload
    }

    async fn handle(&self, task: &Arc<ImportTask>, ctx: &JobContext) -> Result<JobOutcome, ImportError> {
        let files = parse_files(&task.config)?;
        task.set_total_items(files.len() as u64).await?;
        task.add_log(&format!("Processing {} files", files.len())).await?;

        let mut processed = 0u64;
        for file in &files {
            task.checkpoint().await?;
            task.add_log(&format!("Processing file: {}", file.original_name))
                .await?;

            if let Err(e) = self.process_file(task, ctx, file).await {
                task.add_log(&format!(
                    "File processing failed: {}: {}",
                    file.original_name, e
                ))
                .await?;
                return Err(e);
            }

            processed += 1;
            task.update_progress(Some(processed)).await?;
            task.add_log(&format!("File processed: {}", file.original_name))
                .await?;
        }

        Ok(JobOutcome::new(
            processed,
            format!("File upload finished, {} files processed", processed),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::test_support::{context, running_task};
    use crate::status::ResourceStatus;

    #[test]
    fn descriptors_with_optional_fields() {
        let files = parse_files(&json!({
            "files": [
                {"original_name": "words.CSV", "stored_path": "uploads/words.csv", "size": 12},
                {"original_name": "talk.mp3"}
            ]
        }))
        .unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].is_text());
        assert!(!files[1].is_text());
        assert_eq!(files[1].stored_path, None);

        assert!(parse_files(&json!({})).unwrap().is_empty());
        assert!(parse_files(&json!({"files": [{"size": 1}]})).is_err());
    }

    #[tokio::test]
    async fn processes_each_file_into_a_resource() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), |_| {});
        ctx.storage
            .put("uploads/words.csv", b"hola,hello\nadios,bye\n")
            .await
            .unwrap();
        let task = running_task(
            &ctx,
            TaskType::FileUpload,
            json!({"files": [
                {"original_name": "words.csv", "stored_path": "uploads/words.csv"},
                {"original_name": "talk.mp3", "size": 4096}
            ]}),
            0,
        )
        .await;

        let outcome = FileUploadExecutor::default().handle(&task, &ctx).await.unwrap();
        assert_eq!(outcome.processed, 2);
        assert_eq!(task.snapshot().await.items_processed, 2);

        let resources = ctx.persistence.load_resources(task.id).await.unwrap();
        assert_eq!(resources.len(), 2);
        assert_eq!(resources[0].file_size, Some(21));
        assert_eq!(resources[0].count, 2);
        assert!(resources[0].content.as_deref().unwrap().contains("adios"));
        assert_eq!(resources[1].kind, ResourceKind::Audio);
        assert_eq!(resources[1].file_size, Some(4096));
        assert!(resources.iter().all(|r| r.status == ResourceStatus::Completed));
    }

    #[tokio::test]
    async fn missing_stored_file_fails_task_midway() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), |_| {});
        ctx.storage.put("uploads/a.txt", b"a").await.unwrap();
        let task = running_task(
            &ctx,
            TaskType::FileUpload,
            json!({"files": [
                {"original_name": "a.txt", "stored_path": "uploads/a.txt"},
                {"original_name": "b.txt", "stored_path": "uploads/b.txt"}
            ]}),
            0,
        )
        .await;

        let err = FileUploadExecutor::default().handle(&task, &ctx).await.unwrap_err();
        assert_eq!(
            err,
            ImportError::MissingOutput("Uploaded file not found: uploads/b.txt".into())
        );

        let snapshot = task.snapshot().await;
        assert_eq!(snapshot.items_processed, 1);
        assert_eq!(snapshot.progress, 50.0);

        let resources = ctx.persistence.load_resources(task.id).await.unwrap();
        assert_eq!(resources[1].status, ResourceStatus::Error);
    }
}
