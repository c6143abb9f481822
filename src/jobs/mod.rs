pub mod api_import;
pub mod extraction;
pub mod file_upload;
pub mod web_scraping;

pub use api_import::{ApiImportExecutor, ImportApiClient, ReqwestApiClient};
pub use extraction::ExtractionExecutor;
pub use file_upload::{DefaultFileProcessor, FileDescriptor, FileProcessor, FileUploadExecutor};
pub use web_scraping::WebScrapingExecutor;

use crate::config::ImportConfig;
use crate::error::ImportError;
use crate::persistence::PersistenceManager;
use crate::request::ResourceItemRequest;
use crate::resource::ResourceItem;
use crate::script::{OutputLine, ScriptProcess};
use crate::status::TaskStatus;
use crate::storage::LocalStorage;
use crate::task::{ImportTask, TaskType};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// 一次成功执行的结果
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub processed: u64,
    /// 完成后追加到任务日志
    pub summary: String,
}

impl JobOutcome {
    pub fn new(processed: u64, summary: impl Into<String>) -> Self {
        Self {
            processed,
            summary: summary.into(),
        }
    }
}

/// 执行器共享的运行环境
#[derive(Clone)]
pub struct JobContext {
    pub config: Arc<ImportConfig>,
    pub persistence: Arc<PersistenceManager>,
    pub storage: LocalStorage,
}

impl JobContext {
    pub fn new(config: Arc<ImportConfig>, persistence: Arc<PersistenceManager>) -> Self {
        let storage = LocalStorage::new(&config.storage_dir);
        Self {
            config,
            persistence,
            storage,
        }
    }

    /// 写入资源记录并返回带 id 的副本
    pub async fn create_resource(
        &self,
        request: ResourceItemRequest,
    ) -> Result<ResourceItem, ImportError> {
        let mut item = request.into_item();
        item.id = self.persistence.insert_resource(&item).await?;
        Ok(item)
    }
}

/// 每种任务类型一个执行器
///
/// 执行器只负责工作本身：`mark_started`、`mark_completed` 与失败记录由
/// [`crate::worker::JobWorker`] 统一处理。执行器出错时先写一条日志说明失败细节，
/// 再把错误返回。
#[async_trait]
pub trait JobExecutor: Send + Sync {
    fn task_type(&self) -> TaskType;

    /// 最多尝试次数
    fn tries(&self) -> u32 {
        1
    }

    /// 单次尝试的时间上限
    fn timeout(&self) -> Option<Duration> {
        None
    }

    async fn handle(&self, task: &Arc<ImportTask>, ctx: &JobContext) -> Result<JobOutcome, ImportError>;

    /// 重试耗尽后调用
    async fn failed(&self, task: &Arc<ImportTask>, error: &ImportError) -> Result<(), ImportError> {
        task.mark_failed(Some(&error.to_string())).await
    }
}

//----------------------------------- config helpers -------------------------------------------

pub(crate) fn require_str<'a>(config: &'a Value, key: &str) -> Result<&'a str, ImportError> {
    config
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ImportError::InvalidTaskConfig(format!("missing '{}'", key)))
}

pub(crate) fn config_str<'a>(config: &'a Value, key: &str, default: &'a str) -> &'a str {
    config.get(key).and_then(Value::as_str).unwrap_or(default)
}

/// 数字或数字字符串
pub(crate) fn config_u64(config: &Value, key: &str, default: u64) -> u64 {
    match config.get(key) {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(default),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
        _ => default,
    }
}

pub(crate) fn config_bool(config: &Value, key: &str, default: bool) -> bool {
    match config.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => matches!(s.as_str(), "1" | "true" | "yes" | "on"),
        Some(Value::Number(n)) => n.as_u64().map(|n| n != 0).unwrap_or(default),
        _ => default,
    }
}

/// 读取下一行输出；任务被取消时终止进程
pub(crate) async fn next_line_or_cancel(
    task: &ImportTask,
    process: &mut ScriptProcess,
    status_rx: &mut watch::Receiver<TaskStatus>,
) -> Result<Option<OutputLine>, ImportError> {
    let line = tokio::select! {
        line = process.next_line() => Some(line),
        _ = status_rx.wait_for(|s| *s == TaskStatus::Cancelled) => None,
    };

    match line {
        Some(line) => line,
        None => {
            process.kill().await;
            Err(ImportError::Canceled(task.id))
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_config_values_with_defaults() {
        let config = json!({
            "endpoint": "https://api.example.com",
            "blank": "  ",
            "batch_size": "25",
            "max_pages": 3,
            "include_audio": true,
            "use_ai_subtitle": "0",
        });

        assert_eq!(require_str(&config, "endpoint").unwrap(), "https://api.example.com");
        assert_eq!(
            require_str(&config, "blank").unwrap_err(),
            ImportError::InvalidTaskConfig("missing 'blank'".into())
        );
        assert!(require_str(&config, "api_key").is_err());
        assert_eq!(config_u64(&config, "batch_size", 100), 25);
        assert_eq!(config_u64(&config, "max_pages", 10), 3);
        assert_eq!(config_u64(&config, "delay_ms", 1000), 1000);
        assert!(config_bool(&config, "include_audio", false));
        assert!(!config_bool(&config, "use_ai_subtitle", true));
        assert!(config_bool(&config, "missing", true));
        assert_eq!(config_str(&config, "format", "json"), "json");
    }
}
