use crate::error::ImportError;
use crate::jobs::{
    JobContext, JobExecutor, JobOutcome, config_bool, config_str, config_u64, next_line_or_cancel,
};
use crate::request::ResourceItemRequest;
use crate::resource::ResourceKind;
use crate::script::{OutputStream, ScriptProcess, parse_progress};
use crate::status::ResourceStatus;
use crate::task::{ImportTask, TaskType};
use async_trait::async_trait;
use chrono::Utc;
use log::{debug, warn};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use url::Url;

const SCRAPED_PREFIX: &str = "Scraped: ";

/// 调用外部抓取脚本，脚本路径与解释器来自 [`crate::config::ScrapingConfig`]
#[derive(Debug, Default)]
pub struct WebScrapingExecutor;

impl WebScrapingExecutor {
    pub fn new() -> Self {
        Self
    }
}

/// `urls` 可以是换行分隔的字符串或字符串数组，只接受 http(s)
pub fn parse_urls(config: &Value) -> Result<Vec<String>, ImportError> {
    let raw: Vec<String> = match config.get("urls") {
        Some(Value::String(s)) => s.lines().map(str::to_string).collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };

    let mut urls = Vec::new();
    for candidate in raw.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        let parsed = Url::parse(candidate).map_err(|e| {
            ImportError::InvalidTaskConfig(format!("invalid URL '{}': {}", candidate, e))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ImportError::InvalidTaskConfig(format!(
                "unsupported URL scheme '{}'",
                candidate
            )));
        }
        urls.push(candidate.to_string());
    }

    if urls.is_empty() {
        return Err(ImportError::InvalidTaskConfig("missing 'urls'".to_string()));
    }
    Ok(urls)
}

#[async_trait]
impl JobExecutor for WebScrapingExecutor {
    fn task_type(&self) -> TaskType {
        TaskType::WebScraping
    }

    async fn handle(&self, task: &Arc<ImportTask>, ctx: &JobContext) -> Result<JobOutcome, ImportError> {
        let max_pages = config_u64(&task.config, "max_pages", 10).max(1) as usize;
        let mut urls = parse_urls(&task.config)?;
        urls.truncate(max_pages);

        task.set_total_items(urls.len() as u64).await?;
        task.add_log(&format!("Processing {} URLs", urls.len())).await?;

        let config_path = write_scraper_config(task, ctx, &urls).await?;
        let result = run_scraper(task, ctx, &config_path, &urls).await;

        if let Err(e) = tokio::fs::remove_file(&config_path).await {
            warn!(
                "[Task {}] Failed to remove scraper config {:?}: {}",
                task.id, config_path, e
            );
        }

        match result {
            Ok(processed) => Ok(JobOutcome::new(
                processed,
                format!("Web scraping finished, {} pages processed", processed),
            )),
            Err(ImportError::Canceled(id)) => Err(ImportError::Canceled(id)),
            Err(e) => {
                task.add_log(&format!("Scraping failed: {}", e)).await?;
                Err(e)
            }
        }
    }
}

async fn write_scraper_config(
    task: &ImportTask,
    ctx: &JobContext,
    urls: &[String],
) -> Result<PathBuf, ImportError> {
    let config = &task.config;
    let payload = json!({
        "task_id": task.id,
        "urls": urls,
        "max_pages": urls.len(),
        "content_type": config_str(config, "content_type", "course"),
        "delay_ms": config_u64(config, "delay_ms", 1000),
        "include_images": config_bool(config, "include_images", false),
        "include_audio": config_bool(config, "include_audio", false),
    });

    tokio::fs::create_dir_all(&ctx.config.temp_dir).await?;
    let path = ctx.config.temp_dir.join(format!(
        "scraper_config_{}_{}.json",
        task.id,
        Utc::now().timestamp_micros()
    ));
    tokio::fs::write(&path, serde_json::to_vec_pretty(&payload)?).await?;
    debug!("[Task {}] Scraper config written to {:?}", task.id, path);
    Ok(path)
}

/// 返回已处理页数
async fn run_scraper(
    task: &Arc<ImportTask>,
    ctx: &JobContext,
    config_path: &Path,
    urls: &[String],
) -> Result<u64, ImportError> {
    let settings = &ctx.config.scraping;
    let args = vec![
        settings.script_path.to_string_lossy().to_string(),
        config_path.to_string_lossy().to_string(),
    ];
    let mut process =
        ScriptProcess::spawn(&ctx.config.python_path, &args, settings.process_timeout())?;
    let mut status_rx = task.subscribe_status();

    let mut scraped = 0u64;
    while let Some(line) = next_line_or_cancel(task, &mut process, &mut status_rx).await? {
        if line.stream == OutputStream::Stderr {
            debug!("[Task {}] scraper stderr: {}", task.id, line.text);
            continue;
        }
        if let Some(url) = line.text.trim().strip_prefix(SCRAPED_PREFIX) {
            scraped += 1;
            task.update_progress(Some(scraped)).await?;
            task.add_log(&format!("Scraped: {}", url.trim())).await?;
        } else if let Some(percent) = parse_progress(&line.text) {
            task.set_progress(percent as f64).await?;
        } else {
            debug!("[Task {}] scraper: {}", task.id, line.text);
        }
    }

    let output = process.wait().await?;
    if !output.success() {
        return Err(ImportError::Process(format!(
            "Scraper script failed: {}",
            output.stderr_text()
        )));
    }

    let kind = config_str(&task.config, "content_type", "course")
        .parse()
        .unwrap_or(ResourceKind::Course);
    let items = output
        .result_json()
        .and_then(|result| result.get("items").and_then(Value::as_array).cloned())
        .unwrap_or_default();

    for item in &items {
        let name = item
            .get("title")
            .and_then(Value::as_str)
            .or_else(|| item.get("url").and_then(Value::as_str))
            .unwrap_or("untitled");
        let mut request = ResourceItemRequest::builder(name, kind)
            .task_id(task.id)
            .status(ResourceStatus::Completed)
            .metadata(item.get("metadata").cloned().unwrap_or_else(|| json!({})));
        if let Some(source) = item.get("url").and_then(Value::as_str) {
            request = request.source(source);
        }
        if let Some(content) = item.get("content").and_then(Value::as_str) {
            request = request.content(content);
        }
        ctx.create_resource(request.build()).await?;
    }

    let processed = scraped.max(items.len() as u64).min(urls.len() as u64);
    task.update_progress(Some(processed)).await?;
    if !items.is_empty() {
        task.add_log(&format!("Saved {} scraped resources", items.len()))
            .await?;
    }
    Ok(processed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::test_support::{context, running_task, write_script};

    #[test]
    fn urls_from_string_or_array() {
        let from_text = parse_urls(&json!({"urls": "https://a.com/1\n\n  https://a.com/2  \n"}));
        assert_eq!(from_text.unwrap(), vec!["https://a.com/1", "https://a.com/2"]);

        let from_array = parse_urls(&json!({"urls": ["http://b.com"]}));
        assert_eq!(from_array.unwrap(), vec!["http://b.com"]);

        assert!(parse_urls(&json!({"urls": "ftp://c.com"})).is_err());
        assert!(parse_urls(&json!({"urls": "not a url"})).is_err());
        assert!(parse_urls(&json!({})).is_err());
    }

    #[tokio::test]
    async fn scrapes_pages_and_stores_items() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            dir.path(),
            "scraper.sh",
            r#"grep -q '"content_type": "vocabulary"' "$1" || exit 9
echo "Scraped: https://a.com/1"
echo "Progress: 50%"
echo "Scraped: https://a.com/2"
echo 'RESULT: {"items":[{"title":"Lesson 1","url":"https://a.com/1","content":"hola"}]}'
"#,
        );
        let ctx = context(dir.path(), |c| c.scraping.script_path = script.into());
        let task = running_task(
            &ctx,
            TaskType::WebScraping,
            json!({
                "urls": "https://a.com/1\nhttps://a.com/2\nhttps://a.com/3",
                "max_pages": 2,
                "content_type": "vocabulary"
            }),
            0,
        )
        .await;

        let outcome = WebScrapingExecutor::new().handle(&task, &ctx).await.unwrap();
        assert_eq!(outcome.processed, 2);

        let snapshot = task.snapshot().await;
        assert_eq!(snapshot.total_items, 2);
        assert_eq!(snapshot.items_processed, 2);
        assert!(snapshot.logs.iter().any(|l| l.ends_with("Scraped: https://a.com/2")));

        let resources = ctx.persistence.load_resources(task.id).await.unwrap();
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].kind, ResourceKind::Vocabulary);
        assert_eq!(resources[0].content.as_deref(), Some("hola"));

        let leftovers = std::fs::read_dir(dir.path().join("tmp")).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn failing_script_reports_stderr_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "scraper.sh", "echo 'connection refused' >&2\nexit 2\n");
        let ctx = context(dir.path(), |c| c.scraping.script_path = script.into());
        let task = running_task(
            &ctx,
            TaskType::WebScraping,
            json!({"urls": ["https://a.com"]}),
            0,
        )
        .await;

        let err = WebScrapingExecutor::new().handle(&task, &ctx).await.unwrap_err();
        assert_eq!(
            err,
            ImportError::Process("Scraper script failed: connection refused".into())
        );
        assert!(task.logs().await.iter().any(|l| l.contains("Scraping failed")));
        assert_eq!(std::fs::read_dir(dir.path().join("tmp")).unwrap().count(), 0);
    }
}
