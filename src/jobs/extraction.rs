use crate::config::ExtractionConfig;
use crate::error::ImportError;
use crate::jobs::{JobContext, JobExecutor, JobOutcome, config_bool, next_line_or_cancel};
use crate::request::ResourceItemRequest;
use crate::resource::ResourceKind;
use crate::script::{ScriptProcess, parse_progress};
use crate::status::ResourceStatus;
use crate::task::{ImportTask, TaskType};
use async_trait::async_trait;
use log::{debug, error, info};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

/// 视频片段的音频/字幕提取
pub struct ExtractionExecutor {
    tries: u32,
    timeout: Duration,
}

impl ExtractionExecutor {
    pub fn new(config: &ExtractionConfig) -> Self {
        Self {
            tries: config.tries.max(1),
            timeout: config.job_timeout(),
        }
    }
}

/// 时间参数允许字符串或数字
fn require_time(config: &Value, key: &str) -> Result<String, ImportError> {
    match config.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(ImportError::InvalidTaskConfig(format!("missing '{}'", key))),
    }
}

/// 进度夹在 [floor, ceiling] 内
pub fn clamp_progress(percent: u32, floor: u8, ceiling: u8) -> f64 {
    percent.clamp(floor as u32, ceiling as u32) as f64
}

#[async_trait]
impl JobExecutor for ExtractionExecutor {
    fn task_type(&self) -> TaskType {
        TaskType::VideoExtraction
    }

    fn tries(&self) -> u32 {
        self.tries
    }

    fn timeout(&self) -> Option<Duration> {
        Some(self.timeout)
    }

    async fn handle(&self, task: &Arc<ImportTask>, ctx: &JobContext) -> Result<JobOutcome, ImportError> {
        let result = extract(task, ctx).await;
        if let Err(e) = &result {
            if !matches!(e, ImportError::Canceled(_)) {
                task.add_log(&format!("Extraction failed: {}", e)).await?;
            }
        }
        result
    }

    async fn failed(&self, task: &Arc<ImportTask>, error: &ImportError) -> Result<(), ImportError> {
        error!(
            "[Task {}] Extraction failed after {} tries: {}",
            task.id, self.tries, error
        );
        task.mark_failed(Some(&error.to_string())).await
    }
}

async fn extract(task: &Arc<ImportTask>, ctx: &JobContext) -> Result<JobOutcome, ImportError> {
    let settings = &ctx.config.extraction;
    let config = &task.config;
    let video_url = config
        .get("video_url")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ImportError::InvalidTaskConfig("missing 'video_url'".to_string()))?;
    let start = require_time(config, "start_time")?;
    let end = require_time(config, "end_time")?;
    let ai_subtitle = config_bool(config, "use_ai_subtitle", true);

    let output_dir = ctx.storage.path(&settings.output_dir)?;
    tokio::fs::create_dir_all(&output_dir).await?;

    let mut args = vec![
        settings.script_path.to_string_lossy().to_string(),
        video_url.to_string(),
        "--start".to_string(),
        start.clone(),
        "--end".to_string(),
        end.clone(),
        "--output-dir".to_string(),
        output_dir.to_string_lossy().to_string(),
    ];
    if ai_subtitle {
        args.push("--ai-subtitle".to_string());
    }

    info!("[Task {}] Extracting {} [{} - {}]", task.id, video_url, start, end);
    task.add_log(&format!("Extracting {} [{} - {}]", video_url, start, end))
        .await?;
    task.set_progress(settings.progress_floor as f64).await?;

    let mut process =
        ScriptProcess::spawn(&ctx.config.python_path, &args, settings.process_timeout())?;
    let mut status_rx = task.subscribe_status();
    while let Some(line) = next_line_or_cancel(task, &mut process, &mut status_rx).await? {
        if let Some(percent) = parse_progress(&line.text) {
            let progress =
                clamp_progress(percent, settings.progress_floor, settings.progress_ceiling);
            task.set_progress(progress).await?;
        }
        debug!("[Task {}] extractor: {}", task.id, line.text);
    }

    let output = process.wait().await?;
    if !output.success() {
        return Err(ImportError::Process(format!(
            "Extraction script failed: {}",
            output.stderr_text()
        )));
    }
    let result = output.result_json().ok_or_else(|| {
        ImportError::MissingOutput("No result JSON found in script output".to_string())
    })?;
    task.set_progress(settings.progress_ceiling as f64).await?;

    let title = result
        .pointer("/video_info/title")
        .and_then(Value::as_str)
        .map(str::to_string);
    let audio = verify_output(ctx, &result, "audio_path", "Audio").await?;
    let subtitle = verify_output(ctx, &result, "subtitle_path", "Subtitle").await?;
    let metadata = json!({
        "video_url": video_url,
        "video_title": title,
        "start_time": start,
        "end_time": end,
    });

    let mut saved = 0u64;
    if let Some((path, size)) = audio {
        let name = title.clone().unwrap_or_else(|| file_name(&path));
        ctx.create_resource(
            ResourceItemRequest::builder(name, ResourceKind::Audio)
                .task_id(task.id)
                .source(video_url)
                .file(path, size)
                .metadata(metadata.clone())
                .status(ResourceStatus::Completed)
                .build(),
        )
        .await?;
        saved += 1;
    }
    if let Some((path, size)) = subtitle {
        let mut request = ResourceItemRequest::builder(file_name(&path), ResourceKind::Material)
            .task_id(task.id)
            .source(video_url)
            .file(path, size)
            .metadata(metadata)
            .status(ResourceStatus::Completed);
        if let Some(text) = result.get("subtitle_text").and_then(Value::as_str) {
            request = request.content(text);
        }
        ctx.create_resource(request.build()).await?;
        saved += 1;
    }

    Ok(JobOutcome::new(
        saved,
        format!("Extraction finished, {} files saved", saved),
    ))
}

/// 转为存储相对路径并确认文件存在，返回 (路径, 大小)
async fn verify_output(
    ctx: &JobContext,
    result: &Value,
    key: &str,
    label: &str,
) -> Result<Option<(String, u64)>, ImportError> {
    let Some(raw) = result.get(key).and_then(Value::as_str) else {
        return Ok(None);
    };
    let missing = |path: &str| ImportError::MissingOutput(format!("{} file not found: {}", label, path));

    let relative = ctx.storage.relative_path(raw).map_err(|_| missing(raw))?;
    if !ctx.storage.exists(&relative).await? {
        return Err(missing(&relative));
    }
    let size = ctx.storage.size(&relative).await?;
    Ok(Some((relative, size)))
}

fn file_name(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::test_support::{context, running_task, write_script};

    fn extraction_task_config() -> Value {
        json!({
            "video_url": "https://www.bilibili.com/video/BV1xx",
            "start_time": "00:01:00",
            "end_time": "00:02:30",
            "use_ai_subtitle": false
        })
    }

    #[test]
    fn progress_is_kept_inside_headroom() {
        assert_eq!(clamp_progress(0, 10, 90), 10.0);
        assert_eq!(clamp_progress(45, 10, 90), 45.0);
        assert_eq!(clamp_progress(100, 10, 90), 90.0);
    }

    #[test]
    fn declares_retry_budget_and_timeout() {
        let executor = ExtractionExecutor::new(&ExtractionConfig::default());
        assert_eq!(executor.tries(), 3);
        assert_eq!(executor.timeout(), Some(Duration::from_secs(1800)));
    }

    #[tokio::test]
    async fn missing_audio_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            dir.path(),
            "extract.sh",
            "echo 'Progress: 45%'\necho '{\"audio_path\":\"a.wav\"}'\n",
        );
        let ctx = context(dir.path(), |c| c.extraction.script_path = script.into());
        let task = running_task(&ctx, TaskType::VideoExtraction, extraction_task_config(), 0).await;

        let err = ExtractionExecutor::new(&ctx.config.extraction)
            .handle(&task, &ctx)
            .await
            .unwrap_err();
        assert_eq!(err, ImportError::MissingOutput("Audio file not found: a.wav".into()));
        assert!(task.logs().await.iter().any(|l| l.contains("Audio file not found: a.wav")));
        assert_eq!(task.snapshot().await.progress, 90.0);
    }

    #[tokio::test]
    async fn saves_audio_and_subtitle_resources() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            dir.path(),
            "extract.sh",
            r#"[ "$2" = "--start" ] && [ "$3" = "00:01:00" ] || exit 7
out="$7"
printf 'RIFF' > "$out/clip.wav"
printf 'hola' > "$out/clip.srt"
echo "Progress: 5%"
echo "Progress: 60%" >&2
echo "RESULT: {\"video_info\":{\"title\":\"Spanish 101\"},\"audio_path\":\"$out/clip.wav\",\"subtitle_path\":\"$out/clip.srt\",\"subtitle_text\":\"hola\"}"
"#,
        );
        let ctx = context(dir.path(), |c| c.extraction.script_path = script.into());
        let task = running_task(&ctx, TaskType::VideoExtraction, extraction_task_config(), 0).await;

        let outcome = ExtractionExecutor::new(&ctx.config.extraction)
            .handle(&task, &ctx)
            .await
            .unwrap();
        assert_eq!(outcome.processed, 2);
        assert_eq!(task.snapshot().await.progress, 90.0);

        let resources = ctx.persistence.load_resources(task.id).await.unwrap();
        assert_eq!(resources.len(), 2);
        assert_eq!(resources[0].name, "Spanish 101");
        assert_eq!(resources[0].kind, ResourceKind::Audio);
        assert_eq!(resources[0].file_path.as_deref(), Some("bilibili_extracts/clip.wav"));
        assert_eq!(resources[0].file_size, Some(4));
        assert_eq!(resources[1].content.as_deref(), Some("hola"));
    }

    #[tokio::test]
    async fn output_outside_storage_counts_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            dir.path(),
            "extract.sh",
            "echo '{\"subtitle_path\":\"/etc/passwd\"}'\n",
        );
        let ctx = context(dir.path(), |c| c.extraction.script_path = script.into());
        let task = running_task(&ctx, TaskType::VideoExtraction, extraction_task_config(), 0).await;

        let err = ExtractionExecutor::new(&ctx.config.extraction)
            .handle(&task, &ctx)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ImportError::MissingOutput("Subtitle file not found: /etc/passwd".into())
        );
    }

    #[tokio::test]
    async fn silent_script_has_no_result() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "extract.sh", "echo 'done'\n");
        let ctx = context(dir.path(), |c| c.extraction.script_path = script.into());
        let task = running_task(&ctx, TaskType::VideoExtraction, extraction_task_config(), 0).await;

        let err = ExtractionExecutor::new(&ctx.config.extraction)
            .handle(&task, &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::MissingOutput(_)));
    }

    #[tokio::test]
    async fn cancel_kills_running_script() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "extract.sh", "echo 'Progress: 20%'\nsleep 30\n");
        let ctx = context(dir.path(), |c| c.extraction.script_path = script.into());
        let task = running_task(&ctx, TaskType::VideoExtraction, extraction_task_config(), 0).await;

        let canceller = {
            let task = Arc::clone(&task);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                task.cancel().await.unwrap();
            })
        };

        let started = std::time::Instant::now();
        let err = ExtractionExecutor::new(&ctx.config.extraction)
            .handle(&task, &ctx)
            .await
            .unwrap_err();
        canceller.await.unwrap();
        assert_eq!(err, ImportError::Canceled(task.id));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
