use crate::config::ImportConfig;
use crate::error::ImportError;
use crate::persistence::PersistenceManager;
use crate::stats::format_bytes;
use crate::status::TaskStatus;
use log::{debug, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::process::Command;

static FFMPEG_VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"ffmpeg version (\S+)").expect("ffmpeg version pattern"));

const CHECK_TIMEOUT: Duration = Duration::from_secs(15);
const WRITE_CHECK_FILE: &str = ".importkit_write_check";

/// 外部工具检查结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolStatus {
    pub available: bool,
    pub version: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageStatus {
    pub available: bool,
    pub path: PathBuf,
    pub used_space: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub available: bool,
    pub pending_jobs: usize,
    pub processing_jobs: usize,
    pub message: String,
}

/// 提取任务的运行前检查
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub python: ToolStatus,
    pub ffmpeg: ToolStatus,
    pub whisper: ToolStatus,
    pub storage: StorageStatus,
    pub queue: QueueStatus,
}

impl SystemStatus {
    /// 各项检查相互独立，单项失败只体现在该项结果中
    pub async fn collect(config: &ImportConfig, persistence: &PersistenceManager) -> Self {
        let (python, ffmpeg, whisper, storage, queue) = tokio::join!(
            check_python(&config.python_path),
            check_ffmpeg(&config.extraction.ffmpeg_path),
            check_whisper(&config.python_path),
            check_storage(&config.storage_dir),
            check_queue(persistence),
        );
        Self {
            python,
            ffmpeg,
            whisper,
            storage,
            queue,
        }
    }

    /// 提取任务依赖的检查项是否全部可用
    pub fn ready_for_extraction(&self) -> bool {
        self.python.available && self.ffmpeg.available && self.storage.available
    }
}

/// 运行命令并返回合并后的输出，非零退出码视为失败
async fn run_check(program: &str, args: &[&str]) -> Result<String, ImportError> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();
    let output = tokio::time::timeout(CHECK_TIMEOUT, output)
        .await
        .map_err(|_| ImportError::Process(format!("{} timed out", program)))?
        .map_err(|e| ImportError::Process(format!("Failed to start {}: {}", program, e)))?;

    if !output.status.success() {
        return Err(ImportError::Process(format!(
            "{} exited with {}",
            program, output.status
        )));
    }
    let mut text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if text.is_empty() {
        // python 2 把版本写到 stderr
        text = String::from_utf8_lossy(&output.stderr).trim().to_string();
    }
    Ok(text)
}

async fn check_python(python: &str) -> ToolStatus {
    match run_check(python, &["--version"]).await {
        Ok(version) => ToolStatus {
            available: true,
            version: Some(version),
            message: "ok".to_string(),
        },
        Err(e) => {
            debug!("[System] Python check failed: {}", e);
            ToolStatus {
                available: false,
                version: None,
                message: "Python not found".to_string(),
            }
        }
    }
}

async fn check_ffmpeg(ffmpeg: &str) -> ToolStatus {
    match run_check(ffmpeg, &["-version"]).await {
        Ok(output) => ToolStatus {
            available: true,
            version: Some(
                FFMPEG_VERSION_RE
                    .captures(&output)
                    .map(|c| c[1].to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
            ),
            message: "ok".to_string(),
        },
        Err(e) => {
            debug!("[System] FFmpeg check failed: {}", e);
            ToolStatus {
                available: false,
                version: None,
                message: "FFmpeg not found".to_string(),
            }
        }
    }
}

async fn check_whisper(python: &str) -> ToolStatus {
    let available = run_check(python, &["-c", "import whisper; print(\"OK\")"])
        .await
        .inspect_err(|e| debug!("[System] Whisper check failed: {}", e))
        .is_ok();
    let message = if available { "installed" } else { "Whisper not installed" };
    ToolStatus {
        available,
        version: None,
        message: message.to_string(),
    }
}

async fn check_storage(storage_dir: &Path) -> StorageStatus {
    let writable = async {
        tokio::fs::create_dir_all(storage_dir).await?;
        let marker = storage_dir.join(WRITE_CHECK_FILE);
        tokio::fs::write(&marker, b"ok").await?;
        tokio::fs::remove_file(&marker).await
    }
    .await;

    match writable {
        Ok(()) => StorageStatus {
            available: true,
            path: storage_dir.to_path_buf(),
            used_space: dir_size(storage_dir).await.ok().map(format_bytes),
            message: "ok".to_string(),
        },
        Err(e) => {
            warn!("[System] Storage {} is not writable: {}", storage_dir.display(), e);
            StorageStatus {
                available: false,
                path: storage_dir.to_path_buf(),
                used_space: None,
                message: format!("Storage not writable: {}", e),
            }
        }
    }
}

/// 目录下所有文件大小之和，不跟随符号链接
async fn dir_size(root: &Path) -> std::io::Result<u64> {
    let mut total = 0;
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                total += entry.metadata().await?.len();
            }
        }
    }
    Ok(total)
}

async fn check_queue(persistence: &PersistenceManager) -> QueueStatus {
    match persistence.load_tasks().await {
        Ok(tasks) => QueueStatus {
            available: true,
            pending_jobs: tasks.iter().filter(|t| t.status == TaskStatus::Pending).count(),
            processing_jobs: tasks.iter().filter(|t| t.status == TaskStatus::Running).count(),
            message: "ok".to_string(),
        },
        Err(e) => {
            warn!("[System] Queue check failed: {}", e);
            QueueStatus {
                available: false,
                pending_jobs: 0,
                processing_jobs: 0,
                message: format!("Queue check failed: {}", e),
            }
        }
    }
}
