use crate::backup::{BackupService, ServiceResponse};
use crate::config::ImportConfig;
use crate::error::ImportError;
use crate::manager::{DEFAULT_RESOURCES_PER_PAGE, ImportManager};
use crate::system::ToolStatus;
use crate::persistence::PersistenceType;
use crate::progress::ProgressBoard;
use crate::request::ImportTaskRequest;
use crate::status::TaskStatus;
use crate::storage::LocalStorage;
use crate::task::TaskType;
use bytesize::ByteSize;
use chrono::Local;
use clap::{Parser, Subcommand};
use log::{debug, info};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser, Debug)]
#[command(name = "importkit")]
#[command(about = "Import/extraction jobs and database backups", long_about = None)]
pub struct Cli {
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[arg(short, long, value_name = "DIR", default_value = "storage")]
    pub storage_dir: PathBuf,

    /// 任务数据库，默认 <storage_dir>/importkit.db
    #[arg(long, value_name = "FILE")]
    pub db: Option<PathBuf>,

    #[arg(short, long, default_value_t = 4)]
    pub workers: usize,

    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// Scrape pages through the scraper script
    Scrape {
        #[arg(required = true, num_args = 1..)]
        urls: Vec<String>,
        #[arg(long, default_value = "Web scraping")]
        name: String,
        #[arg(long, default_value_t = 10)]
        max_pages: u64,
        #[arg(long, default_value = "course")]
        content_type: String,
        #[arg(long, default_value_t = 1000)]
        delay_ms: u64,
        #[arg(long)]
        include_images: bool,
        #[arg(long)]
        include_audio: bool,
    },
    /// Register local files as learning materials
    Upload {
        #[arg(required = true, num_args = 1..)]
        files: Vec<PathBuf>,
        #[arg(long, default_value = "File upload")]
        name: String,
    },
    /// Import records from a remote API in batches
    ApiImport {
        endpoint: String,
        #[arg(long)]
        api_key: String,
        #[arg(long, default_value = "json")]
        format: String,
        #[arg(long, default_value_t = 100)]
        batch_size: u64,
        #[arg(long, default_value = "material")]
        content_type: String,
        #[arg(long, default_value = "API import")]
        name: String,
    },
    /// Extract audio and subtitles from a video segment
    Extract {
        video_url: String,
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
        #[arg(long)]
        no_ai_subtitle: bool,
        #[arg(long, default_value = "Video extraction")]
        name: String,
    },
    /// List tasks
    Tasks,
    /// Show a task with its logs and resources
    Task { id: u32 },
    /// Resume a paused task, or take over one left running by a dead process
    Resume { id: u32 },
    /// Mark tasks left running by a dead process as paused
    Recover,
    Cancel { id: u32 },
    /// Retry a failed task
    Retry { id: u32 },
    Delete { id: u32 },
    /// Delete one resource and its file
    DeleteResource { id: u32 },
    Stats,
    /// List resources, newest first
    Resources {
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long, default_value_t = DEFAULT_RESOURCES_PER_PAGE)]
        per_page: usize,
    },
    /// Check python, ffmpeg, whisper, storage and the task queue
    Status,
    /// Create a database backup
    Backup {
        #[arg(short, long)]
        description: Option<String>,
    },
    /// List database backups
    Backups,
    Restore { filename: String },
    DeleteBackup { filename: String },
}

impl Commands {
    /// 提交类命令对应的任务请求
    pub fn task_request(&self) -> Option<ImportTaskRequest> {
        let request = match self {
            Commands::Scrape {
                urls,
                name,
                max_pages,
                content_type,
                delay_ms,
                include_images,
                include_audio,
            } => ImportTaskRequest::builder(TaskType::WebScraping, name)
                .option("urls", urls.clone())
                .option("max_pages", *max_pages)
                .option("content_type", content_type.as_str())
                .option("delay_ms", *delay_ms)
                .option("include_images", *include_images)
                .option("include_audio", *include_audio)
                .total_items(urls.len().min(*max_pages as usize) as u64)
                .build(),
            Commands::ApiImport {
                endpoint,
                api_key,
                format,
                batch_size,
                content_type,
                name,
            } => ImportTaskRequest::builder(TaskType::ApiImport, name)
                .option("endpoint", endpoint.as_str())
                .option("api_key", api_key.as_str())
                .option("format", format.as_str())
                .option("batch_size", *batch_size)
                .option("content_type", content_type.as_str())
                .total_items(*batch_size)
                .build(),
            Commands::Extract {
                video_url,
                start,
                end,
                no_ai_subtitle,
                name,
            } => ImportTaskRequest::builder(TaskType::VideoExtraction, name)
                .option("video_url", video_url.as_str())
                .option("start_time", start.as_str())
                .option("end_time", end.as_str())
                .option("use_ai_subtitle", !*no_ai_subtitle)
                .build(),
            _ => return None,
        };
        Some(request)
    }
}

impl Cli {
    pub fn import_config(&self) -> Result<ImportConfig, ImportError> {
        if let Some(path) = &self.config {
            return Ok(ImportConfig::from_file(path)?);
        }
        let db = self
            .db
            .clone()
            .unwrap_or_else(|| self.storage_dir.join("importkit.db"));
        Ok(ImportConfig::builder()
            .storage_dir(&self.storage_dir)
            .max_concurrent_jobs(self.workers)
            .persistence_type(PersistenceType::Sqlite(db))
            .debug(self.verbose)
            .build()?)
    }
}

pub async fn run(cli: Cli) -> Result<(), ImportError> {
    let config = cli.import_config()?;
    info!("Storage directory: {}", config.storage_dir.display());

    let manager = ImportManager::new(config)?;
    manager.init().await?;

    match cli.command {
        Commands::Upload { files, name } => {
            let request = stage_uploads(&manager.config.storage_dir, &files, &name).await?;
            submit_and_wait(&manager, request).await
        }
        Commands::Tasks => {
            for task in manager.list_tasks().await {
                println!(
                    "{:>4}  {:<16} {:<10} {:>5.1}%  {}",
                    task.id,
                    task.task_type.as_str(),
                    task.status.as_str(),
                    task.progress,
                    task.name
                );
            }
            Ok(())
        }
        Commands::Task { id } => {
            let detail = manager.task_detail(id).await?;
            let task = detail.task;
            println!("#{} {} [{}] {}", task.id, task.name, task.task_type, task.status);
            println!(
                "progress: {:.1}% ({}/{})",
                task.progress, task.items_processed, task.total_items
            );
            if let Some(message) = &task.error_message {
                println!("error: {}", message);
            }
            println!("logs:");
            for line in &task.logs {
                println!("  {}", line);
            }
            println!("resources:");
            for resource in &detail.resources {
                println!(
                    "  {:>4}  {:<17} {:<10} {:>10}  {}",
                    resource.id,
                    resource.kind_label(),
                    resource.status_label(),
                    resource.readable_file_size(),
                    resource.name
                );
            }
            Ok(())
        }
        Commands::Resume { id } => {
            manager.resume(id).await?;
            follow(&manager, id).await
        }
        Commands::Recover => {
            let recovered = manager.recover_interrupted().await?;
            if recovered.is_empty() {
                println!("No interrupted tasks");
            }
            for id in recovered {
                println!("Task {} restored as paused", id);
            }
            Ok(())
        }
        Commands::Cancel { id } => {
            manager.cancel(id).await?;
            println!("Task {} cancelled", id);
            Ok(())
        }
        Commands::Retry { id } => {
            manager.retry(id).await?;
            follow(&manager, id).await
        }
        Commands::Delete { id } => {
            manager.delete_task(id).await?;
            println!("Task {} deleted", id);
            Ok(())
        }
        Commands::DeleteResource { id } => {
            manager.delete_resource(id).await?;
            println!("Resource {} deleted", id);
            Ok(())
        }
        Commands::Stats => {
            let stats = manager.stats().await?;
            println!("total resources: {}", stats.total_resources);
            println!("running tasks:   {}", stats.running_tasks);
            println!("imported today:  {}", stats.today_imported);
            println!("success rate:    {:.1}%", stats.success_rate);
            Ok(())
        }
        Commands::Resources { page, per_page } => {
            let listing = manager.list_resources(page, per_page).await?;
            for resource in &listing.items {
                println!(
                    "{:>4}  {:<17} {:<10} {:>10}  {}",
                    resource.id,
                    resource.kind_label(),
                    resource.status_label(),
                    resource.readable_file_size(),
                    resource.name
                );
            }
            println!(
                "page {}/{} ({} resources)",
                listing.page, listing.last_page, listing.total
            );
            Ok(())
        }
        Commands::Status => {
            let status = manager.system_status().await?;
            print_tool("python", &status.python);
            print_tool("ffmpeg", &status.ffmpeg);
            print_tool("whisper", &status.whisper);
            println!(
                "{:<8} {:<5} {} ({}, used {})",
                "storage",
                status.storage.available,
                status.storage.message,
                status.storage.path.display(),
                status.storage.used_space.as_deref().unwrap_or("N/A")
            );
            println!(
                "{:<8} {:<5} {} ({} pending, {} running)",
                "queue",
                status.queue.available,
                status.queue.message,
                status.queue.pending_jobs,
                status.queue.processing_jobs
            );
            if status.ready_for_extraction() {
                Ok(())
            } else {
                Err(ImportError::Other("System is not ready for extraction".into()))
            }
        }
        Commands::Backup { description } => {
            let service = BackupService::new(&manager.config, manager.persistence()?)?;
            let response = service.backup(description.as_deref()).await;
            if let Some(backup) = &response.data {
                println!(
                    "{} ({}, {} tables, {})",
                    backup.filename,
                    backup.file_size_human.as_deref().unwrap_or("N/A"),
                    backup.tables_count,
                    backup.duration_human()
                );
            }
            report(response)
        }
        Commands::Backups => {
            let service = BackupService::new(&manager.config, manager.persistence()?)?;
            let response = service.list_backups().await;
            for backup in response.data.iter().flatten() {
                println!(
                    "{:<40} {:<9} {:>10}  {}",
                    backup.filename,
                    backup.status.as_str(),
                    backup.file_size_human.as_deref().unwrap_or("N/A"),
                    backup.description.as_deref().unwrap_or("")
                );
            }
            report(response)
        }
        Commands::Restore { filename } => {
            let service = BackupService::new(&manager.config, manager.persistence()?)?;
            report(service.restore(&filename).await)
        }
        Commands::DeleteBackup { filename } => {
            let service = BackupService::new(&manager.config, manager.persistence()?)?;
            report(service.delete_backup(&filename).await)
        }
        command => match command.task_request() {
            Some(request) => submit_and_wait(&manager, request).await,
            None => Err(ImportError::Other(format!("Unhandled command {:?}", command))),
        },
    }
}

/// 复制到 `uploads/` 下并生成 file-upload 请求
async fn stage_uploads(
    storage_dir: &Path,
    files: &[PathBuf],
    name: &str,
) -> Result<ImportTaskRequest, ImportError> {
    let storage = LocalStorage::new(storage_dir);
    let prefix = Local::now().format("%Y%m%d%H%M%S");
    let mut descriptors = Vec::with_capacity(files.len());

    for path in files {
        let original_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| ImportError::InvalidPath(path.display().to_string()))?;
        let contents = tokio::fs::read(path).await?;
        let stored_path = format!("uploads/{}_{}", prefix, original_name);
        storage.put(&stored_path, &contents).await?;
        debug!(
            "Staged {} as {} ({})",
            path.display(),
            stored_path,
            ByteSize(contents.len() as u64)
        );
        descriptors.push(json!({
            "original_name": original_name,
            "stored_path": stored_path,
            "size": contents.len(),
        }));
    }

    Ok(ImportTaskRequest::builder(TaskType::FileUpload, name)
        .option("files", descriptors)
        .total_items(files.len() as u64)
        .build())
}

async fn submit_and_wait(
    manager: &Arc<ImportManager>,
    request: ImportTaskRequest,
) -> Result<(), ImportError> {
    let id = manager.create_task(request).await?;
    println!("Task {} created", id);
    manager.dispatch(id).await?;
    follow(manager, id).await
}

/// 显示进度条直到任务的执行器退出
async fn follow(manager: &Arc<ImportManager>, id: u32) -> Result<(), ImportError> {
    let board = Arc::new(ProgressBoard::new());
    let name = manager
        .get_task(id)
        .map(|t| t.name.clone())
        .unwrap_or_default();
    board.add_task(id, &name);

    let mut rx = manager.subscribe_events();
    let listener = {
        let board = Arc::clone(&board);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) if event.task_id() == id => board.apply(&event),
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }
        })
    };

    let status = manager.wait_for_task(id).await?;
    listener.abort();
    if let Some(task) = board.get_task(id) {
        task.finish(status);
    }

    let detail = manager.task_detail(id).await?;
    match status {
        TaskStatus::Completed => {
            println!(
                "Task {} completed, {} resources created",
                id,
                detail.resources.len()
            );
            Ok(())
        }
        TaskStatus::Paused => {
            println!("Task {} paused", id);
            Ok(())
        }
        other => Err(ImportError::Other(format!(
            "Task {} {}: {}",
            id,
            other,
            detail.task.error_message.as_deref().unwrap_or("no error message")
        ))),
    }
}

fn print_tool(name: &str, tool: &ToolStatus) {
    println!(
        "{:<8} {:<5} {} {}",
        name,
        tool.available,
        tool.message,
        tool.version.as_deref().unwrap_or("")
    );
}

fn report<T>(response: ServiceResponse<T>) -> Result<(), ImportError> {
    if response.success {
        println!("{}", response.message);
        Ok(())
    } else {
        Err(ImportError::Other(response.message))
    }
}
