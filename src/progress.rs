use crate::events::TaskEvent;
use crate::status::TaskStatus;
use dashmap::DashMap;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

/// 单个导入任务的进度条，长度固定为 100(百分比)
pub struct TaskProgress {
    pub name: String,
    pub progress_bar: ProgressBar,
    pub start_time: Instant,
    end_time: OnceLock<Instant>,
}

impl TaskProgress {
    pub fn new(task_id: u32, name: &str, multi: &MultiProgress) -> Self {
        let pb = multi.add(ProgressBar::new(100));
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos:>3}% {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        pb.enable_steady_tick(Duration::from_millis(100));

        Self {
            name: format!("Task-{task_id} {name}"),
            progress_bar: pb,
            start_time: Instant::now(),
            end_time: OnceLock::new(),
        }
    }

    pub fn update(&self, processed: u64, total: u64, progress: f64) {
        self.progress_bar.set_position(progress.clamp(0.0, 100.0) as u64);
        let items = if total > 0 {
            format!("{}/{}", processed, total)
        } else {
            processed.to_string()
        };
        self.progress_bar.set_message(format!(
            "{} | items={} | elapsed={}",
            self.name,
            items,
            humantime::format_duration(self.elapsed_secs())
        ));
    }

    pub fn set_status(&self, status: &str) {
        self.progress_bar
            .set_message(format!("{} | {}", self.name, status));
    }

    pub fn finish(&self, status: TaskStatus) {
        let _ = self.end_time.set(Instant::now());
        let elapsed = humantime::format_duration(self.elapsed_secs());
        match status {
            TaskStatus::Completed => {
                self.progress_bar.set_position(100);
                self.progress_bar
                    .finish_with_message(format!("{} ✅ Completed in {}", self.name, elapsed));
            }
            other => self
                .progress_bar
                .abandon_with_message(format!("{} ❌ {} after {}", self.name, other, elapsed)),
        }
    }

    pub fn elapsed(&self) -> Duration {
        match self.end_time.get() {
            Some(t) => t.duration_since(self.start_time),
            None => self.start_time.elapsed(),
        }
    }

    fn elapsed_secs(&self) -> Duration {
        Duration::from_secs(self.elapsed().as_secs())
    }
}

/// 按任务事件驱动的一组进度条
pub struct ProgressBoard {
    pub tasks: DashMap<u32, Arc<TaskProgress>>,
    pub multi_progress: MultiProgress,
}

impl Default for ProgressBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressBoard {
    pub fn new() -> Self {
        Self {
            tasks: DashMap::new(),
            multi_progress: MultiProgress::new(),
        }
    }

    /// 不输出到终端
    pub fn hidden() -> Self {
        Self {
            tasks: DashMap::new(),
            multi_progress: MultiProgress::with_draw_target(ProgressDrawTarget::hidden()),
        }
    }

    pub fn add_task(&self, task_id: u32, name: &str) -> Arc<TaskProgress> {
        let task = Arc::new(TaskProgress::new(task_id, name, &self.multi_progress));
        self.tasks.insert(task_id, Arc::clone(&task));
        task
    }

    pub fn get_task(&self, task_id: u32) -> Option<Arc<TaskProgress>> {
        self.tasks.get(&task_id).map(|t| Arc::clone(t.value()))
    }

    /// 未登记的任务忽略
    pub fn apply(&self, event: &TaskEvent) {
        let Some(task) = self.get_task(event.task_id()) else {
            return;
        };
        match event {
            TaskEvent::Started(_) => task.set_status("running"),
            TaskEvent::Progress {
                processed,
                total,
                progress,
                ..
            } => task.update(*processed, *total, *progress),
            TaskEvent::Paused(_) => task.set_status("paused"),
            TaskEvent::Resumed(_) => task.set_status("running"),
            TaskEvent::Failed(_, reason) => task.set_status(&format!("failed: {}", reason)),
            TaskEvent::Finished { status, .. } => task.finish(*status),
            _ => {}
        }
    }
}
