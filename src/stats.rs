use crate::error::ImportError;
use crate::persistence::PersistenceManager;
use crate::status::TaskStatus;
use chrono::Local;
use log::debug;
use serde::{Deserialize, Serialize};

/// 导入统计
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportStats {
    pub total_resources: usize,
    pub running_tasks: usize,
    /// 本地日期当天创建的资源数
    pub today_imported: usize,
    pub success_rate: f64,
}

impl ImportStats {
    pub async fn collect(persistence: &PersistenceManager) -> Result<Self, ImportError> {
        let tasks = persistence.load_tasks().await?;
        let resources = persistence.load_all_resources().await?;
        let today = Local::now().date_naive();

        let running_tasks = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Running)
            .count();
        let completed = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .count();
        let today_imported = resources
            .iter()
            .filter(|r| {
                r.created_at
                    .map(|dt| dt.with_timezone(&Local).date_naive() == today)
                    .unwrap_or(false)
            })
            .count();

        let stats = Self {
            total_resources: resources.len(),
            running_tasks,
            today_imported,
            success_rate: success_rate(completed, tasks.len()),
        };
        debug!("[Manager] Stats: {:?}", stats);
        Ok(stats)
    }
}

/// 无任务时为 100.0，否则保留一位小数
pub fn success_rate(completed: usize, total: usize) -> f64 {
    if total == 0 {
        return 100.0;
    }
    let rate = completed as f64 / total as f64 * 100.0;
    (rate * 10.0).round() / 10.0
}

/// 将字节数格式化为 1024 进制、最多两位小数的字符串
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size > 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    let rounded = (size * 100.0).round() / 100.0;
    format!("{} {}", rounded, UNITS[unit])
}
