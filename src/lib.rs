pub mod backup;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod jobs;
pub mod manager;
pub mod persistence;
pub mod progress;
pub mod repository;
pub mod request;
pub mod resource;
pub mod script;
pub mod stats;
pub mod status;
pub mod storage;
pub mod system;
pub mod task;
pub mod worker;

pub use config::ImportConfig;
pub use error::ImportError;
pub use stats::ImportStats;
pub use status::{BackupStatus, ResourceStatus, TaskStatus};

pub use backup::{BackupService, ServiceResponse};
pub use events::TaskEvent;
pub use jobs::{JobContext, JobExecutor, JobOutcome};
pub use manager::{ImportManager, TaskDetail};
pub use request::{ImportTaskRequest, ResourceItemRequest};
pub use resource::{ResourceItem, ResourceKind};
pub use task::{ImportTask, TaskSnapshot, TaskType};
