pub mod database;
pub mod dump;
pub mod record;
pub mod service;

pub use database::{DatabaseClient, SqlxDatabaseClient};
pub use dump::{CommandDumper, DatabaseDriver, DatabaseDumper, DumpCommand};
pub use record::DatabaseBackup;
pub use service::{BackupDownload, BackupService, ServiceResponse};
