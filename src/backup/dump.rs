use crate::config::{BackupConfig, DatabaseConfig};
use crate::error::ImportError;
use async_trait::async_trait;
use log::debug;
use std::fmt;
use std::process::Stdio;
use std::str::FromStr;
use std::time::Duration;
use tokio::process::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseDriver {
    Postgres,
    MySql,
    Sqlite,
}

impl DatabaseDriver {
    pub fn as_str(self) -> &'static str {
        match self {
            DatabaseDriver::Postgres => "pgsql",
            DatabaseDriver::MySql => "mysql",
            DatabaseDriver::Sqlite => "sqlite",
        }
    }
}

impl fmt::Display for DatabaseDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DatabaseDriver {
    type Err = ImportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pgsql" | "postgres" | "postgresql" => Ok(DatabaseDriver::Postgres),
            "mysql" | "mariadb" => Ok(DatabaseDriver::MySql),
            "sqlite" => Ok(DatabaseDriver::Sqlite),
            other => Err(ImportError::UnsupportedDriver(other.to_string())),
        }
    }
}

/// 导出工具的完整调用参数，密码只经由环境变量传递
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpCommand {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
}

impl DumpCommand {
    pub fn for_database(
        backup: &BackupConfig,
        database: &DatabaseConfig,
    ) -> Result<Self, ImportError> {
        match database.driver.parse::<DatabaseDriver>()? {
            DatabaseDriver::Postgres => Ok(Self {
                program: backup.pg_dump_path.clone(),
                args: vec![
                    "-h".to_string(),
                    database.host.clone(),
                    "-p".to_string(),
                    database.port.to_string(),
                    "-U".to_string(),
                    database.username.clone(),
                    "-d".to_string(),
                    database.database.clone(),
                    "--no-owner".to_string(),
                    "--no-privileges".to_string(),
                    "--clean".to_string(),
                    "--if-exists".to_string(),
                ],
                envs: vec![("PGPASSWORD".to_string(), database.password.clone())],
            }),
            DatabaseDriver::MySql => Ok(Self {
                program: backup.mysqldump_path.clone(),
                args: vec![
                    "-h".to_string(),
                    database.host.clone(),
                    "-P".to_string(),
                    database.port.to_string(),
                    "-u".to_string(),
                    database.username.clone(),
                    "--single-transaction".to_string(),
                    "--routines".to_string(),
                    "--triggers".to_string(),
                    database.database.clone(),
                ],
                envs: vec![("MYSQL_PWD".to_string(), database.password.clone())],
            }),
            DatabaseDriver::Sqlite => Err(ImportError::UnsupportedDriver(
                DatabaseDriver::Sqlite.to_string(),
            )),
        }
    }
}

/// 生成数据库快照内容
#[async_trait]
pub trait DatabaseDumper: Send + Sync {
    async fn dump(&self, database: &DatabaseConfig) -> Result<Vec<u8>, ImportError>;
}

/// 调用 pg_dump / mysqldump，stdout 即为备份内容
pub struct CommandDumper {
    config: BackupConfig,
}

impl CommandDumper {
    pub fn new(config: BackupConfig) -> Self {
        Self { config }
    }

    fn timeout(&self) -> Duration {
        self.config.dump_timeout()
    }
}

#[async_trait]
impl DatabaseDumper for CommandDumper {
    async fn dump(&self, database: &DatabaseConfig) -> Result<Vec<u8>, ImportError> {
        let command = DumpCommand::for_database(&self.config, database)?;
        debug!("[Backup] Running {} {:?}", command.program, command.args);

        let child = Command::new(&command.program)
            .args(&command.args)
            .envs(command.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ImportError::Process(format!("Failed to start {}: {}", command.program, e))
            })?;

        let output = tokio::time::timeout(self.timeout(), child.wait_with_output())
            .await
            .map_err(|_| {
                ImportError::Timeout(format!(
                    "{} did not finish within {}",
                    command.program,
                    humantime::format_duration(self.timeout())
                ))
            })??;

        if !output.status.success() {
            return Err(ImportError::Process(format!(
                "{} failed ({}): {}",
                command.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        if output.stdout.is_empty() {
            return Err(ImportError::Process(format!(
                "{} produced no output",
                command.program
            )));
        }

        Ok(output.stdout)
    }
}
