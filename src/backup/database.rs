use crate::config::DatabaseConfig;
use crate::error::ImportError;
use crate::backup::dump::DatabaseDriver;
use async_trait::async_trait;
use log::debug;
use sqlx::AnyPool;
use sqlx::any::AnyPoolOptions;
use tokio::sync::OnceCell;

/// 备份目标库上的查询与恢复
#[async_trait]
pub trait DatabaseClient: Send + Sync {
    async fn tables_count(&self) -> Result<u32, ImportError>;

    /// 原样执行整段 SQL，不包事务
    async fn execute_script(&self, sql: &str) -> Result<(), ImportError>;
}

pub struct SqlxDatabaseClient {
    driver: DatabaseDriver,
    url: String,
    pool: OnceCell<AnyPool>,
}

impl SqlxDatabaseClient {
    pub fn new(config: &DatabaseConfig) -> Result<Self, ImportError> {
        sqlx::any::install_default_drivers();
        Ok(Self {
            driver: config.driver.parse()?,
            url: config.connection_url()?,
            pool: OnceCell::new(),
        })
    }

    /// 首次使用时才建立连接
    async fn pool(&self) -> Result<&AnyPool, ImportError> {
        self.pool
            .get_or_try_init(|| async {
                debug!("[Backup] Connecting to {} database", self.driver);
                AnyPoolOptions::new()
                    .max_connections(1)
                    .connect(&self.url)
                    .await
                    .map_err(ImportError::from)
            })
            .await
    }
}

#[async_trait]
impl DatabaseClient for SqlxDatabaseClient {
    async fn tables_count(&self) -> Result<u32, ImportError> {
        let sql = match self.driver {
            DatabaseDriver::Postgres => {
                "SELECT COUNT(*) FROM information_schema.tables \
                 WHERE table_schema = 'public' AND table_type = 'BASE TABLE'"
            }
            DatabaseDriver::MySql => {
                "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = DATABASE()"
            }
            DatabaseDriver::Sqlite => return Ok(0),
        };

        let count: i64 = sqlx::query_scalar(sql).fetch_one(self.pool().await?).await?;
        Ok(count.max(0) as u32)
    }

    async fn execute_script(&self, sql: &str) -> Result<(), ImportError> {
        let result = sqlx::raw_sql(sql).execute(self.pool().await?).await?;
        debug!("[Backup] Script affected {} rows", result.rows_affected());
        Ok(())
    }
}
