use crate::config::ApiImportConfig;
use crate::error::ImportError;
use crate::jobs::{JobContext, JobExecutor, JobOutcome, config_str, config_u64, require_str};
use crate::request::ResourceItemRequest;
use crate::resource::ResourceKind;
use crate::status::ResourceStatus;
use crate::task::{ImportTask, TaskType};
use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use url::Url;

/// 单批请求的分页参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchQuery {
    pub offset: u64,
    pub limit: u64,
    pub format: String,
}

/// 外部数据源，非 2xx 响应返回 `HttpStatus`
#[async_trait]
pub trait ImportApiClient: Send + Sync {
    async fn fetch_batch(
        &self,
        endpoint: &str,
        api_key: &str,
        query: &BatchQuery,
    ) -> Result<String, ImportError>;
}

pub struct ReqwestApiClient {
    client: Client,
}

impl ReqwestApiClient {
    pub fn new(config: &ApiImportConfig) -> Result<Self, ImportError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ImportApiClient for ReqwestApiClient {
    async fn fetch_batch(
        &self,
        endpoint: &str,
        api_key: &str,
        query: &BatchQuery,
    ) -> Result<String, ImportError> {
        let response = self
            .client
            .get(endpoint)
            .bearer_auth(api_key)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ImportError::HttpStatus(
                status.as_u16(),
                status.canonical_reason().unwrap_or("unknown").to_string(),
            ));
        }
        Ok(response.text().await?)
    }
}

/// 按固定批量分页拉取，任一批失败则整个任务失败
pub struct ApiImportExecutor {
    client: Arc<dyn ImportApiClient>,
}

impl ApiImportExecutor {
    pub fn new(client: Arc<dyn ImportApiClient>) -> Self {
        Self { client }
    }

    pub fn from_config(config: &ApiImportConfig) -> Result<Self, ImportError> {
        Ok(Self::new(Arc::new(ReqwestApiClient::new(config)?)))
    }
}

/// ceil(batch_size / items_per_batch)
pub fn batch_count(batch_size: u64, items_per_batch: u64) -> u64 {
    batch_size.div_ceil(items_per_batch.max(1))
}

#[async_trait]
impl JobExecutor for ApiImportExecutor {
    fn task_type(&self) -> TaskType {
        TaskType::ApiImport
    }

    async fn handle(&self, task: &Arc<ImportTask>, ctx: &JobContext) -> Result<JobOutcome, ImportError> {
        let config = &task.config;
        let endpoint = require_str(config, "endpoint")?;
        let api_key = require_str(config, "api_key")?;
        Url::parse(endpoint)?;
        let format = config_str(config, "format", "json");
        let batch_size = config_u64(config, "batch_size", 100);
        let kind = config_str(config, "content_type", "material")
            .parse()
            .unwrap_or(ResourceKind::Material);

        let per_batch = ctx.config.api_import.items_per_batch.max(1);
        let total_batches = batch_count(batch_size, per_batch);
        task.set_total_items(batch_size).await?;
        task.add_log(&format!("Importing from API: {}", endpoint)).await?;

        let mut processed = 0u64;
        for batch in 0..total_batches {
            task.checkpoint().await?;
            task.add_log(&format!("Processing batch {}/{}", batch + 1, total_batches))
                .await?;

            let query = BatchQuery {
                offset: batch * per_batch,
                limit: per_batch,
                format: format.to_string(),
            };
            let body = match self.client.fetch_batch(endpoint, api_key, &query).await {
                Ok(body) => body,
                Err(e) => {
                    task.add_log(&format!("Batch failed: {}", e)).await?;
                    return Err(e);
                }
            };

            let batch_items = per_batch.min(batch_size - processed);
            processed += batch_items;
            debug!(
                "[Task {}] Batch {} returned {} bytes",
                task.id,
                batch + 1,
                body.len()
            );

            let request = ResourceItemRequest::builder(
                format!("{} batch {}", endpoint, batch + 1),
                kind,
            )
            .task_id(task.id)
            .source(endpoint)
            .status(ResourceStatus::Completed)
            .content(body)
            .count(batch_items)
            .metadata(json!({
                "offset": query.offset,
                "limit": query.limit,
                "format": query.format,
            }))
            .build();
            ctx.create_resource(request).await?;

            task.update_progress(Some(processed)).await?;
            task.add_log(&format!("Batch completed, imported {} records", batch_items))
                .await?;

            if processed >= batch_size {
                break;
            }
        }

        Ok(JobOutcome::new(
            processed,
            format!("API import finished, {} records imported", processed),
        ))
    }
}
