use crate::resource::{ResourceItem, ResourceKind};
use crate::status::ResourceStatus;
use crate::task::{TaskSnapshot, TaskType};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

//---------------------------------------------------------------------------------
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportTaskRequest {
    pub task_type: TaskType,
    pub name: String,
    pub total_items: u64,
    pub config: Value,
}

impl ImportTaskRequest {
    /// 新建 Builder，必须提供类型与名称
    pub fn builder(task_type: TaskType, name: impl Into<String>) -> ImportTaskRequestBuilder {
        ImportTaskRequestBuilder {
            task_type,
            name: name.into(),
            total_items: 0,
            config: Map::new(),
        }
    }

    pub fn into_snapshot(self) -> TaskSnapshot {
        TaskSnapshot::new(self.task_type, self.name, self.config, self.total_items)
    }
}

pub struct ImportTaskRequestBuilder {
    task_type: TaskType,
    name: String,
    total_items: u64,
    config: Map<String, Value>,
}

impl ImportTaskRequestBuilder {
    pub fn total_items(mut self, total: u64) -> Self {
        self.total_items = total;
        self
    }

    /// 整体替换配置，非对象值会被忽略
    pub fn config(mut self, config: Value) -> Self {
        if let Value::Object(map) = config {
            self.config = map;
        }
        self
    }

    pub fn option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> ImportTaskRequest {
        ImportTaskRequest {
            task_type: self.task_type,
            name: self.name,
            total_items: self.total_items,
            config: Value::Object(self.config),
        }
    }
}

//---------------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ResourceItemRequest {
    pub task_id: Option<u32>,
    pub name: String,
    pub kind: ResourceKind,
    pub source: Option<String>,
    pub status: ResourceStatus,
    pub file_path: Option<String>,
    pub file_size: Option<u64>,
    pub content: Option<String>,
    pub metadata: Value,
    pub count: u64,
}

impl ResourceItemRequest {
    pub fn builder(name: impl Into<String>, kind: ResourceKind) -> ResourceItemRequestBuilder {
        ResourceItemRequestBuilder {
            inner: ResourceItemRequest {
                task_id: None,
                name: name.into(),
                kind,
                source: None,
                status: ResourceStatus::Pending,
                file_path: None,
                file_size: None,
                content: None,
                metadata: Value::Object(Map::new()),
                count: 0,
            },
        }
    }

    pub fn into_item(self) -> ResourceItem {
        let mut item = ResourceItem::new(self.task_id, self.name, self.kind);
        item.source = self.source;
        item.file_path = self.file_path;
        item.file_size = self.file_size;
        item.content = self.content;
        item.metadata = self.metadata;
        item.count = self.count;
        item.status = self.status;
        if self.status == ResourceStatus::Completed {
            item.progress = 100.0;
        }
        item
    }
}

pub struct ResourceItemRequestBuilder {
    inner: ResourceItemRequest,
}

impl ResourceItemRequestBuilder {
    pub fn task_id(mut self, task_id: u32) -> Self {
        self.inner.task_id = Some(task_id);
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.inner.source = Some(source.into());
        self
    }

    pub fn status(mut self, status: ResourceStatus) -> Self {
        self.inner.status = status;
        self
    }

    pub fn file(mut self, path: impl Into<String>, size: u64) -> Self {
        self.inner.file_path = Some(path.into());
        self.inner.file_size = Some(size);
        self
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.inner.content = Some(content.into());
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.inner.metadata = metadata;
        self
    }

    pub fn count(mut self, count: u64) -> Self {
        self.inner.count = count;
        self
    }

    pub fn build(self) -> ResourceItemRequest {
        self.inner
    }
}
