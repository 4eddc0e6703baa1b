pub mod local;
pub mod s3;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

pub use local::{LocalFile, LocalTree};
pub use s3::S3Storage;

// ============ 公共常量 ============

/// 非 IO 操作超时（秒）- stat, delete 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- read, write 等
pub const IO_TIMEOUT_SECS: u64 = 300;
/// 进度回调之间的最小字节数
pub const MIN_PROGRESS_CHUNK: u64 = 64 * 1024;

/// 传输进度回调：(已传输字节, 总字节)
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// 远程对象描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub name: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    /// 去掉引号的 etag，单段上传时就是内容 md5
    pub etag: Option<String>,
    pub is_dir: bool,
}

impl ObjectInfo {
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            last_modified: None,
            etag: None,
            is_dir: false,
        }
    }

    pub fn with_modified(mut self, modified: DateTime<Utc>) -> Self {
        self.last_modified = Some(modified);
        self
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }
}

/// 对象存储抽象接口
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// 列出前缀下的对象；非递归时只返回一层，子目录以 `/` 结尾
    async fn list(&self, prefix: &str, recursive: bool) -> Result<Vec<ObjectInfo>>;

    /// 获取对象元数据，不存在时返回 None
    async fn stat(&self, key: &str) -> Result<Option<ObjectInfo>>;

    /// 下载对象写入 dest，返回字节数
    async fn get_object(
        &self,
        key: &str,
        dest: &mut (dyn AsyncWrite + Send + Unpin),
        progress: Option<ProgressFn>,
    ) -> Result<u64>;

    /// 从 source 上传对象；overwrite 为 false 且对象已存在时失败
    async fn put_object(
        &self,
        key: &str,
        source: &mut (dyn AsyncRead + Send + Unpin),
        size: u64,
        overwrite: bool,
        progress: Option<ProgressFn>,
    ) -> Result<u64>;

    async fn delete_object(&self, key: &str) -> Result<()>;

    /// 存储端复制，返回新对象；目标不存在时返回 None
    async fn copy_object(&self, from: &str, to: &str) -> Result<Option<ObjectInfo>>;

    /// 检查存储是否可访问
    async fn check(&self) -> Result<()>;

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 根据总大小和回调次数计算每次回调之间的字节数
pub fn progress_chunk(total: u64, steps: usize) -> u64 {
    let steps = steps.max(1) as u64;
    (total / steps).max(MIN_PROGRESS_CHUNK)
}
