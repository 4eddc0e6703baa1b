use super::{progress_chunk, ObjectInfo, ObjectStore, ProgressFn, IO_TIMEOUT_SECS, OP_TIMEOUT_SECS};
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use futures::TryStreamExt;
use opendal::{layers::TimeoutLayer, Metadata, Metakey, Operator};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

/// 分段上传时每段的大小，S3 要求除最后一段外不小于 5MB
const WRITE_CHUNK_SIZE: usize = 8 * 1024 * 1024;

pub struct S3Storage {
    operator: Operator,
    name: String,
    progress_steps: usize,
}

impl S3Storage {
    pub fn new(
        bucket: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
        endpoint: Option<&str>,
    ) -> Result<Self> {
        use opendal::services::S3;

        let mut builder = S3::default()
            .bucket(bucket)
            .region(region)
            .access_key_id(access_key)
            .secret_access_key(secret_key);

        if let Some(ep) = endpoint {
            builder = builder.endpoint(ep);
        }

        // 添加超时层
        let operator = Operator::new(builder)?
            .layer(
                TimeoutLayer::default()
                    .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                    .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
            )
            .finish();

        Ok(Self::from_operator(operator, format!("s3://{}", bucket)))
    }

    /// 使用已构建的 Operator（测试中使用 memory 服务）
    pub fn from_operator(operator: Operator, name: impl Into<String>) -> Self {
        Self {
            operator,
            name: name.into(),
            progress_steps: 10,
        }
    }

    /// 单个对象传输期间的进度回调次数
    pub fn with_progress_steps(mut self, steps: usize) -> Self {
        self.progress_steps = steps.max(1);
        self
    }

    fn object_info(path: &str, meta: &Metadata) -> ObjectInfo {
        ObjectInfo {
            name: path.trim_start_matches('/').to_string(),
            size: meta.content_length(),
            last_modified: meta.last_modified(),
            etag: meta.etag().map(|s| s.trim_matches('"').to_string()),
            is_dir: meta.is_dir() || path.ends_with('/'),
        }
    }

    async fn write_all(
        &self,
        key: &str,
        source: &mut (dyn AsyncRead + Send + Unpin),
        size: u64,
        progress: Option<&ProgressFn>,
    ) -> Result<u64> {
        let mut writer = self
            .operator
            .writer_with(key)
            .chunk(WRITE_CHUNK_SIZE)
            .await?;

        let chunk = progress_chunk(size, self.progress_steps) as usize;
        let mut buffer = vec![0u8; chunk];
        let mut sent = 0u64;

        let result: Result<()> = async {
            loop {
                let n = source.read(&mut buffer).await?;
                if n == 0 {
                    break;
                }
                writer.write(buffer[..n].to_vec()).await?;
                sent += n as u64;
                if let Some(cb) = progress {
                    cb(sent, size);
                }
            }
            writer.close().await?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            if let Err(abort_err) = writer.abort().await {
                warn!("中止上传失败 {}: {}", key, abort_err);
            }
            return Err(e);
        }

        if size == 0 {
            if let Some(cb) = progress {
                cb(0, 0);
            }
        }
        Ok(sent)
    }
}

#[async_trait]
impl ObjectStore for S3Storage {
    async fn list(&self, prefix: &str, recursive: bool) -> Result<Vec<ObjectInfo>> {
        let mut objects = Vec::new();

        let mut lister = self
            .operator
            .lister_with(prefix)
            .recursive(recursive)
            .metakey(
                Metakey::ContentLength | Metakey::LastModified | Metakey::Mode | Metakey::Etag,
            )
            .await?;

        while let Some(entry) = lister.try_next().await? {
            let path = entry.path().trim_start_matches('/');

            // 跳过根目录和前缀本身
            if path.is_empty() || path == prefix {
                continue;
            }

            objects.push(Self::object_info(path, entry.metadata()));
        }

        debug!("{} 列出 {} 个对象 (前缀: {:?})", self.name, objects.len(), prefix);
        Ok(objects)
    }

    async fn stat(&self, key: &str) -> Result<Option<ObjectInfo>> {
        match self.operator.stat(key).await {
            Ok(meta) => Ok(Some(Self::object_info(key, &meta))),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_object(
        &self,
        key: &str,
        dest: &mut (dyn AsyncWrite + Send + Unpin),
        progress: Option<ProgressFn>,
    ) -> Result<u64> {
        let total = self.operator.stat(key).await?.content_length();
        let step = progress_chunk(total, self.progress_steps);

        let mut offset = 0u64;
        while offset < total {
            let end = (offset + step).min(total);
            let data = self.operator.read_with(key).range(offset..end).await?;
            dest.write_all(&data.to_vec()).await?;
            offset = end;
            if let Some(cb) = &progress {
                cb(offset, total);
            }
        }
        dest.flush().await?;

        if total == 0 {
            if let Some(cb) = &progress {
                cb(0, 0);
            }
        }
        Ok(total)
    }

    async fn put_object(
        &self,
        key: &str,
        source: &mut (dyn AsyncRead + Send + Unpin),
        size: u64,
        overwrite: bool,
        progress: Option<ProgressFn>,
    ) -> Result<u64> {
        if !overwrite && self.stat(key).await?.is_some() {
            return Err(SyncError::transfer(key, "remote object already exists"));
        }
        self.write_all(key, source, size, progress.as_ref()).await
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        // S3 删除不存在的文件不会报错
        self.operator.delete(key).await?;
        Ok(())
    }

    async fn copy_object(&self, from: &str, to: &str) -> Result<Option<ObjectInfo>> {
        if self.operator.info().full_capability().copy {
            self.operator.copy(from, to).await?;
        } else {
            // 不支持服务端复制时退化为读写
            let data = self.operator.read(from).await?;
            self.operator.write(to, data).await?;
        }
        self.stat(to).await
    }

    async fn check(&self) -> Result<()> {
        self.operator.check().await?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn memory_store() -> S3Storage {
        let operator = Operator::new(opendal::services::Memory::default())
            .unwrap()
            .finish();
        S3Storage::from_operator(operator, "memory").with_progress_steps(4)
    }

    async fn put(store: &S3Storage, key: &str, data: &[u8]) {
        let mut source = data;
        store
            .put_object(key, &mut source, data.len() as u64, true, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_put_get_roundtrip_with_progress() {
        let store = memory_store();
        let data = vec![7u8; 300 * 1024];
        let calls = Arc::new(Mutex::new(Vec::new()));
        let recorder = calls.clone();
        let progress: ProgressFn = Arc::new(move |done, total| {
            recorder.lock().unwrap().push((done, total));
        });

        let mut source = data.as_slice();
        let sent = store
            .put_object("dir/a.bin", &mut source, data.len() as u64, false, Some(progress))
            .await
            .unwrap();
        assert_eq!(sent, data.len() as u64);

        let calls = calls.lock().unwrap().clone();
        assert!(calls.len() >= 2);
        assert_eq!(calls.last(), Some(&(data.len() as u64, data.len() as u64)));

        let mut out = Vec::new();
        let received = store.get_object("dir/a.bin", &mut out, None).await.unwrap();
        assert_eq!(received, data.len() as u64);
        assert_eq!(out, data);
    }

    #[tokio::test]
    async fn test_put_without_overwrite_fails_on_existing() {
        let store = memory_store();
        put(&store, "a.txt", b"one").await;

        let mut source: &[u8] = b"two";
        let err = store
            .put_object("a.txt", &mut source, 3, false, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Transfer { .. }));
    }

    #[tokio::test]
    async fn test_list_recursive_and_flat() {
        let store = memory_store();
        put(&store, "a.txt", b"a").await;
        put(&store, "docs/b.txt", b"bb").await;
        put(&store, "docs/deep/c.txt", b"ccc").await;

        let mut files: Vec<_> = store
            .list("", true)
            .await
            .unwrap()
            .into_iter()
            .filter(|o| !o.is_dir)
            .map(|o| (o.name, o.size))
            .collect();
        files.sort();
        assert_eq!(
            files,
            vec![
                ("a.txt".to_string(), 1),
                ("docs/b.txt".to_string(), 2),
                ("docs/deep/c.txt".to_string(), 3),
            ]
        );

        let flat = store.list("docs/", false).await.unwrap();
        assert!(flat.iter().any(|o| o.name == "docs/b.txt" && !o.is_dir));
        assert!(flat.iter().any(|o| o.name == "docs/deep/" && o.is_dir));
        assert!(!flat.iter().any(|o| o.name == "docs/deep/c.txt"));
    }

    #[tokio::test]
    async fn test_copy_and_delete() {
        let store = memory_store();
        put(&store, "old.txt", b"content").await;

        let copied = store.copy_object("old.txt", "new.txt").await.unwrap();
        assert_eq!(copied.map(|o| o.size), Some(7));

        store.delete_object("old.txt").await.unwrap();
        assert!(store.stat("old.txt").await.unwrap().is_none());
        assert!(store.stat("new.txt").await.unwrap().is_some());
    }
}
