use super::comparator::{CompareConfig, Direction, FileComparator, FileRecord};
use super::conflict::{Action, ConfirmGate, ConfirmPolicy, Prompter};
use super::file_state::{FileState, ModeSet};
use super::pool::{CancelFlag, PoolConfig, WorkerPool};
use super::progress::StatusSink;
use super::scanner::{remote_prefix, FileScanner, FileTypeFilter, ScanConfig};
use super::task::{Task, TaskContext};
use crate::config::AppConfig;
use crate::error::{Result, SyncError};
use crate::storage::{LocalTree, ObjectInfo, ObjectStore};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// 对比参数
#[derive(Debug, Clone)]
pub struct CompareRequest {
    /// 命令行给出的路径，相对当前目录
    pub path: Option<String>,
    pub recursive: bool,
    pub modes: ModeSet,
    pub file_types: FileTypeFilter,
    pub use_checksum: bool,
    pub case_insensitive: bool,
    pub force: Option<Direction>,
}

impl CompareRequest {
    pub fn new(modes: ModeSet) -> Self {
        Self {
            path: None,
            recursive: false,
            modes,
            file_types: FileTypeFilter::default(),
            use_checksum: true,
            case_insensitive: false,
            force: None,
        }
    }
}

/// 同步参数
#[derive(Debug, Clone)]
pub struct UpdateRequest {
    pub compare: CompareRequest,
    pub policy: ConfirmPolicy,
    /// 本次最多执行的动作数
    pub limit: Option<usize>,
}

/// 同步报告
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateReport {
    /// 差异条数（含相同的文件）
    pub records: usize,
    pub processed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub bytes: u64,
    pub elapsed: Duration,
    pub interrupted: bool,
}

impl UpdateReport {
    pub fn average_speed(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.bytes as f64 / secs
        } else {
            0.0
        }
    }
}

/// 同步引擎
pub struct SyncEngine {
    store: Arc<dyn ObjectStore>,
    tree: LocalTree,
    cwd: PathBuf,
    config: AppConfig,
    cancel: Arc<CancelFlag>,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn ObjectStore>, config: AppConfig, cwd: impl Into<PathBuf>) -> Self {
        let cwd = cwd.into();
        let tree = LocalTree::new(config.local_root(&cwd));
        Self {
            store,
            tree,
            cwd,
            config,
            cancel: Arc::new(CancelFlag::default()),
        }
    }

    pub fn cancel_flag(&self) -> Arc<CancelFlag> {
        self.cancel.clone()
    }

    pub fn store(&self) -> &dyn ObjectStore {
        self.store.as_ref()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            workers: self.config.thread_max_count,
            ended_lines: self.config.ended_output_max_count,
            cancel: self.cancel.clone(),
            ..PoolConfig::default()
        }
    }

    fn task_context(&self) -> Arc<TaskContext> {
        Arc::new(TaskContext::new(self.store.clone(), self.tree.root()))
    }

    /// 对比本地和远程
    pub async fn diff(&self, request: &CompareRequest) -> Result<BTreeMap<String, FileRecord>> {
        let (local_path, key) = self.tree.path_info(request.path.as_deref(), &self.cwd)?;
        let scanner = Arc::new(FileScanner::new(
            self.tree.clone(),
            ScanConfig {
                recursive: request.recursive,
                file_types: request.file_types.clone(),
            },
        ));

        let local_exists = local_path.exists();
        let local = if local_exists {
            let scanner = scanner.clone();
            let path = local_path.clone();
            tokio::task::spawn_blocking(move || scanner.scan_local(&path)).await??
        } else {
            warn!("本地路径不存在: {}", local_path.display());
            Vec::new()
        };

        // 本地不存在时先按单个远程对象查找
        let remote_file = if !local_exists && !key.is_empty() && !key.ends_with('/') {
            self.store.stat(&key).await?.filter(|object| !object.is_dir)
        } else {
            None
        };
        let prefix = match &remote_file {
            Some(_) => key.clone(),
            None => remote_prefix(&local_path, &key),
        };
        let remote = scanner.scan_remote(self.store.as_ref(), &prefix).await?;

        if !local_exists && remote_file.is_none() && remote.is_empty() {
            return Err(SyncError::user(format!(
                "Invalid path {}",
                local_path.display()
            )));
        }

        if local.is_empty() && remote.is_empty() {
            return Ok(BTreeMap::new());
        }

        let config = CompareConfig {
            modes: request.modes.clone(),
            use_checksum: request.use_checksum,
            case_insensitive: request.case_insensitive,
            force: request.force,
            remote_time_offset: chrono::Duration::hours(self.config.remote_time_offset_hours),
        };
        info!("开始对比: {} 个本地文件, {} 个远程对象", local.len(), remote.len());
        let records = tokio::task::spawn_blocking(move || {
            FileComparator::with_config(config).compare_trees(&local, &remote)
        })
        .await??;

        info!("{} 条差异", records.len());
        Ok(records)
    }

    /// 对比后逐条确认并交给任务池执行
    pub async fn update(
        &self,
        request: &UpdateRequest,
        prompter: Box<dyn Prompter>,
        sink: Box<dyn StatusSink>,
    ) -> Result<UpdateReport> {
        let started = Instant::now();
        let records = self.diff(&request.compare).await?;
        let mut report = UpdateReport {
            records: records.len(),
            ..UpdateReport::default()
        };
        if records.is_empty() {
            return Ok(report);
        }

        let pool = WorkerPool::new(self.pool_config(), self.task_context(), sink);
        let mut gate = ConfirmGate::new(request.policy.clone(), prompter);

        // 出错时也要等待已提交的任务结束
        let dispatched = self
            .dispatch(records, request, &mut gate, &pool, &mut report)
            .await;
        let pool_report = pool.join().await;

        report.processed += pool_report.processed;
        report.failed = pool_report.failed;
        report.bytes = pool_report.bytes;
        report.skipped = report.records.saturating_sub(report.processed);
        report.elapsed = started.elapsed();
        dispatched?;

        info!(
            "同步完成: {} 个已处理, {} 个跳过, {} 个失败",
            report.processed, report.skipped, report.failed
        );
        Ok(report)
    }

    async fn dispatch(
        &self,
        records: BTreeMap<String, FileRecord>,
        request: &UpdateRequest,
        gate: &mut ConfirmGate,
        pool: &WorkerPool,
        report: &mut UpdateReport,
    ) -> Result<()> {
        let mut scheduled = 0;
        for (key, record) in records {
            if self.cancel.is_cancelled() {
                report.interrupted = true;
                break;
            }
            if record.state == FileState::Equal {
                report.processed += 1;
                continue;
            }
            if request.limit.is_some_and(|limit| scheduled >= limit) {
                info!("达到处理上限: {}", scheduled);
                break;
            }

            // 提问会阻塞当前线程
            let Some(action) = tokio::task::block_in_place(|| gate.decide(&key, &record))? else {
                debug!("跳过: {}", key);
                continue;
            };

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    report.interrupted = true;
                    break;
                }
                result = pool.add_task(Task::new(action, key, record)) => result?,
            }
            scheduled += 1;
        }
        Ok(())
    }

    /// 列出远程对象（包括子目录）
    pub async fn list(&self, path: Option<&str>, recursive: bool) -> Result<Vec<ObjectInfo>> {
        let (local_path, key) = self.tree.path_info(path, &self.cwd)?;
        let prefix = remote_prefix(&local_path, &key);
        if prefix.is_empty() || prefix.ends_with('/') {
            self.store.list(&prefix, recursive).await
        } else {
            Ok(self.store.stat(&prefix).await?.into_iter().collect())
        }
    }

    /// 上传单个文件
    pub async fn upload(&self, path: &str, force: bool) -> Result<FileRecord> {
        let (local_path, key) = self.tree.path_info(Some(path), &self.cwd)?;
        if !local_path.exists() {
            return Err(SyncError::user("Local path does not exists"));
        }
        if local_path.is_dir() {
            return Err(SyncError::user("Path is dir"));
        }

        let existing = self.store.stat(&key).await?;
        let action = match (&existing, force) {
            (None, _) => Action::Upload,
            (Some(_), true) => Action::ReplaceUpload,
            (Some(_), false) => {
                return Err(SyncError::user("Remote path exists. Use force flag."))
            }
        };

        let file = self
            .tree
            .walk(&local_path, false)?
            .into_iter()
            .next()
            .ok_or_else(|| SyncError::user("Local path does not exists"))?;
        let mut record = FileRecord {
            state: FileState::LocalOnly,
            name: key.clone(),
            size: None,
            local_size: Some(file.size),
            modified: None,
            local_modified: Some(file.modified),
            md5: None,
            local_md5: None,
            comment: Vec::new(),
            local_path: Some(file.path),
            local_name: None,
            remote: None,
        };
        if let Some(object) = existing {
            record.state = FileState::LocalNewer;
            record.size = Some(object.size);
            record.modified = object.last_modified;
            record.remote = Some(object.name);
        }

        let mut task = Task::new(action, key, record).bind(self.task_context());
        task.run(None).await?;
        Ok(task.into_record())
    }

    /// 删除单个远程对象，返回被删除的 key
    pub async fn remove(&self, path: &str) -> Result<String> {
        let normalized = LocalTree::normalize_path(path);
        let key = normalized.trim_start_matches('/');
        if key.is_empty() || key.ends_with('/') {
            return Err(SyncError::user("Path is dir"));
        }

        let parent = key.rfind('/').map_or("", |i| &key[..=i]);
        let matches: Vec<ObjectInfo> = self
            .store
            .list(parent, false)
            .await?
            .into_iter()
            .filter(|o| o.name.starts_with(key))
            .collect();

        match matches.as_slice() {
            [] => Err(SyncError::user("File not found")),
            [object] if object.is_dir => Err(SyncError::user("Try to remove dir")),
            [object] => {
                self.store.delete_object(&object.name).await?;
                info!("已删除远程对象: {}", object.name);
                Ok(object.name.clone())
            }
            _ => Err(SyncError::user("Multiple files found")),
        }
    }

    /// 检查配置的 bucket 是否可访问
    pub async fn check(&self) -> Result<()> {
        self.store.check().await
    }
}
