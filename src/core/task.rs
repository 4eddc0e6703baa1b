//! 同步任务 - 对单个 key 执行一个动作

use super::comparator::FileRecord;
use super::conflict::Action;
use crate::error::{Result, SyncError};
use crate::storage::{ObjectStore, ProgressFn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use uuid::Uuid;

/// 下载时的临时文件后缀
const PARTIAL_SUFFIX: &str = ".s3sync-part";

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Created,
    Bound,
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Created => write!(f, "created"),
            TaskState::Bound => write!(f, "bound"),
            TaskState::Running => write!(f, "running"),
            TaskState::Completed => write!(f, "completed"),
            TaskState::Failed => write!(f, "failed"),
        }
    }
}

/// 任务执行所需的共享资源
pub struct TaskContext {
    pub store: Arc<dyn ObjectStore>,
    pub local_root: PathBuf,
}

impl TaskContext {
    pub fn new(store: Arc<dyn ObjectStore>, local_root: impl Into<PathBuf>) -> Self {
        Self {
            store,
            local_root: local_root.into(),
        }
    }
}

/// 同步任务
pub struct Task {
    pub id: Uuid,
    pub action: Action,
    pub key: String,
    pub record: FileRecord,
    state: TaskState,
    context: Option<Arc<TaskContext>>,
}

impl Task {
    pub fn new(action: Action, key: impl Into<String>, record: FileRecord) -> Self {
        Self {
            id: Uuid::new_v4(),
            action,
            key: key.into(),
            record,
            state: TaskState::Created,
            context: None,
        }
    }

    /// 绑定执行上下文
    pub fn bind(mut self, context: Arc<TaskContext>) -> Self {
        self.context = Some(context);
        self.state = TaskState::Bound;
        self
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// 需要传输的字节数，删除和改名为 0
    pub fn size(&self) -> u64 {
        match self.action {
            Action::Upload | Action::ReplaceUpload => self.record.local_size.unwrap_or(0),
            Action::Download | Action::ReplaceDownload => self.record.size.unwrap_or(0),
            _ => 0,
        }
    }

    /// 状态行中显示的名称
    pub fn display_name(&self) -> &str {
        match (self.action, &self.record.local_name) {
            (Action::RenameRemote | Action::RenameLocal, Some(local_name)) => local_name,
            _ => &self.record.name,
        }
    }

    /// 完成后写入注释的结果描述
    pub fn done_label(&self) -> &'static str {
        match self.action {
            Action::Upload => "uploaded",
            Action::ReplaceUpload => "uploaded(replaced)",
            Action::Download => "downloaded",
            Action::ReplaceDownload => "downloaded(replaced)",
            Action::DeleteLocal => "deleted",
            Action::DeleteRemote => "deleted from s3",
            Action::RenameRemote => "renamed",
            Action::RenameLocal => "renamed local",
        }
    }

    pub fn into_record(self) -> FileRecord {
        self.record
    }

    /// 执行任务，成功时返回传输的字节数
    pub async fn run(&mut self, progress: Option<ProgressFn>) -> Result<u64> {
        let context = self
            .context
            .clone()
            .ok_or_else(|| SyncError::transfer(&self.key, "task is not bound"))?;

        self.state = TaskState::Running;
        debug!("任务开始 [{}] {} {}", self.id, self.action, self.key);

        match self.execute(&context, progress).await {
            Ok(bytes) => {
                self.state = TaskState::Completed;
                self.record.comment = vec![self.done_label().to_string()];
                info!("{}: {}", self.done_label(), self.key);
                Ok(bytes)
            }
            Err(e) => {
                self.state = TaskState::Failed;
                let e = match e {
                    e @ SyncError::Transfer { .. } => e,
                    other => SyncError::transfer(&self.key, other),
                };
                self.record.comment = vec![e.to_string()];
                Err(e)
            }
        }
    }

    fn remote_key(&self) -> &str {
        self.record.remote.as_deref().unwrap_or(&self.record.name)
    }

    fn local_path(&self, context: &TaskContext) -> PathBuf {
        self.record
            .local_path
            .clone()
            .unwrap_or_else(|| context.local_root.join(&self.record.name))
    }

    async fn execute(&self, context: &TaskContext, progress: Option<ProgressFn>) -> Result<u64> {
        match self.action {
            Action::Upload | Action::ReplaceUpload => {
                let path = self.local_path(context);
                let mut file = fs::File::open(&path).await?;
                let size = file.metadata().await?.len();
                let overwrite = self.action == Action::ReplaceUpload;
                context
                    .store
                    .put_object(self.remote_key(), &mut file, size, overwrite, progress)
                    .await
            }
            Action::Download | Action::ReplaceDownload => {
                let path = self.local_path(context);
                download(context.store.as_ref(), self.remote_key(), &path, progress).await
            }
            Action::DeleteLocal => {
                let path = self.local_path(context);
                report(&progress, 0, 1);
                fs::remove_file(&path).await?;
                report(&progress, 1, 1);
                Ok(0)
            }
            Action::DeleteRemote => {
                context.store.delete_object(self.remote_key()).await?;
                report(&progress, 1, 1);
                Ok(0)
            }
            Action::RenameRemote => {
                let target = self
                    .record
                    .local_name
                    .as_deref()
                    .ok_or_else(|| SyncError::transfer(&self.key, "missing rename target"))?;
                let source = self.remote_key();
                // 复制失败时保留源对象
                if context.store.copy_object(source, target).await?.is_none() {
                    return Err(SyncError::transfer(&self.key, "s3 key copy failed"));
                }
                context.store.delete_object(source).await?;
                report(&progress, 1, 1);
                Ok(0)
            }
            Action::RenameLocal => {
                let from = self
                    .record
                    .local_path
                    .clone()
                    .ok_or_else(|| SyncError::transfer(&self.key, "missing local file"))?;
                let to = context.local_root.join(&self.record.name);
                create_parent(&to).await?;
                fs::rename(&from, &to).await?;
                report(&progress, 1, 1);
                Ok(0)
            }
        }
    }
}

fn report(progress: &Option<ProgressFn>, done: u64, total: u64) {
    if let Some(cb) = progress {
        cb(done, total);
    }
}

async fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    Ok(())
}

/// 先写入临时文件，完成后原子重命名
async fn download(
    store: &dyn ObjectStore,
    key: &str,
    path: &Path,
    progress: Option<ProgressFn>,
) -> Result<u64> {
    create_parent(path).await?;

    let mut temp_name = path.as_os_str().to_os_string();
    temp_name.push(PARTIAL_SUFFIX);
    let temp_path = PathBuf::from(temp_name);

    let result: Result<u64> = async {
        let mut file = fs::File::create(&temp_path).await?;
        let bytes = store.get_object(key, &mut file, progress).await?;
        file.flush().await?;
        drop(file);
        fs::rename(&temp_path, path).await?;
        Ok(bytes)
    }
    .await;

    if result.is_err() {
        let _ = fs::remove_file(&temp_path).await;
    }
    result
}
