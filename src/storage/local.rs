use crate::error::{Result, SyncError};
use chrono::{DateTime, Utc};
use std::path::{Component, Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

/// 本地文件
#[derive(Debug, Clone, PartialEq)]
pub struct LocalFile {
    pub path: PathBuf,
    pub size: u64,
    /// 修改时间，精确到秒
    pub modified: DateTime<Utc>,
}

/// 以项目根目录为基准的本地文件树
#[derive(Debug, Clone)]
pub struct LocalTree {
    root: PathBuf,
}

impl LocalTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: clean_path(&root.into()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 对象 key 对应的本地路径
    pub fn resolve_path(&self, key: &str) -> PathBuf {
        let key = key.trim_start_matches('/').trim_start_matches('\\');
        if key.is_empty() {
            self.root.clone()
        } else {
            self.root.join(key)
        }
    }

    /// 规范化路径分隔符（统一使用 /）
    pub fn normalize_path(path: &str) -> String {
        path.replace('\\', "/")
    }

    /// 本地路径相对根目录的 key，根目录本身为空串
    pub fn key_for(&self, path: &Path) -> Result<String> {
        let path = clean_path(path);
        let relative = path.strip_prefix(&self.root).map_err(|_| {
            SyncError::user(format!(
                "Path {} is outside of {}",
                path.display(),
                self.root.display()
            ))
        })?;

        let relative = relative
            .to_str()
            .ok_or_else(|| SyncError::Decode(relative.to_string_lossy().into_owned()))?;
        Ok(Self::normalize_path(relative))
    }

    /// 命令行路径参数解析为 (绝对路径, key)
    ///
    /// 相对路径基于 cwd，未给出时使用 cwd 本身。
    pub fn path_info(&self, arg: Option<&str>, cwd: &Path) -> Result<(PathBuf, String)> {
        let path = match arg {
            None => cwd.to_path_buf(),
            Some(arg) => {
                let arg = Path::new(arg);
                if arg.is_absolute() {
                    arg.to_path_buf()
                } else {
                    cwd.join(arg)
                }
            }
        };
        let path = clean_path(&path);
        let key = self.key_for(&path)?;
        Ok((path, key))
    }

    /// 遍历 start 下的普通文件；start 是文件时只返回它自己
    pub fn walk(&self, start: &Path, recursive: bool) -> Result<Vec<LocalFile>> {
        if start.is_file() {
            return Ok(read_file(start).into_iter().collect());
        }
        if !start.is_dir() {
            return Err(SyncError::user(format!(
                "Invalid path {}",
                start.display()
            )));
        }

        let walker = WalkDir::new(start)
            .min_depth(1)
            .max_depth(if recursive { usize::MAX } else { 1 })
            .follow_links(false);

        let mut files = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("跳过无法访问的路径: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(file) = read_file(entry.path()) {
                files.push(file);
            }
        }
        Ok(files)
    }
}

fn read_file(path: &Path) -> Option<LocalFile> {
    let metadata = match path.metadata() {
        Ok(metadata) => metadata,
        Err(e) => {
            warn!("读取文件元数据失败 {}: {}", path.display(), e);
            return None;
        }
    };
    let modified = metadata
        .modified()
        .ok()
        .map(DateTime::<Utc>::from)
        .and_then(|t| DateTime::from_timestamp(t.timestamp(), 0))
        .unwrap_or_default();

    Some(LocalFile {
        path: path.to_path_buf(),
        size: metadata.len(),
        modified,
    })
}

/// 去掉 `.`，按字面处理 `..`，不访问文件系统
fn clean_path(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !cleaned.pop() {
                    cleaned.push(component);
                }
            }
            other => cleaned.push(other),
        }
    }
    cleaned
}
