use super::file_state::{file_hash, FileState, ModeSet};
use super::scanner::LocalEntry;
use crate::error::Result;
use crate::storage::ObjectInfo;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, warn};

/// 强制的同步方向，忽略修改时间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

/// 单个 key 的对比结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileRecord {
    pub state: FileState,
    /// 远程对象名；仅本地存在时为本地相对路径
    pub name: String,
    pub size: Option<u64>,
    pub local_size: Option<u64>,
    pub modified: Option<DateTime<Utc>>,
    pub local_modified: Option<DateTime<Utc>>,
    pub md5: Option<String>,
    pub local_md5: Option<String>,
    pub comment: Vec<String>,
    pub local_path: Option<PathBuf>,
    /// 改名后的本地名称
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_name: Option<String>,
    /// 远程对象的 key，仅本地存在时为空
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
}

impl FileRecord {
    pub fn from_remote(object: &ObjectInfo) -> Self {
        Self {
            state: FileState::RemoteOnly,
            name: object.name.clone(),
            size: Some(object.size),
            local_size: None,
            modified: object.last_modified,
            local_modified: None,
            md5: object.etag.clone(),
            local_md5: None,
            comment: Vec::new(),
            local_path: None,
            local_name: None,
            remote: Some(object.name.clone()),
        }
    }

    pub fn from_local(entry: &LocalEntry) -> Self {
        Self {
            state: FileState::LocalOnly,
            name: entry.key.clone(),
            size: None,
            local_size: Some(entry.size),
            modified: None,
            local_modified: Some(entry.modified),
            md5: None,
            local_md5: entry.md5.clone(),
            comment: Vec::new(),
            local_path: Some(entry.path.clone()),
            local_name: None,
            remote: None,
        }
    }

    /// 注释拼接为一行
    pub fn comment_line(&self) -> String {
        self.comment.join(", ")
    }
}

/// 比较配置
#[derive(Debug, Clone)]
pub struct CompareConfig {
    /// 结果中保留的状态
    pub modes: ModeSet,
    /// 大小相同时是否比较 md5
    pub use_checksum: bool,
    /// key 是否忽略大小写
    pub case_insensitive: bool,
    pub force: Option<Direction>,
    /// 加到远程修改时间上的修正
    pub remote_time_offset: Duration,
}

impl CompareConfig {
    pub fn new(modes: ModeSet) -> Self {
        Self {
            modes,
            use_checksum: true,
            case_insensitive: false,
            force: None,
            remote_time_offset: Duration::zero(),
        }
    }

    fn map_key(&self, name: &str) -> String {
        if self.case_insensitive {
            name.to_lowercase()
        } else {
            name.to_string()
        }
    }
}

/// 分片上传的 etag 形如 `<hash>-<parts>`，不是内容的 md5
fn content_md5(etag: Option<&str>) -> Option<&str> {
    etag.filter(|tag| !tag.is_empty() && !tag.contains('-'))
}

/// 文件比较器
pub struct FileComparator {
    config: CompareConfig,
}

impl FileComparator {
    pub fn with_config(config: CompareConfig) -> Self {
        Self { config }
    }

    /// 对比本地和远程清单，返回按 key 排序的结果
    pub fn compare_trees(
        &self,
        local: &[LocalEntry],
        remote: &[ObjectInfo],
    ) -> Result<BTreeMap<String, FileRecord>> {
        let mut records = BTreeMap::new();
        for object in remote {
            let key = self.config.map_key(&object.name);
            if records.insert(key, FileRecord::from_remote(object)).is_some() {
                warn!("远程对象 key 冲突，保留后者: {}", object.name);
            }
        }

        let keep_added = self.config.modes.contains(FileState::LocalOnly)
            || self.config.modes.contains(FileState::Renamed);

        for entry in local {
            let key = self.config.map_key(&entry.key);
            match records.get_mut(&key) {
                Some(record) if record.local_path.is_none() => {
                    self.compare_file(record, entry)?;
                }
                Some(_) => warn!("本地文件 key 冲突，跳过: {}", entry.key),
                None if keep_added => {
                    records.insert(key, FileRecord::from_local(entry));
                }
                None => {}
            }
        }

        if self.config.modes.contains(FileState::Renamed) {
            self.detect_renames(&mut records)?;
        }

        records.retain(|_, record| self.config.modes.contains(record.state));
        debug!("对比完成: {} 条差异", records.len());
        Ok(records)
    }

    /// 两端都存在的文件
    fn compare_file(&self, record: &mut FileRecord, entry: &LocalEntry) -> Result<()> {
        record.local_path = Some(entry.path.clone());
        record.local_size = Some(entry.size);
        record.local_modified = Some(entry.modified);

        let remote_size = record.size.unwrap_or(0);
        let mut equal = true;
        if entry.size != remote_size {
            equal = false;
            record
                .comment
                .push(format!("size: {}%", size_percent(entry.size, remote_size)));
        } else if self.config.use_checksum {
            let hash = entry.content_hash()?;
            match content_md5(record.md5.as_deref()) {
                Some(remote_hash) if remote_hash != hash => {
                    equal = false;
                    record.comment.push("md5: different".to_string());
                }
                Some(_) => {}
                None => debug!("远程 etag 不是内容 md5, 只比较大小: {}", record.name),
            }
            record.local_md5 = Some(hash);
        }

        if equal {
            record.state = FileState::Equal;
            record.comment.clear();
            return Ok(());
        }

        let remote_modified = record.modified.unwrap_or_default() + self.config.remote_time_offset;
        record.comment.push(format!(
            "modified: {}",
            format_delta(entry.modified - remote_modified)
        ));
        record.state = match self.config.force {
            Some(Direction::Upload) => FileState::LocalNewer,
            Some(Direction::Download) => FileState::RemoteNewer,
            None if entry.modified > remote_modified => FileState::LocalNewer,
            None => FileState::RemoteNewer,
        };
        Ok(())
    }

    /// 本地新增文件与远程独有对象按大小（和 md5）配对
    fn detect_renames(&self, records: &mut BTreeMap<String, FileRecord>) -> Result<()> {
        let added: Vec<String> = records
            .iter()
            .filter(|(_, r)| r.state == FileState::LocalOnly)
            .map(|(k, _)| k.clone())
            .collect();

        for key in added {
            let Some(mut local) = records.remove(&key) else {
                continue;
            };
            if self.config.use_checksum && local.local_md5.is_none() {
                if let Some(path) = &local.local_path {
                    local.local_md5 = Some(file_hash(path)?);
                }
            }

            let target = records
                .iter()
                .find(|(_, r)| {
                    r.state == FileState::RemoteOnly
                        && r.size == local.local_size
                        && (!self.config.use_checksum
                            || content_md5(r.md5.as_deref()).is_none()
                            || content_md5(r.md5.as_deref()) == local.local_md5.as_deref())
                })
                .map(|(k, _)| k.clone());

            match target.and_then(|t| records.get_mut(&t)) {
                Some(record) => {
                    debug!("检测到改名: {} -> {}", record.name, local.name);
                    record.state = FileState::Renamed;
                    record.local_path = local.local_path;
                    record.local_size = local.local_size;
                    record.local_modified = local.local_modified;
                    record.local_md5 = local.local_md5;
                    record.comment.push(format!("new: {}", key));
                    record.local_name = Some(local.name);
                }
                None => {
                    records.insert(key, local);
                }
            }
        }
        Ok(())
    }

    /// 统计各状态的数量
    pub fn summarize(records: &BTreeMap<String, FileRecord>) -> DiffSummary {
        let mut summary = DiffSummary::default();
        for record in records.values() {
            *summary.counts.entry(record.state).or_insert(0) += 1;
            summary.upload_bytes += match record.state {
                FileState::LocalOnly | FileState::LocalNewer => record.local_size.unwrap_or(0),
                _ => 0,
            };
            summary.download_bytes += match record.state {
                FileState::RemoteOnly | FileState::RemoteNewer => record.size.unwrap_or(0),
                _ => 0,
            };
        }
        summary
    }
}

/// 差异统计
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiffSummary {
    pub counts: BTreeMap<FileState, usize>,
    pub upload_bytes: u64,
    pub download_bytes: u64,
}

impl DiffSummary {
    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn count(&self, state: FileState) -> usize {
        self.counts.get(&state).copied().unwrap_or(0)
    }
}

/// 本地大小占远程大小的百分比，保留两位小数
pub fn size_percent(local: u64, remote: u64) -> f64 {
    if remote == 0 {
        return 0.0;
    }
    (local as f64 / remote as f64 * 10000.0).round() / 100.0
}

/// 时间差格式化为 `[-][N day(s), ]H:MM:SS`
pub fn format_delta(delta: Duration) -> String {
    let sign = if delta < Duration::zero() { "-" } else { "" };
    let total = delta.num_seconds().unsigned_abs();
    let days = total / 86400;
    let hours = total % 86400 / 3600;
    let minutes = total % 3600 / 60;
    let seconds = total % 60;

    let day_part = match days {
        0 => String::new(),
        1 => "1 day, ".to_string(),
        n => format!("{} days, ", n),
    };
    format!("{}{}{}:{:02}:{:02}", sign, day_part, hours, minutes, seconds)
}
