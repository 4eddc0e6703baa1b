//! 应用配置模块
//!
//! 全局配置位于 `~/.config/s3sync/config.yml`，项目配置是项目根目录下的 `.s3sync` 文件，
//! 两者都是 YAML。项目配置覆盖全局配置，命令行参数再覆盖两者。

use crate::error::{Result, SyncError};
use crate::logging::LogConfig;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::{Path, PathBuf};

/// 全局配置文件名
pub const CONFIG_GLOBAL_NAME: &str = "config.yml";
/// 项目配置文件名，同时作为项目根目录标记
pub const CONFIG_LOCAL_NAME: &str = ".s3sync";

/// 合并后的配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    /// 自定义 S3 兼容服务地址
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// 并发 worker 数
    #[serde(default = "default_thread_max_count")]
    pub thread_max_count: usize,
    /// 状态面板保留的已完成任务行数
    #[serde(default = "default_ended_output_max_count")]
    pub ended_output_max_count: usize,
    /// 上传时进度回调的次数
    #[serde(default = "default_upload_cb_num")]
    pub upload_cb_num: usize,
    #[serde(default = "default_list_limit")]
    pub list_limit: usize,
    #[serde(default = "default_key_pattern")]
    pub key_pattern: String,
    #[serde(default = "default_key_pattern_name_len")]
    pub key_pattern_name_len: usize,
    /// 远程时间戳的时区修正（小时）
    #[serde(default)]
    pub remote_time_offset_hours: i64,
    #[serde(default)]
    pub case_insensitive: bool,
    #[serde(default = "default_compare_hash")]
    pub compare_hash: bool,
    #[serde(default)]
    pub log: LogConfig,
    /// 找到的项目根目录（不写入文件）
    #[serde(skip)]
    pub project_root: Option<PathBuf>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_thread_max_count() -> usize {
    16
}

fn default_ended_output_max_count() -> usize {
    16
}

fn default_upload_cb_num() -> usize {
    10
}

fn default_list_limit() -> usize {
    20
}

fn default_key_pattern() -> String {
    "{name} {size} {modified} {md5}".to_string()
}

fn default_key_pattern_name_len() -> usize {
    60
}

fn default_compare_hash() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            access_key: None,
            secret_key: None,
            bucket: None,
            region: default_region(),
            endpoint: None,
            thread_max_count: default_thread_max_count(),
            ended_output_max_count: default_ended_output_max_count(),
            upload_cb_num: default_upload_cb_num(),
            list_limit: default_list_limit(),
            key_pattern: default_key_pattern(),
            key_pattern_name_len: default_key_pattern_name_len(),
            remote_time_offset_hours: 0,
            case_insensitive: false,
            compare_hash: default_compare_hash(),
            log: LogConfig::default(),
            project_root: None,
        }
    }
}

impl AppConfig {
    /// 加载全局配置，再用项目配置覆盖
    pub fn load(config_dir: &Path, cwd: &Path) -> Result<Self> {
        let mut merged = load_mapping(&config_dir.join(CONFIG_GLOBAL_NAME))?.unwrap_or_default();

        let project_root = find_project_root(cwd);
        if let Some(root) = &project_root {
            if let Some(local) = load_mapping(&root.join(CONFIG_LOCAL_NAME))? {
                merge_mapping(&mut merged, local);
            }
        }

        let mut config: AppConfig = serde_yaml::from_value(Value::Mapping(merged))?;
        config.project_root = project_root;
        Ok(config)
    }

    /// 本地根目录：项目根目录，没有项目时为当前目录
    pub fn local_root(&self, cwd: &Path) -> PathBuf {
        self.project_root.clone().unwrap_or_else(|| cwd.to_path_buf())
    }

    pub fn credentials(&self) -> Result<(&str, &str)> {
        match (self.access_key.as_deref(), self.secret_key.as_deref()) {
            (Some(access), Some(secret)) if !access.is_empty() && !secret.is_empty() => {
                Ok((access, secret))
            }
            _ => Err(SyncError::user("Missing access or secret key")),
        }
    }

    pub fn require_bucket(&self) -> Result<&str> {
        self.bucket
            .as_deref()
            .filter(|b| !b.is_empty())
            .ok_or_else(|| SyncError::user("Missing bucket"))
    }
}

/// 从当前目录向上查找项目标记文件
pub fn find_project_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(CONFIG_LOCAL_NAME).is_file())
        .map(Path::to_path_buf)
}

/// 读取 YAML 映射，文件不存在时返回 None
pub fn load_mapping(path: &Path) -> Result<Option<Mapping>> {
    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(path)?;
    match serde_yaml::from_str::<Value>(&content)? {
        Value::Null => Ok(Some(Mapping::new())),
        Value::Mapping(mapping) => Ok(Some(mapping)),
        _ => Err(SyncError::user(format!(
            "Invalid config file: {}",
            path.display()
        ))),
    }
}

pub fn write_mapping(path: &Path, mapping: &Mapping) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_yaml::to_string(mapping)?)?;
    Ok(())
}

/// 递归合并，overlay 中的值优先
fn merge_mapping(base: &mut Mapping, overlay: Mapping) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(Value::Mapping(existing)), Value::Mapping(nested)) => {
                merge_mapping(existing, nested);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// 处理 `config --set key=value`，返回写入后的映射
pub fn set_value(path: &Path, assignment: &str) -> Result<Mapping> {
    let (key, raw) = assignment
        .split_once('=')
        .ok_or_else(|| SyncError::user("Invalid config option"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(SyncError::user("Invalid config option"));
    }

    // 数字、布尔值按 YAML 解析，其余保留为字符串
    let value = match serde_yaml::from_str::<Value>(raw) {
        Ok(v @ (Value::Bool(_) | Value::Number(_))) => v,
        _ => Value::String(raw.to_string()),
    };

    let mut mapping = load_mapping(path)?.unwrap_or_default();
    mapping.insert(Value::String(key.to_string()), value);
    write_mapping(path, &mapping)?;
    Ok(mapping)
}

/// 在目录下创建项目配置
pub fn init_project(dir: &Path, bucket: &str) -> Result<PathBuf> {
    let path = dir.join(CONFIG_LOCAL_NAME);
    let mut mapping = Mapping::new();
    mapping.insert(
        Value::String("bucket".to_string()),
        Value::String(bucket.to_string()),
    );
    write_mapping(&path, &mapping)?;
    Ok(path)
}
