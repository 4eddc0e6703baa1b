use super::file_state::file_hash;
use crate::error::{Result, SyncError};
use crate::storage::{LocalTree, ObjectInfo, ObjectStore};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// 按扩展名过滤，`^` 开头表示排除列表
///
/// `jpg,png` 只保留这两种扩展名，`^tmp,log` 排除这两种。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileTypeFilter {
    types: Vec<String>,
    exclude: bool,
}

impl FileTypeFilter {
    pub fn parse(filter: Option<&str>) -> Self {
        let Some(filter) = filter.map(str::trim).filter(|s| !s.is_empty()) else {
            return Self::default();
        };
        let (exclude, list) = match filter.strip_prefix('^') {
            Some(rest) => (true, rest),
            None => (false, filter),
        };
        let types = list
            .split(',')
            .map(|t| t.trim().trim_start_matches('.').to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        Self { types, exclude }
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn matches(&self, name: &str) -> bool {
        if self.types.is_empty() {
            return true;
        }
        // 没有扩展名时整个文件名参与比较
        let file_name = name.rsplit('/').next().unwrap_or(name).to_lowercase();
        let ext = file_name.rsplit('.').next().unwrap_or(&file_name);
        let listed = self.types.iter().any(|t| t == ext);
        listed != self.exclude
    }
}

/// 本地清单中的一个文件
#[derive(Debug, Clone, PartialEq)]
pub struct LocalEntry {
    /// 相对项目根目录的名称，使用 `/` 分隔
    pub key: String,
    pub path: PathBuf,
    pub size: u64,
    pub modified: DateTime<Utc>,
    /// 已知的内容哈希，为空时按需读取文件计算
    pub md5: Option<String>,
}

impl LocalEntry {
    pub fn content_hash(&self) -> std::io::Result<String> {
        match &self.md5 {
            Some(hash) => Ok(hash.clone()),
            None => file_hash(&self.path),
        }
    }
}

/// 文件扫描器配置
#[derive(Debug, Clone, Default)]
pub struct ScanConfig {
    pub recursive: bool,
    pub file_types: FileTypeFilter,
}

/// 文件扫描器
pub struct FileScanner {
    tree: LocalTree,
    config: ScanConfig,
}

impl FileScanner {
    pub fn new(tree: LocalTree, config: ScanConfig) -> Self {
        Self { tree, config }
    }

    /// 扫描本地路径，返回普通文件清单
    pub fn scan_local(&self, start: &Path) -> Result<Vec<LocalEntry>> {
        info!("开始扫描本地: {}", start.display());

        let mut entries = Vec::new();
        let mut excluded_count = 0;
        for file in self.tree.walk(start, self.config.recursive)? {
            let key = match self.tree.key_for(&file.path) {
                Ok(key) => key,
                Err(SyncError::Decode(name)) => {
                    warn!("文件名不是有效的 UTF-8，跳过: {}", name);
                    continue;
                }
                Err(e) => return Err(e),
            };

            if !self.config.file_types.matches(&key) {
                debug!("排除文件: {}", key);
                excluded_count += 1;
                continue;
            }

            entries.push(LocalEntry {
                key,
                path: file.path,
                size: file.size,
                modified: file.modified,
                md5: None,
            });
        }

        info!("{} 个本地文件, {} 个被排除", entries.len(), excluded_count);
        Ok(entries)
    }

    /// 扫描远程前缀；前缀不以 `/` 结尾时视为单个对象
    pub async fn scan_remote(
        &self,
        store: &dyn ObjectStore,
        prefix: &str,
    ) -> Result<Vec<ObjectInfo>> {
        info!("开始扫描存储: {}, prefix: {:?}", store.name(), prefix);

        let objects = if prefix.is_empty() || prefix.ends_with('/') {
            store.list(prefix, self.config.recursive).await?
        } else {
            store.stat(prefix).await?.into_iter().collect()
        };

        let mut files = Vec::new();
        let mut dir_count = 0;
        let mut excluded_count = 0;
        for object in objects {
            // 跳过目录
            if object.is_dir || object.name.ends_with('/') {
                dir_count += 1;
                continue;
            }
            if !self.config.file_types.matches(&object.name) {
                excluded_count += 1;
                continue;
            }
            files.push(object);
        }

        info!(
            "{} 个远程对象, {} 个目录, {} 个被排除",
            files.len(),
            dir_count,
            excluded_count
        );
        Ok(files)
    }
}

/// 本地路径对应的远程前缀：不是文件的路径补上 `/`
pub fn remote_prefix(local_path: &Path, key: &str) -> String {
    if key.is_empty() || key.ends_with('/') || local_path.is_file() {
        key.to_string()
    } else {
        format!("{}/", key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::S3Storage;
    use opendal::Operator;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_file_type_filter() {
        let allow = FileTypeFilter::parse(Some("jpg,PNG"));
        assert!(allow.matches("photos/a.JPG"));
        assert!(allow.matches("b.png"));
        assert!(!allow.matches("notes.txt"));

        let deny = FileTypeFilter::parse(Some("^tmp,log"));
        assert!(!deny.matches("build.log"));
        assert!(deny.matches("report.pdf"));

        let none = FileTypeFilter::parse(None);
        assert!(none.is_empty());
        assert!(none.matches("anything"));
    }

    #[test]
    fn test_file_type_filter_without_extension() {
        let filter = FileTypeFilter::parse(Some("makefile"));
        assert!(filter.matches("src/Makefile"));
        assert!(!filter.matches("dir.v2/readme"));
    }

    #[test]
    fn test_remote_prefix() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, b"a").unwrap();

        assert_eq!(remote_prefix(dir.path(), ""), "");
        assert_eq!(remote_prefix(dir.path(), "docs"), "docs/");
        assert_eq!(remote_prefix(&file, "a.txt"), "a.txt");
    }

    #[test]
    fn test_scan_local_applies_filter() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.jpg"), b"img").unwrap();
        fs::write(dir.path().join("b.txt"), b"text").unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/c.jpg"), b"img2").unwrap();

        let scanner = FileScanner::new(
            LocalTree::new(dir.path()),
            ScanConfig {
                recursive: true,
                file_types: FileTypeFilter::parse(Some("jpg")),
            },
        );
        let mut keys: Vec<_> = scanner
            .scan_local(dir.path())
            .unwrap()
            .into_iter()
            .map(|e| e.key)
            .collect();
        keys.sort();
        assert_eq!(keys, vec!["a.jpg", "sub/c.jpg"]);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_scan_local_skips_undecodable_names() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("good.txt"), b"ok").unwrap();
        let bad = OsStr::from_bytes(b"bad-\xff\xfe.txt");
        fs::write(dir.path().join(bad), b"bad").unwrap();

        let scanner = FileScanner::new(LocalTree::new(dir.path()), ScanConfig::default());
        let entries = scanner.scan_local(dir.path()).unwrap();

        let keys: Vec<_> = entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["good.txt"]);
    }

    #[tokio::test]
    async fn test_scan_remote_skips_dirs() {
        let operator = Operator::new(opendal::services::Memory::default())
            .unwrap()
            .finish();
        operator.write("top.txt", b"t".to_vec()).await.unwrap();
        operator.write("docs/a.txt", b"a".to_vec()).await.unwrap();
        operator.write("docs/sub/b.txt", b"b".to_vec()).await.unwrap();
        let store = S3Storage::from_operator(operator, "memory");

        let flat = FileScanner::new(LocalTree::new("/tmp"), ScanConfig::default());
        let names: Vec<_> = flat
            .scan_remote(&store, "docs/")
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.name)
            .collect();
        assert_eq!(names, vec!["docs/a.txt"]);

        let single = flat.scan_remote(&store, "top.txt").await.unwrap();
        assert_eq!(single.len(), 1);
    }
}
