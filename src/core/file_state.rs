//! 文件状态 - 本地与远程对比结果的分类，以及内容哈希

use crate::error::{Result, SyncError};
use md5::{Digest, Md5};
use serde::{Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::str::FromStr;

/// 计算哈希时每次读取的字节数
const HASH_BLOCK_SIZE: usize = 128;

/// 一个 key 在本地和远程之间的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FileState {
    /// `=` 两端一致
    Equal,
    /// `+` 仅本地存在
    LocalOnly,
    /// `-` 仅远程存在
    RemoteOnly,
    /// `<` 远程较新
    RemoteNewer,
    /// `>` 本地较新
    LocalNewer,
    /// `r` 远程对象在本地被改名
    Renamed,
}

impl FileState {
    pub const ALL: [FileState; 6] = [
        FileState::Equal,
        FileState::LocalOnly,
        FileState::RemoteOnly,
        FileState::RemoteNewer,
        FileState::LocalNewer,
        FileState::Renamed,
    ];

    pub fn symbol(self) -> char {
        match self {
            FileState::Equal => '=',
            FileState::LocalOnly => '+',
            FileState::RemoteOnly => '-',
            FileState::RemoteNewer => '<',
            FileState::LocalNewer => '>',
            FileState::Renamed => 'r',
        }
    }

    pub fn from_symbol(symbol: char) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.symbol() == symbol)
    }
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

impl Serialize for FileState {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_char(self.symbol())
    }
}

/// 需要处理的状态集合，如 `-<>+r`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeSet(BTreeSet<FileState>);

impl ModeSet {
    pub fn contains(&self, state: FileState) -> bool {
        self.0.contains(&state)
    }

    pub fn states(&self) -> impl Iterator<Item = FileState> + '_ {
        self.0.iter().copied()
    }
}

impl FromStr for ModeSet {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        s.chars()
            .map(|c| {
                FileState::from_symbol(c)
                    .ok_or_else(|| SyncError::user(format!("Invalid mode '{}'", c)))
            })
            .collect::<Result<BTreeSet<_>>>()
            .map(ModeSet)
    }
}

impl fmt::Display for ModeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.iter().try_for_each(|s| write!(f, "{}", s))
    }
}

/// 流式计算文件内容的 md5（十六进制小写）
pub fn file_hash(path: &Path) -> std::io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Md5::new();
    let mut block = [0u8; HASH_BLOCK_SIZE];
    loop {
        let n = reader.read(&mut block)?;
        if n == 0 {
            break;
        }
        hasher.update(&block[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// 计算内存数据的 md5
pub fn calculate_hash(data: &[u8]) -> String {
    format!("{:x}", Md5::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_symbols_roundtrip() {
        for state in FileState::ALL {
            assert_eq!(FileState::from_symbol(state.symbol()), Some(state));
        }
        assert_eq!(FileState::from_symbol('x'), None);
    }

    #[test]
    fn test_mode_set_parse() {
        let modes: ModeSet = "-<>+".parse().unwrap();
        assert!(modes.contains(FileState::LocalOnly));
        assert!(!modes.contains(FileState::Renamed));
        assert!(!modes.contains(FileState::Equal));
        assert_eq!(modes.states().count(), 4);

        let err = "+x".parse::<ModeSet>().unwrap_err();
        assert!(err.is_user_facing());
    }

    #[test]
    fn test_file_hash_matches_known_md5() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, b"hello").unwrap();

        assert_eq!(file_hash(&path).unwrap(), "5d41402abc4b2a76b9719d911017c592");
        assert_eq!(calculate_hash(b""), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn test_file_hash_spans_blocks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.bin");
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();

        assert_eq!(file_hash(&path).unwrap(), calculate_hash(&data));
    }
}
