//! 错误类型

use thiserror::Error;

/// 同步过程中的错误
#[derive(Debug, Error)]
pub enum SyncError {
    /// 用户输入或配置问题，直接以消息形式展示
    #[error("{0}")]
    User(String),

    /// 单个任务的存储或文件系统操作失败
    #[error("{key}: {message}")]
    Transfer { key: String, message: String },

    /// 文件名无法解码为 UTF-8
    #[error("invalid file name encoding: {0}")]
    Decode(String),

    #[error("interrupted")]
    Interrupted,

    #[error(transparent)]
    Storage(#[from] opendal::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] serde_yaml::Error),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl SyncError {
    pub fn user(message: impl Into<String>) -> Self {
        Self::User(message.into())
    }

    pub fn transfer(key: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Transfer {
            key: key.into(),
            message: message.to_string(),
        }
    }

    /// 是否只需要向用户输出一行提示（不需要错误链）
    pub fn is_user_facing(&self) -> bool {
        matches!(self, Self::User(_) | Self::Decode(_) | Self::Interrupted)
    }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
