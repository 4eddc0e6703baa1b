use std::path::PathBuf;

pub mod cli;
pub mod commands;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod storage;

pub use config::AppConfig;
pub use core::{SyncEngine, UpdateReport};
pub use error::{Result, SyncError};

/// 应用状态，在各个命令之间共享
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: AppConfig,
    /// 全局配置和日志所在目录
    pub config_dir: PathBuf,
    pub cwd: PathBuf,
}

impl AppState {
    pub fn new(config_dir: Option<PathBuf>) -> Result<Self> {
        // 获取默认应用配置目录
        let config_dir = config_dir.unwrap_or_else(|| {
            dirs::config_dir()
                .map(|p| p.join("s3sync"))
                .unwrap_or_else(|| PathBuf::from(".s3sync-config"))
        });
        std::fs::create_dir_all(&config_dir)?;

        let cwd = std::env::current_dir()?;
        let config = AppConfig::load(&config_dir, &cwd)?;
        if let Some(root) = &config.project_root {
            tracing::debug!("项目根目录: {:?}", root);
        }

        Ok(Self {
            config,
            config_dir,
            cwd,
        })
    }

    pub fn global_config_path(&self) -> PathBuf {
        self.config_dir.join(config::CONFIG_GLOBAL_NAME)
    }

    /// 项目配置文件路径，不在项目中时为 None
    pub fn project_config_path(&self) -> Option<PathBuf> {
        self.config
            .project_root
            .as_ref()
            .map(|root| root.join(config::CONFIG_LOCAL_NAME))
    }
}

pub mod dirs {
    use std::path::PathBuf;

    pub fn config_dir() -> Option<PathBuf> {
        if cfg!(target_os = "windows") {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        } else if cfg!(target_os = "macos") {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join("Library").join("Application Support"))
        } else {
            // Linux
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join(".config"))
        }
    }
}
