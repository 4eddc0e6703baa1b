//! 命令行子命令的实现

pub mod config;
pub mod list;
pub mod sync;
pub mod transfer;

use crate::core::SyncEngine;
use crate::error::Result;
use crate::storage::S3Storage;
use crate::AppState;
use std::sync::Arc;

/// 根据配置创建同步引擎，bucket 参数覆盖配置中的 bucket
pub fn build_engine(state: &AppState, bucket: Option<&str>) -> Result<SyncEngine> {
    let config = &state.config;
    let bucket = match bucket {
        Some(bucket) => bucket,
        None => config.require_bucket()?,
    };
    let (access_key, secret_key) = config.credentials()?;

    let store = S3Storage::new(
        bucket,
        &config.region,
        access_key,
        secret_key,
        config.endpoint.as_deref(),
    )?
    .with_progress_steps(config.upload_cb_num);

    Ok(SyncEngine::new(
        Arc::new(store),
        config.clone(),
        state.cwd.clone(),
    ))
}
