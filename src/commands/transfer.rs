//! 单文件的 upload 和 rm 命令

use crate::core::SyncEngine;

/// `upload <path> [-f]`
pub async fn upload(engine: &SyncEngine, path: &str, force: bool) -> anyhow::Result<()> {
    let record = engine.upload(path, force).await?;
    println!("{} {} {}", record.state, record.name, record.comment_line());
    Ok(())
}

/// `rm <path>`
pub async fn remove(engine: &SyncEngine, path: &str) -> anyhow::Result<()> {
    let key = engine.remove(path).await?;
    println!("{}: File successful deleted", key);
    Ok(())
}
