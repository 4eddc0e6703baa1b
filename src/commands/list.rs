//! list 和 buckets 命令

use crate::core::SyncEngine;
use crate::storage::ObjectInfo;
use regex::{Captures, Regex};
use std::sync::LazyLock;

/// 目录在 size 字段中的显示
const DIR_MARK: &str = "<DIR>";

static FIELD_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{(\w+)\}").unwrap());

/// `list [path] [-r] [-l N]`
pub async fn list(
    engine: &SyncEngine,
    path: Option<&str>,
    recursive: bool,
    limit: Option<usize>,
) -> anyhow::Result<()> {
    let config = engine.config();
    let limit = limit.unwrap_or(config.list_limit);
    let objects = engine.list(path, recursive).await?;

    for (index, object) in objects.iter().enumerate() {
        if limit > 0 && index >= limit {
            println!("list limit reached!");
            break;
        }
        println!(
            "{}",
            render_key(&config.key_pattern, config.key_pattern_name_len, object)
        );
    }
    Ok(())
}

/// `buckets`：检查配置的 bucket 是否可访问
pub async fn buckets(engine: &SyncEngine) -> anyhow::Result<()> {
    println!("listing buckets:");
    engine.check().await?;
    println!("{} (reachable)", engine.store().name());
    Ok(())
}

/// 按 key_pattern 渲染一行，如 `{name} {size} {modified} {md5}`
pub fn render_key(pattern: &str, name_len: usize, object: &ObjectInfo) -> String {
    FIELD_PATTERN
        .replace_all(pattern, |caps: &Captures| match &caps[1] {
            "name" => pad_name(&object.name, name_len),
            "size" if object.is_dir => format!("{:<10}", DIR_MARK),
            "size" => format!("{:<10}", object.size),
            "modified" => object
                .last_modified
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default(),
            "md5" => object.etag.clone().unwrap_or_default(),
            _ => caps[0].to_string(),
        })
        .trim_end()
        .to_string()
}

/// 短名补齐到固定宽度，过长的截断并加 `...`
fn pad_name(name: &str, width: usize) -> String {
    let len = name.chars().count();
    if len < width {
        format!("{:<width$}", name, width = width)
    } else {
        let keep = width.saturating_sub(3);
        format!("{}...", name.chars().take(keep).collect::<String>())
    }
}
