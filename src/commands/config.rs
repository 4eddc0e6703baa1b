//! 配置相关命令

use crate::config::{init_project, load_mapping, set_value};
use crate::error::SyncError;
use crate::AppState;
use serde_yaml::{Mapping, Value};
use tracing::info;

/// 显示配置时隐藏的字段
const SECRET_KEYS: [&str; 1] = ["secret_key"];

/// `config [--local] [--set key=value]`
pub fn show_or_set(state: &AppState, local: bool, set: Option<&str>) -> anyhow::Result<()> {
    let path = if local {
        state
            .project_config_path()
            .ok_or_else(|| SyncError::user("Not inside a project, run `s3sync init` first"))?
    } else {
        state.global_config_path()
    };

    let mapping = match set {
        Some(assignment) => {
            let mapping = set_value(&path, assignment)?;
            info!("配置已更新: {}", path.display());
            mapping
        }
        None => load_mapping(&path)?.unwrap_or_default(),
    };

    println!("# {}", path.display());
    print!("{}", serde_yaml::to_string(&masked(mapping))?);
    Ok(())
}

/// `init <bucket>`
pub fn init(state: &AppState, bucket: &str) -> anyhow::Result<()> {
    let path = init_project(&state.cwd, bucket)?;
    info!("初始化项目: {}", path.display());
    println!("Initialized project in {}", state.cwd.display());
    Ok(())
}

fn masked(mut mapping: Mapping) -> Mapping {
    for key in SECRET_KEYS {
        if let Some(value) = mapping.get_mut(key) {
            *value = Value::String("********".to_string());
        }
    }
    mapping
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masked_hides_secret() {
        let mut mapping = Mapping::new();
        mapping.insert(Value::from("secret_key"), Value::from("abc"));
        mapping.insert(Value::from("bucket"), Value::from("photos"));

        let shown = masked(mapping);
        assert_eq!(shown.get("secret_key"), Some(&Value::from("********")));
        assert_eq!(shown.get("bucket"), Some(&Value::from("photos")));
    }
}
