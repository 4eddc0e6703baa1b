//! diff 和 update 命令

use crate::cli::{CompareArgs, DiffArgs, UpdateArgs};
use crate::config::AppConfig;
use crate::core::{
    humanize_size, CancelFlag, CompareRequest, ConsolePrompter, Direction, FileComparator,
    FileRecord, FileState, FileTypeFilter, ModeSet, SyncEngine, TerminalSink, UpdateRequest,
};
use crate::error::{Result, SyncError};
use console::{style, StyledObject};
use indicatif::MultiProgress;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

/// 被 SIGINT 终止时的退出码
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// 把命令行参数和配置合并成对比请求
pub fn compare_request(args: &CompareArgs, modes: &str, config: &AppConfig) -> Result<CompareRequest> {
    let force = if args.force_upload {
        Some(Direction::Upload)
    } else if args.force_download {
        Some(Direction::Download)
    } else {
        None
    };

    Ok(CompareRequest {
        path: args.path.clone(),
        recursive: args.recursive,
        modes: modes.parse::<ModeSet>()?,
        file_types: FileTypeFilter::parse(args.file_types.as_deref()),
        use_checksum: config.compare_hash && !args.skip_md5,
        case_insensitive: config.case_insensitive || args.ignore_case,
        force,
    })
}

/// `diff`
pub async fn diff(engine: &SyncEngine, args: &DiffArgs) -> anyhow::Result<()> {
    let request = compare_request(&args.compare, &args.modes, engine.config())?;
    let records = engine.diff(&request).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    for (key, record) in &records {
        println!(
            "{} {}",
            styled_state(record.state),
            diff_line(key, record, args.brief)
        );
    }
    print_summary(&records);
    Ok(())
}

/// `update`
pub async fn update(engine: &SyncEngine, args: &UpdateArgs) -> anyhow::Result<()> {
    let request = UpdateRequest {
        compare: compare_request(&args.compare, &args.modes, engine.config())?,
        policy: args.confirm.policy(),
        limit: args.limit,
    };

    let interrupt = tokio::spawn(watch_interrupt(engine.cancel_flag()));
    // 结束时取消信号监听
    scopeguard::defer! {
        interrupt.abort();
    }

    let multi = MultiProgress::new();
    let report = engine
        .update(
            &request,
            Box::new(ConsolePrompter::with_progress(multi.clone())),
            Box::new(TerminalSink::new(multi)),
        )
        .await?;

    if report.records == 0 {
        println!("no differences");
        return Ok(());
    }

    println!("average speed: {}", humanize_size(report.average_speed()).trim());
    println!(
        "{} actions processed, {} skipped",
        report.processed, report.skipped
    );
    if report.failed > 0 {
        println!("{}", style(format!("{} actions failed", report.failed)).red());
    }
    if report.interrupted {
        return Err(SyncError::Interrupted.into());
    }
    Ok(())
}

/// 第一次 Ctrl-C 停止派发任务，第二次直接退出
async fn watch_interrupt(cancel: Arc<CancelFlag>) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    warn!("收到中断信号, 等待进行中的任务结束, 再次按 Ctrl-C 立即退出");
    cancel.cancel();

    if tokio::signal::ctrl_c().await.is_ok() {
        warn!("再次收到中断信号, 立即退出");
        eprintln!("! interrupted");
        std::process::exit(INTERRUPTED_EXIT_CODE);
    }
}

/// 单条差异的显示（不含状态符号）
fn diff_line(key: &str, record: &FileRecord, brief: bool) -> String {
    let comment = record.comment_line();
    if brief || comment.is_empty() {
        key.to_string()
    } else {
        format!("{} {}", key, comment)
    }
}

fn styled_state(state: FileState) -> StyledObject<char> {
    let symbol = style(state.symbol());
    match state {
        FileState::LocalOnly | FileState::LocalNewer => symbol.green(),
        FileState::RemoteOnly | FileState::RemoteNewer => symbol.cyan(),
        FileState::Renamed => symbol.yellow(),
        FileState::Equal => symbol.dim(),
    }
}

fn print_summary(records: &BTreeMap<String, FileRecord>) {
    let summary = FileComparator::summarize(records);
    let counts: Vec<String> = summary
        .counts
        .iter()
        .map(|(state, count)| format!("{}: {}", state, count))
        .collect();
    if counts.is_empty() {
        println!("0 differences");
    } else {
        println!("{} differences ({})", summary.total(), counts.join(", "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};
    use crate::core::LocalEntry;
    use clap::Parser;

    fn diff_args(argv: &[&str]) -> DiffArgs {
        let cli = Cli::try_parse_from(argv).unwrap();
        match cli.command {
            Commands::Diff(args) => args,
            _ => panic!("expected diff"),
        }
    }

    #[test]
    fn test_compare_request_merges_config() {
        let args = diff_args(&["s3sync", "diff", "-i", "--skip-md5", "-f", "^tmp", "--force-download"]);
        let config = AppConfig::default();

        let request = compare_request(&args.compare, &args.modes, &config).unwrap();
        assert!(!request.use_checksum);
        assert!(request.case_insensitive);
        assert_eq!(request.force, Some(Direction::Download));
        assert!(request.modes.contains(FileState::Renamed));
        assert!(!request.file_types.matches("a.tmp"));
    }

    #[test]
    fn test_compare_request_rejects_bad_mode() {
        let args = diff_args(&["s3sync", "diff", "-m", "+x"]);
        let err = compare_request(&args.compare, &args.modes, &AppConfig::default()).unwrap_err();
        assert!(err.is_user_facing());
    }

    #[test]
    fn test_diff_line() {
        let mut record = FileRecord::from_local(&LocalEntry {
            key: "a.txt".to_string(),
            path: "/tmp/a.txt".into(),
            size: 10,
            modified: chrono::Utc::now(),
            md5: None,
        });
        assert_eq!(diff_line("a.txt", &record, false), "a.txt");

        record.comment.push("size: 50%".to_string());
        assert_eq!(diff_line("a.txt", &record, false), "a.txt size: 50%");
        assert_eq!(diff_line("a.txt", &record, true), "a.txt");
    }
}
