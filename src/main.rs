use clap::Parser;
use s3sync_lib::cli::{Cli, Commands};
use s3sync_lib::commands::{self, build_engine};
use s3sync_lib::logging::{get_log_dir, SizeRotatingWriter};
use s3sync_lib::{AppConfig, AppState, SyncError};
use std::path::Path;
use std::process::ExitCode;
use tracing::{error, warn, Level};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;

/// 初始化日志系统
fn init_logging(config: &AppConfig, config_dir: &Path, verbose: u8) {
    let file_level = config.log.tracing_level();
    let console_level = match verbose {
        0 => Level::WARN,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    // 创建日志级别过滤器
    let mut env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(file_level.max(console_level).into());
    for directive in ["hyper=warn", "reqwest=warn", "opendal=warn"] {
        if let Ok(directive) = directive.parse() {
            env_filter = env_filter.add_directive(directive);
        }
    }

    // 文件日志层
    let log_dir = get_log_dir(config_dir);
    let mut file_error = None;
    let file_layer = if config.log.enabled {
        match SizeRotatingWriter::new(&log_dir, config.log.max_size_mb) {
            Ok(writer) => Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_thread_names(false)
                    .with_filter(LevelFilter::from_level(file_level)),
            ),
            Err(err) => {
                file_error = Some(err);
                None
            }
        }
    } else {
        None
    };

    // 控制台只显示警告，-v 打开调试输出
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .with_filter(LevelFilter::from_level(console_level));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init();

    if let Some(err) = file_error {
        warn!("无法创建日志文件 {}: {}", log_dir.display(), err);
    }
}

async fn run(command: Commands, state: &AppState) -> anyhow::Result<()> {
    match command {
        Commands::Config { local, set } => {
            commands::config::show_or_set(state, local, set.as_deref())
        }
        Commands::Init { bucket } => commands::config::init(state, &bucket),
        Commands::List {
            path,
            bucket,
            recursive,
            limit,
        } => {
            let engine = build_engine(state, bucket.as_deref())?;
            commands::list::list(&engine, path.as_deref(), recursive, limit).await
        }
        Commands::Buckets => {
            let engine = build_engine(state, None)?;
            commands::list::buckets(&engine).await
        }
        Commands::Diff(args) => {
            let engine = build_engine(state, None)?;
            commands::sync::diff(&engine, &args).await
        }
        Commands::Update(args) => {
            let engine = build_engine(state, None)?;
            commands::sync::update(&engine, &args).await
        }
        Commands::Upload { path, force } => {
            let engine = build_engine(state, None)?;
            commands::transfer::upload(&engine, &path, force).await
        }
        Commands::Rm { path } => {
            let engine = build_engine(state, None)?;
            commands::transfer::remove(&engine, &path).await
        }
    }
}

fn report_error(err: &anyhow::Error) {
    match err.downcast_ref::<SyncError>() {
        Some(sync_err) if sync_err.is_user_facing() => eprintln!("! {}", sync_err),
        _ => {
            error!("{:#}", err);
            eprintln!("Error: {:#}", err);
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let state = match AppState::new(cli.config_dir.clone()) {
        Ok(state) => state,
        Err(err) => {
            eprintln!("! Failed to load configuration: {}", err);
            return ExitCode::FAILURE;
        }
    };
    init_logging(&state.config, &state.config_dir, cli.verbose);

    match run(cli.command, &state).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report_error(&err);
            ExitCode::FAILURE
        }
    }
}
