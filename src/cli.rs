//! 命令行参数定义

use crate::core::{Action, ConfirmPolicy};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// s3sync - sync a local directory tree with an S3 bucket
#[derive(Debug, Parser)]
#[command(name = "s3sync")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Directory holding the global config and logs
    #[arg(long, global = true)]
    pub config_dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List remote objects
    List {
        /// Path relative to the current directory
        path: Option<String>,
        /// Bucket to list instead of the configured one
        #[arg(short, long)]
        bucket: Option<String>,
        #[arg(short, long)]
        recursive: bool,
        /// Maximum number of printed objects, 0 for no limit
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Show differences between local files and the bucket
    Diff(DiffArgs),
    /// Apply differences between local files and the bucket
    Update(UpdateArgs),
    /// Upload a single file
    Upload {
        path: String,
        /// Replace the remote object if it exists
        #[arg(short, long)]
        force: bool,
    },
    /// Remove a single remote object
    Rm { path: String },
    /// Show or change configuration
    Config {
        /// Use the project config instead of the global one
        #[arg(short, long)]
        local: bool,
        /// Set an option, e.g. `--set bucket=photos`
        #[arg(short, long)]
        set: Option<String>,
    },
    /// Mark the current directory as a project root
    Init {
        /// Bucket used by this project
        bucket: String,
    },
    /// Check access to the configured bucket
    Buckets,
}

/// diff 和 update 共用的参数
#[derive(Debug, Args)]
pub struct CompareArgs {
    /// Local path to compare, relative to the current directory
    #[arg(short, long)]
    pub path: Option<String>,
    #[arg(short, long)]
    pub recursive: bool,
    /// Comma separated extensions, `^` prefix excludes them
    #[arg(short, long)]
    pub file_types: Option<String>,
    /// Compare sizes only
    #[arg(long)]
    pub skip_md5: bool,
    /// Match keys case-insensitively
    #[arg(short = 'i', long)]
    pub ignore_case: bool,
    /// Treat every changed file as newer locally
    #[arg(long, conflicts_with = "force_download")]
    pub force_upload: bool,
    /// Treat every changed file as newer remotely
    #[arg(long)]
    pub force_download: bool,
}

#[derive(Debug, Args)]
pub struct DiffArgs {
    #[command(flatten)]
    pub compare: CompareArgs,
    /// States to show: = + - < > r
    #[arg(short, long, default_value = "-<>+r")]
    pub modes: String,
    /// Print only state and key
    #[arg(short, long)]
    pub brief: bool,
    /// Print differences as JSON
    #[arg(long, conflicts_with = "brief")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct UpdateArgs {
    #[command(flatten)]
    pub compare: CompareArgs,
    /// States to apply: + - < > r
    #[arg(short, long, default_value = "-<>+")]
    pub modes: String,
    #[command(flatten)]
    pub confirm: ConfirmArgs,
    /// Maximum number of actions to apply
    #[arg(short, long)]
    pub limit: Option<usize>,
}

/// 预先确认的动作
#[derive(Debug, Args)]
pub struct ConfirmArgs {
    /// Skip every difference that is not confirmed by a flag
    #[arg(short, long)]
    pub quiet: bool,
    #[arg(long)]
    pub confirm_upload: bool,
    #[arg(long)]
    pub confirm_replace_upload: bool,
    #[arg(long)]
    pub confirm_download: bool,
    #[arg(long)]
    pub confirm_replace_download: bool,
    #[arg(long)]
    pub confirm_delete_local: bool,
    #[arg(long)]
    pub confirm_delete_remote: bool,
    #[arg(long)]
    pub confirm_rename_remote: bool,
    #[arg(long)]
    pub confirm_rename_local: bool,
}

impl ConfirmArgs {
    pub fn policy(&self) -> ConfirmPolicy {
        let flags = [
            (self.confirm_upload, Action::Upload),
            (self.confirm_replace_upload, Action::ReplaceUpload),
            (self.confirm_download, Action::Download),
            (self.confirm_replace_download, Action::ReplaceDownload),
            (self.confirm_delete_local, Action::DeleteLocal),
            (self.confirm_delete_remote, Action::DeleteRemote),
            (self.confirm_rename_remote, Action::RenameRemote),
            (self.confirm_rename_local, Action::RenameLocal),
        ];
        ConfirmPolicy {
            confirmed: flags
                .into_iter()
                .filter_map(|(set, action)| set.then_some(action))
                .collect(),
            quiet: self.quiet,
        }
    }
}
