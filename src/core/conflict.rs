//! 确认门 - 决定每条差异执行哪个动作

use super::comparator::FileRecord;
use super::file_state::FileState;
use crate::error::{Result, SyncError};
use indicatif::MultiProgress;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::io;

/// 可对一条差异执行的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Upload,
    ReplaceUpload,
    Download,
    ReplaceDownload,
    DeleteLocal,
    DeleteRemote,
    RenameRemote,
    RenameLocal,
}

impl Action {
    pub const ALL: [Action; 8] = [
        Action::Upload,
        Action::ReplaceUpload,
        Action::Download,
        Action::ReplaceDownload,
        Action::DeleteLocal,
        Action::DeleteRemote,
        Action::RenameRemote,
        Action::RenameLocal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Upload => "upload",
            Action::ReplaceUpload => "replace_upload",
            Action::Download => "download",
            Action::ReplaceDownload => "replace_download",
            Action::DeleteLocal => "delete_local",
            Action::DeleteRemote => "delete_remote",
            Action::RenameRemote => "rename_remote",
            Action::RenameLocal => "rename_local",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.as_str() == s)
    }

    /// 该状态下可选的动作，顺序即确认标志的优先级
    pub fn candidates(state: FileState) -> &'static [Action] {
        match state {
            FileState::LocalOnly => &[Action::Upload, Action::DeleteLocal],
            FileState::RemoteOnly => &[Action::Download, Action::DeleteRemote],
            FileState::Renamed => &[Action::RenameRemote, Action::RenameLocal],
            FileState::LocalNewer => &[Action::ReplaceUpload],
            FileState::RemoteNewer => &[Action::ReplaceDownload],
            FileState::Equal => &[],
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 确认策略：预先确认的动作和静默模式
#[derive(Debug, Clone, Default)]
pub struct ConfirmPolicy {
    pub confirmed: HashSet<Action>,
    /// 没有预先确认的差异直接跳过，不提示
    pub quiet: bool,
}

impl ConfirmPolicy {
    pub fn confirm(mut self, action: Action) -> Self {
        self.confirmed.insert(action);
        self
    }

    fn confirmed_for(&self, state: FileState) -> Option<Action> {
        Action::candidates(state)
            .iter()
            .copied()
            .find(|a| self.confirmed.contains(a))
    }
}

/// 用户的回答
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Apply(Action),
    Skip,
}

impl Decision {
    fn action(self) -> Option<Action> {
        match self {
            Decision::Apply(action) => Some(action),
            Decision::Skip => None,
        }
    }
}

/// 本次会话中以 `all` 固定下来的回答
#[derive(Debug, Default)]
pub struct SessionDecisions {
    pinned: HashMap<FileState, Decision>,
}

impl SessionDecisions {
    pub fn get(&self, state: FileState) -> Option<Decision> {
        self.pinned.get(&state).copied()
    }

    pub fn pin(&mut self, state: FileState, decision: Decision) {
        self.pinned.insert(state, decision);
    }
}

/// 交互提问
pub trait Prompter: Send {
    /// 显示提示并读取一行回答
    fn ask(&mut self, prompt: &str) -> Result<String>;
}

/// 终端提问，进度条绘制期间暂停刷新
#[derive(Default)]
pub struct ConsolePrompter {
    multi: Option<MultiProgress>,
}

impl ConsolePrompter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_progress(multi: MultiProgress) -> Self {
        Self { multi: Some(multi) }
    }

    fn read_line(prompt: &str) -> Result<String> {
        dialoguer::Input::<String>::new()
            .with_prompt(prompt)
            .allow_empty(true)
            .interact_text()
            .map_err(|dialoguer::Error::IO(e)| prompt_error(e))
    }
}

/// 提问时按下 Ctrl-C 视为中断
fn prompt_error(err: io::Error) -> SyncError {
    match err.kind() {
        io::ErrorKind::Interrupted => SyncError::Interrupted,
        _ => SyncError::Io(err),
    }
}

impl Prompter for ConsolePrompter {
    fn ask(&mut self, prompt: &str) -> Result<String> {
        match &self.multi {
            Some(multi) => multi.suspend(|| Self::read_line(prompt)),
            None => Self::read_line(prompt),
        }
    }
}

/// 确认门
pub struct ConfirmGate {
    policy: ConfirmPolicy,
    session: SessionDecisions,
    prompter: Box<dyn Prompter>,
}

impl ConfirmGate {
    pub fn new(policy: ConfirmPolicy, prompter: Box<dyn Prompter>) -> Self {
        Self {
            policy,
            session: SessionDecisions::default(),
            prompter,
        }
    }

    /// 返回要执行的动作，None 表示跳过
    ///
    /// 优先级：确认标志 > 静默跳过 > 会话中固定的回答 > 提问。
    pub fn decide(&mut self, key: &str, record: &FileRecord) -> Result<Option<Action>> {
        let candidates = Action::candidates(record.state);
        if candidates.is_empty() {
            return Ok(None);
        }
        if let Some(action) = self.policy.confirmed_for(record.state) {
            return Ok(Some(action));
        }
        if self.policy.quiet {
            return Ok(None);
        }
        if let Some(decision) = self.session.get(record.state) {
            return Ok(decision.action());
        }

        let prompt = prompt_line(key, record, candidates);
        loop {
            let answer = self.prompter.ask(&prompt)?;
            if let Some((decision, remember)) = parse_answer(&answer, candidates) {
                if remember {
                    self.session.pin(record.state, decision);
                }
                return Ok(decision.action());
            }
        }
    }
}

/// `+ a.txt  (upload/delete_local/n [all])? `
fn prompt_line(key: &str, record: &FileRecord, candidates: &[Action]) -> String {
    let choices: Vec<&str> = candidates.iter().map(Action::as_str).collect();
    format!(
        "{} {} {} ({}/n [all])? ",
        record.state,
        key,
        record.comment_line(),
        choices.join("/")
    )
}

/// 解析 `upload`、`upload all`、`n`、`n all`，无效回答返回 None
fn parse_answer(answer: &str, candidates: &[Action]) -> Option<(Decision, bool)> {
    let mut parts = answer.split_whitespace();
    let choice = parts.next()?;
    let remember = match parts.next() {
        None => false,
        Some("all") => true,
        Some(_) => return None,
    };
    if parts.next().is_some() {
        return None;
    }

    let decision = if choice == "n" {
        Decision::Skip
    } else {
        let action = Action::parse(choice).filter(|a| candidates.contains(a))?;
        Decision::Apply(action)
    };
    Some((decision, remember))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// 按脚本回答，并记录收到的提示
    struct ScriptedPrompter {
        answers: VecDeque<String>,
        prompts: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedPrompter {
        fn new(answers: &[&str]) -> (Self, Arc<Mutex<Vec<String>>>) {
            let prompts = Arc::new(Mutex::new(Vec::new()));
            let prompter = Self {
                answers: answers.iter().map(|s| s.to_string()).collect(),
                prompts: prompts.clone(),
            };
            (prompter, prompts)
        }
    }

    impl Prompter for ScriptedPrompter {
        fn ask(&mut self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.answers
                .pop_front()
                .ok_or_else(|| SyncError::user("no more answers"))
        }
    }

    fn record(state: FileState) -> FileRecord {
        FileRecord {
            state,
            name: "a.txt".to_string(),
            size: Some(1),
            local_size: Some(2),
            modified: None,
            local_modified: None,
            md5: None,
            local_md5: None,
            comment: vec!["size: 200%".to_string()],
            local_path: None,
            local_name: None,
            remote: None,
        }
    }

    fn gate(policy: ConfirmPolicy, answers: &[&str]) -> (ConfirmGate, Arc<Mutex<Vec<String>>>) {
        let (prompter, prompts) = ScriptedPrompter::new(answers);
        (ConfirmGate::new(policy, Box::new(prompter)), prompts)
    }

    #[test]
    fn test_confirm_flag_decides_without_prompt() {
        let policy = ConfirmPolicy::default()
            .confirm(Action::DeleteLocal)
            .confirm(Action::Upload);
        let (mut gate, prompts) = gate(policy, &[]);

        let action = gate.decide("a.txt", &record(FileState::LocalOnly)).unwrap();
        assert_eq!(action, Some(Action::Upload));
        assert!(prompts.lock().unwrap().is_empty());
    }

    #[test]
    fn test_replace_download_flag() {
        let policy = ConfirmPolicy::default().confirm(Action::ReplaceDownload);
        let (mut gate, _) = gate(policy, &[]);

        assert_eq!(
            gate.decide("a.txt", &record(FileState::RemoteNewer)).unwrap(),
            Some(Action::ReplaceDownload)
        );
    }

    #[test]
    fn test_quiet_skips_unconfirmed() {
        let policy = ConfirmPolicy {
            quiet: true,
            ..ConfirmPolicy::default()
        }
        .confirm(Action::Upload);
        let (mut gate, prompts) = gate(policy, &[]);

        assert_eq!(gate.decide("a", &record(FileState::RemoteOnly)).unwrap(), None);
        assert_eq!(
            gate.decide("a", &record(FileState::LocalOnly)).unwrap(),
            Some(Action::Upload)
        );
        assert!(prompts.lock().unwrap().is_empty());
    }

    #[test]
    fn test_prompt_format() {
        let (mut gate, prompts) = gate(ConfirmPolicy::default(), &["n"]);
        assert_eq!(gate.decide("a.txt", &record(FileState::LocalOnly)).unwrap(), None);
        assert_eq!(
            prompts.lock().unwrap()[0],
            "+ a.txt size: 200% (upload/delete_local/n [all])? "
        );
    }

    #[test]
    fn test_invalid_answer_reprompts() {
        let (mut gate, prompts) = gate(ConfirmPolicy::default(), &["yes", "download", "upload"]);
        let action = gate.decide("a.txt", &record(FileState::LocalOnly)).unwrap();
        assert_eq!(action, Some(Action::Upload));
        assert_eq!(prompts.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_all_pins_answer_for_state() {
        let (mut gate, prompts) = gate(ConfirmPolicy::default(), &["delete_remote all", "n"]);

        for _ in 0..3 {
            assert_eq!(
                gate.decide("gone", &record(FileState::RemoteOnly)).unwrap(),
                Some(Action::DeleteRemote)
            );
        }
        // 其他状态仍然提问
        assert_eq!(gate.decide("new", &record(FileState::LocalOnly)).unwrap(), None);
        assert_eq!(prompts.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_skip_all_pins_skip() {
        let (mut gate, prompts) = gate(ConfirmPolicy::default(), &["n all"]);
        assert_eq!(gate.decide("x", &record(FileState::Renamed)).unwrap(), None);
        assert_eq!(gate.decide("y", &record(FileState::Renamed)).unwrap(), None);
        assert_eq!(prompts.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_equal_has_no_action() {
        let (mut gate, prompts) = gate(ConfirmPolicy::default(), &[]);
        assert_eq!(gate.decide("a", &record(FileState::Equal)).unwrap(), None);
        assert!(prompts.lock().unwrap().is_empty());
    }

    #[test]
    fn test_prompter_error_propagates() {
        let (mut gate, _) = gate(ConfirmPolicy::default(), &[]);
        assert!(gate.decide("a", &record(FileState::LocalNewer)).is_err());
    }

    #[test]
    fn test_interrupted_prompt_is_user_facing() {
        let err = prompt_error(io::Error::from(io::ErrorKind::Interrupted));
        assert!(matches!(err, SyncError::Interrupted));
        assert!(err.is_user_facing());

        let err = prompt_error(io::Error::from(io::ErrorKind::BrokenPipe));
        assert!(matches!(err, SyncError::Io(_)));
    }
}
