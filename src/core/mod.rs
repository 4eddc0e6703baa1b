pub mod comparator;
pub mod conflict;
pub mod engine;
pub mod file_state;
pub mod pool;
pub mod progress;
pub mod scanner;
pub mod task;

pub use comparator::{CompareConfig, DiffSummary, Direction, FileComparator, FileRecord};
pub use conflict::{Action, ConfirmGate, ConfirmPolicy, ConsolePrompter, Prompter};
pub use engine::{CompareRequest, SyncEngine, UpdateReport, UpdateRequest};
pub use file_state::{calculate_hash, file_hash, FileState, ModeSet};
pub use pool::{CancelFlag, PoolConfig, WorkerPool};
pub use progress::{humanize_size, HiddenSink, PoolReport, StatusSink, TerminalSink};
pub use scanner::{FileScanner, FileTypeFilter, LocalEntry, ScanConfig};
pub use task::{Task, TaskContext, TaskState};
