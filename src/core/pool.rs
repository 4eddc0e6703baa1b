//! 固定数量 worker 的任务池

use super::progress::{format_progress_line, Aggregator, PoolEvent, PoolReport, SpeedTracker, StatusSink};
use super::task::{Task, TaskContext};
use crate::error::{Result, SyncError};
use crate::storage::ProgressFn;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// 取消标志，可在等待中被唤醒
#[derive(Debug, Default)]
pub struct CancelFlag {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelFlag {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// 等待直到被取消
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// 任务池配置
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub workers: usize,
    /// 状态面板保留的已完成行数
    pub ended_lines: usize,
    /// join 时等待汇总任务的最长时间
    pub join_timeout: Duration,
    /// 取消后 worker 不再取新任务
    pub cancel: Arc<CancelFlag>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 16,
            ended_lines: 16,
            join_timeout: Duration::from_secs(5),
            cancel: Arc::new(CancelFlag::default()),
        }
    }
}

/// 传输统计
#[derive(Debug, Default)]
struct TransferStats {
    files_completed: AtomicU64,
    files_failed: AtomicU64,
    bytes_transferred: AtomicU64,
}

type TaskQueue = Arc<Mutex<mpsc::Receiver<Task>>>;

/// 任务池
///
/// 队列容量等于 worker 数，队列满时 `add_task` 等待。
pub struct WorkerPool {
    sender: mpsc::Sender<Task>,
    events: mpsc::UnboundedSender<PoolEvent>,
    workers: Vec<JoinHandle<()>>,
    aggregator: JoinHandle<PoolReport>,
    stats: Arc<TransferStats>,
    started: Instant,
    join_timeout: Duration,
}

impl WorkerPool {
    pub fn new(config: PoolConfig, context: Arc<TaskContext>, sink: Box<dyn StatusSink>) -> Self {
        let workers_count = config.workers.max(1);
        let (sender, receiver) = mpsc::channel(workers_count);
        let queue: TaskQueue = Arc::new(Mutex::new(receiver));
        let (events, event_rx) = mpsc::unbounded_channel();
        let stats = Arc::new(TransferStats::default());

        let aggregator = Aggregator::new(workers_count, config.ended_lines, sink);
        let aggregator = tokio::spawn(aggregator.run(event_rx));

        let workers = (0..workers_count)
            .map(|slot| {
                tokio::spawn(worker_loop(
                    slot,
                    queue.clone(),
                    context.clone(),
                    events.clone(),
                    stats.clone(),
                    config.cancel.clone(),
                ))
            })
            .collect();

        debug!("任务池启动: {} 个 worker", workers_count);
        Self {
            sender,
            events,
            workers,
            aggregator,
            stats,
            started: Instant::now(),
            join_timeout: config.join_timeout,
        }
    }

    /// 提交任务，队列满时等待
    pub async fn add_task(&self, task: Task) -> Result<()> {
        let _ = self.events.send(PoolEvent::Queued { bytes: task.size() });
        self.sender
            .send(task)
            .await
            .map_err(|e| SyncError::transfer(&e.0.key, "worker pool is closed"))
    }

    /// 关闭队列，等待所有任务和汇总结束
    pub async fn join(self) -> PoolReport {
        let Self {
            sender,
            events,
            workers,
            aggregator,
            stats,
            started,
            join_timeout,
        } = self;
        drop(sender);

        for worker in workers {
            if let Err(e) = worker.await {
                error!("worker 异常退出: {}", e);
            }
        }
        drop(events);

        match tokio::time::timeout(join_timeout, aggregator).await {
            Ok(Ok(report)) => report,
            Ok(Err(e)) => {
                warn!("进度汇总任务异常: {}", e);
                stats.report(started.elapsed())
            }
            Err(_) => {
                warn!("等待进度汇总超时");
                stats.report(started.elapsed())
            }
        }
    }
}

impl TransferStats {
    fn report(&self, elapsed: Duration) -> PoolReport {
        PoolReport {
            processed: self.files_completed.load(Ordering::Relaxed) as usize,
            failed: self.files_failed.load(Ordering::Relaxed) as usize,
            bytes: self.bytes_transferred.load(Ordering::Relaxed),
            elapsed,
        }
    }
}

async fn worker_loop(
    slot: usize,
    queue: TaskQueue,
    context: Arc<TaskContext>,
    events: mpsc::UnboundedSender<PoolEvent>,
    stats: Arc<TransferStats>,
    cancel: Arc<CancelFlag>,
) {
    let mut speed = SpeedTracker::default();
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            task = async { queue.lock().await.recv().await } => task,
        };
        let Some(task) = next else {
            break;
        };
        if cancel.is_cancelled() {
            debug!("已取消, 丢弃任务: {}", task.key);
            break;
        }

        let mut task = task.bind(context.clone());
        let size = task.size();
        let started = Instant::now();
        let progress = progress_reporter(slot, &task, speed.clone(), events.clone());

        let ok = match task.run(Some(progress)).await {
            Ok(_) => {
                speed.record(size, started.elapsed());
                stats.files_completed.fetch_add(1, Ordering::Relaxed);
                stats.bytes_transferred.fetch_add(size, Ordering::Relaxed);
                true
            }
            Err(e) => {
                // 单个任务失败不影响其他任务
                error!("任务失败 [{}] {}: {}", task.id, task.action, e);
                stats.files_failed.fetch_add(1, Ordering::Relaxed);
                false
            }
        };

        let summary = format!(
            "{} {} {}",
            task.record.state,
            task.display_name(),
            task.record.comment_line()
        );
        let _ = events.send(PoolEvent::Finished {
            slot,
            bytes: if ok { size } else { 0 },
            ok,
            summary,
        });
    }
    debug!("worker {} 退出", slot);
}

/// 把传输进度转换成状态行发给汇总任务
fn progress_reporter(
    slot: usize,
    task: &Task,
    speed: SpeedTracker,
    events: mpsc::UnboundedSender<PoolEvent>,
) -> ProgressFn {
    let action = task.action.as_str();
    let name = task.display_name().to_string();
    let started = Instant::now();
    Arc::new(move |done, total| {
        let secs = started.elapsed().as_secs_f64();
        let current = if secs > 0.0 { Some(done as f64 / secs) } else { None };
        let line = format_progress_line(done, total, speed.estimate(current), action, &name);
        let _ = events.send(PoolEvent::Progress { slot, line });
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::comparator::FileRecord;
    use crate::core::conflict::Action;
    use crate::core::file_state::FileState;
    use crate::core::progress::HiddenSink;
    use crate::storage::S3Storage;
    use opendal::Operator;
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;

    struct CaptureSink(Arc<StdMutex<Vec<String>>>);

    impl StatusSink for CaptureSink {
        fn draw(&mut self, lines: &[String]) {
            *self.0.lock().unwrap() = lines.to_vec();
        }
    }

    fn upload_record(dir: &TempDir, name: &str, content: &[u8]) -> FileRecord {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        FileRecord {
            state: FileState::LocalOnly,
            name: name.to_string(),
            size: None,
            local_size: Some(content.len() as u64),
            modified: None,
            local_modified: None,
            md5: None,
            local_md5: None,
            comment: Vec::new(),
            local_path: Some(path),
            local_name: None,
            remote: None,
        }
    }

    fn context(dir: &TempDir) -> (Arc<TaskContext>, Operator) {
        let operator = Operator::new(opendal::services::Memory::default())
            .unwrap()
            .finish();
        let store = Arc::new(S3Storage::from_operator(operator.clone(), "memory"));
        (Arc::new(TaskContext::new(store, dir.path())), operator)
    }

    fn config(workers: usize) -> PoolConfig {
        PoolConfig {
            workers,
            ended_lines: 4,
            join_timeout: Duration::from_secs(5),
            ..PoolConfig::default()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_processed_bytes_match_task_sizes() {
        let dir = TempDir::new().unwrap();
        let (ctx, operator) = context(&dir);
        let pool = WorkerPool::new(config(3), ctx, Box::new(HiddenSink));

        let mut expected = 0;
        for i in 0..10 {
            let content = vec![b'x'; i * 100 + 1];
            expected += content.len() as u64;
            let name = format!("f{}.bin", i);
            let record = upload_record(&dir, &name, &content);
            pool.add_task(Task::new(Action::Upload, name, record)).await.unwrap();
        }

        let report = pool.join().await;
        assert_eq!(report.processed, 10);
        assert_eq!(report.failed, 0);
        assert_eq!(report.bytes, expected);
        assert!(operator.stat("f9.bin").await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failed_task_does_not_stop_pool() {
        let dir = TempDir::new().unwrap();
        let (ctx, _) = context(&dir);
        let captured = Arc::new(StdMutex::new(Vec::new()));
        let pool = WorkerPool::new(config(1), ctx, Box::new(CaptureSink(captured.clone())));

        let mut missing = upload_record(&dir, "missing.txt", b"x");
        std::fs::remove_file(dir.path().join("missing.txt")).unwrap();
        missing.local_size = Some(1);
        pool.add_task(Task::new(Action::Upload, "missing.txt", missing))
            .await
            .unwrap();
        let ok = upload_record(&dir, "ok.txt", b"fine");
        pool.add_task(Task::new(Action::Upload, "ok.txt", ok)).await.unwrap();

        let report = pool.join().await;
        assert_eq!(report.processed, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.bytes, 4);

        let lines = captured.lock().unwrap().clone();
        assert!(lines.iter().any(|l| l.contains("missing.txt")));
        assert!(lines.iter().any(|l| l == "+ ok.txt uploaded"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_join_without_tasks() {
        let dir = TempDir::new().unwrap();
        let (ctx, _) = context(&dir);
        let pool = WorkerPool::new(config(4), ctx, Box::new(HiddenSink));

        let report = pool.join().await;
        assert_eq!(report.processed, 0);
        assert_eq!(report.bytes, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_skips_queued_tasks() {
        let dir = TempDir::new().unwrap();
        let (ctx, operator) = context(&dir);
        let cancel = Arc::new(CancelFlag::default());
        let pool = WorkerPool::new(
            PoolConfig {
                cancel: cancel.clone(),
                ..config(2)
            },
            ctx,
            Box::new(HiddenSink),
        );

        cancel.cancel();
        for name in ["a.txt", "b.txt"] {
            let record = upload_record(&dir, name, b"queued");
            // worker 已退出时队列关闭，提交可能失败
            let _ = pool.add_task(Task::new(Action::Upload, name, record)).await;
        }

        let report = pool.join().await;
        assert_eq!(report.processed, 0);
        assert_eq!(report.bytes, 0);
        assert!(operator.stat("a.txt").await.is_err());
        assert!(operator.stat("b.txt").await.is_err());
    }

    #[test]
    fn test_cancel_flag_wakes_waiters() {
        let flag = CancelFlag::default();
        assert!(!flag.is_cancelled());
        flag.cancel();
        assert!(flag.is_cancelled());
        futures::executor::block_on(flag.cancelled());
    }
}
