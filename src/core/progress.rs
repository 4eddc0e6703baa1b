//! 进度汇总 - 把 worker 的进度事件合成终端状态面板

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// 进度条宽度（字符）
pub const BAR_WIDTH: usize = 40;
/// 速度估算使用的最近速率个数
pub const RECENT_RATES: usize = 16;

const SPEED_LABELS: [&str; 5] = [" Bps", "KBps", "MBps", "GBps", "TBps"];

/// 速度格式化，如 `   1.50 MBps`
pub fn humanize_size(bytes_per_sec: f64) -> String {
    let mut value = bytes_per_sec.max(0.0);
    let mut index = 0;
    while value >= 1024.0 && index < SPEED_LABELS.len() - 1 {
        value /= 1024.0;
        index += 1;
    }
    format!("{:7.2} {}", value, SPEED_LABELS[index])
}

/// 单个 worker 的速度记录
#[derive(Debug, Clone, Default)]
pub struct SpeedTracker {
    rates: VecDeque<f64>,
}

impl SpeedTracker {
    /// 记录一个已完成任务的平均速率；删除和改名没有传输字节，不计入
    pub fn record(&mut self, bytes: u64, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        if bytes == 0 || secs <= 0.0 {
            return;
        }
        self.rates.push_back(bytes as f64 / secs);
        if self.rates.len() > RECENT_RATES {
            self.rates.pop_front();
        }
    }

    /// 历史速率与当前速率的平均值
    pub fn estimate(&self, current: Option<f64>) -> f64 {
        let count = self.rates.len() + usize::from(current.is_some());
        if count == 0 {
            return 0.0;
        }
        let sum: f64 = self.rates.iter().sum::<f64>() + current.unwrap_or(0.0);
        sum / count as f64
    }
}

/// `[=====>     ]  50%    1.00 KBps upload a.txt`
pub fn format_progress_line(done: u64, total: u64, speed: f64, action: &str, name: &str) -> String {
    let ratio = if total == 0 {
        1.0
    } else {
        (done as f64 / total as f64).min(1.0)
    };
    let filled = (ratio * BAR_WIDTH as f64) as usize;
    format!(
        "[{}>{}] {:3.0}% {} {} {}",
        "=".repeat(filled),
        " ".repeat(BAR_WIDTH - filled),
        ratio * 100.0,
        humanize_size(speed),
        action,
        name
    )
}

/// worker 发给汇总任务的事件
#[derive(Debug, Clone, PartialEq)]
pub enum PoolEvent {
    /// 任务入队
    Queued { bytes: u64 },
    /// worker 的当前进度行
    Progress { slot: usize, line: String },
    /// 任务结束
    Finished {
        slot: usize,
        bytes: u64,
        ok: bool,
        summary: String,
    },
}

/// 执行结果统计
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PoolReport {
    pub processed: usize,
    pub failed: usize,
    pub bytes: u64,
    pub elapsed: Duration,
}

impl PoolReport {
    pub fn average_speed(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.bytes as f64 / secs
        } else {
            0.0
        }
    }
}

/// 状态面板：已完成的最近几行、每个 worker 一行、总计一行
#[derive(Debug)]
pub struct StatusBoard {
    total: String,
    slots: Vec<Option<String>>,
    ended: VecDeque<String>,
    ended_max: usize,
}

impl StatusBoard {
    pub fn new(workers: usize, ended_max: usize) -> Self {
        Self {
            total: String::new(),
            slots: vec![None; workers],
            ended: VecDeque::new(),
            ended_max,
        }
    }

    pub fn set_total(&mut self, line: String) {
        self.total = line;
    }

    pub fn set_slot(&mut self, slot: usize, line: String) {
        if let Some(s) = self.slots.get_mut(slot) {
            *s = Some(line);
        }
    }

    pub fn clear_slot(&mut self, slot: usize) {
        if let Some(s) = self.slots.get_mut(slot) {
            *s = None;
        }
    }

    pub fn push_ended(&mut self, line: String) {
        if self.ended_max == 0 {
            return;
        }
        self.ended.push_back(line);
        while self.ended.len() > self.ended_max {
            self.ended.pop_front();
        }
    }

    pub fn lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self.ended.iter().cloned().collect();
        lines.extend(self.slots.iter().flatten().cloned());
        if !self.total.is_empty() {
            lines.push(self.total.clone());
        }
        lines
    }
}

/// 状态面板的输出目标
pub trait StatusSink: Send {
    fn draw(&mut self, lines: &[String]);

    fn finish(&mut self, lines: &[String]) {
        self.draw(lines);
    }
}

/// 不输出
pub struct HiddenSink;

impl StatusSink for HiddenSink {
    fn draw(&mut self, _lines: &[String]) {}
}

/// 终端多行输出，只重绘变化的行
pub struct TerminalSink {
    multi: MultiProgress,
    bars: Vec<ProgressBar>,
    drawn: Vec<String>,
}

impl TerminalSink {
    pub fn new(multi: MultiProgress) -> Self {
        Self {
            multi,
            bars: Vec::new(),
            drawn: Vec::new(),
        }
    }

    fn add_bar(&mut self) {
        let style = ProgressStyle::with_template("{msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        let bar = self.multi.add(ProgressBar::new_spinner().with_style(style));
        self.bars.push(bar);
        self.drawn.push(String::new());
    }
}

impl StatusSink for TerminalSink {
    fn draw(&mut self, lines: &[String]) {
        while self.bars.len() < lines.len() {
            self.add_bar();
        }
        for (index, bar) in self.bars.iter().enumerate() {
            let line = lines.get(index).map(String::as_str).unwrap_or("");
            if self.drawn[index] != line {
                bar.set_message(line.to_string());
                self.drawn[index] = line.to_string();
            }
        }
    }

    fn finish(&mut self, lines: &[String]) {
        self.draw(lines);
        for (bar, line) in self.bars.iter().zip(&self.drawn) {
            if line.is_empty() {
                bar.finish_and_clear();
            } else {
                bar.finish();
            }
        }
    }
}

/// 汇总 worker 事件并刷新状态面板
pub struct Aggregator {
    board: StatusBoard,
    sink: Box<dyn StatusSink>,
    queued: usize,
    queued_bytes: u64,
    report: PoolReport,
    started: Instant,
}

impl Aggregator {
    pub fn new(workers: usize, ended_max: usize, sink: Box<dyn StatusSink>) -> Self {
        Self {
            board: StatusBoard::new(workers, ended_max),
            sink,
            queued: 0,
            queued_bytes: 0,
            report: PoolReport::default(),
            started: Instant::now(),
        }
    }

    pub fn handle(&mut self, event: PoolEvent) {
        match event {
            PoolEvent::Queued { bytes } => {
                self.queued += 1;
                self.queued_bytes += bytes;
            }
            PoolEvent::Progress { slot, line } => self.board.set_slot(slot, line),
            PoolEvent::Finished {
                slot,
                bytes,
                ok,
                summary,
            } => {
                if ok {
                    self.report.processed += 1;
                    self.report.bytes += bytes;
                } else {
                    self.report.failed += 1;
                }
                self.board.clear_slot(slot);
                self.board.push_ended(summary);
            }
        }
        self.report.elapsed = self.started.elapsed();
        self.board.set_total(self.total_line());
        self.sink.draw(&self.board.lines());
    }

    fn total_line(&self) -> String {
        let finished = self.report.processed + self.report.failed;
        let ratio = if self.queued_bytes > 0 {
            self.report.bytes as f64 / self.queued_bytes as f64
        } else if self.queued > 0 {
            finished as f64 / self.queued as f64
        } else {
            0.0
        };
        let mut line = format!(
            "[total] {:3.0}% {} {}/{} tasks",
            ratio.min(1.0) * 100.0,
            humanize_size(self.report.average_speed()),
            finished,
            self.queued
        );
        if self.report.failed > 0 {
            line.push_str(&format!(", {} failed", self.report.failed));
        }
        line
    }

    pub fn report(&self) -> PoolReport {
        self.report
    }

    /// 消费事件直到所有发送端关闭
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<PoolEvent>) -> PoolReport {
        while let Some(event) = events.recv().await {
            self.handle(event);
        }
        self.report.elapsed = self.started.elapsed();
        self.sink.finish(&self.board.lines());
        self.report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct CaptureSink(Arc<Mutex<Vec<String>>>);

    impl StatusSink for CaptureSink {
        fn draw(&mut self, lines: &[String]) {
            *self.0.lock().unwrap() = lines.to_vec();
        }
    }

    #[test]
    fn test_humanize_size() {
        assert_eq!(humanize_size(0.0), "   0.00  Bps");
        assert_eq!(humanize_size(1536.0), "   1.50 KBps");
        assert_eq!(humanize_size(3.0 * 1024.0 * 1024.0), "   3.00 MBps");
    }

    #[test]
    fn test_speed_estimate_is_unweighted_mean() {
        let mut tracker = SpeedTracker::default();
        assert_eq!(tracker.estimate(None), 0.0);
        tracker.record(100, Duration::from_secs(1));
        tracker.record(300, Duration::from_secs(1));
        assert_eq!(tracker.estimate(None), 200.0);
        assert_eq!(tracker.estimate(Some(500.0)), 300.0);
    }

    #[test]
    fn test_speed_tracker_ignores_empty_tasks() {
        let mut tracker = SpeedTracker::default();
        tracker.record(1000, Duration::from_secs(1));
        tracker.record(0, Duration::from_secs(1));
        tracker.record(0, Duration::from_millis(10));
        assert_eq!(tracker.estimate(None), 1000.0);
    }

    #[test]
    fn test_speed_tracker_keeps_recent_rates() {
        let mut tracker = SpeedTracker::default();
        for _ in 0..RECENT_RATES {
            tracker.record(1, Duration::from_secs(1));
        }
        for _ in 0..RECENT_RATES {
            tracker.record(5, Duration::from_secs(1));
        }
        assert_eq!(tracker.estimate(None), 5.0);
    }

    #[test]
    fn test_progress_line() {
        let line = format_progress_line(50, 100, 1024.0, "upload", "a.txt");
        let expected = format!(
            "[{}>{}]  50%    1.00 KBps upload a.txt",
            "=".repeat(20),
            " ".repeat(20)
        );
        assert_eq!(line, expected);

        let empty = format_progress_line(0, 0, 0.0, "delete_remote", "b");
        assert!(empty.starts_with(&format!("[{}>]", "=".repeat(BAR_WIDTH))));
        assert!(empty.contains("100%"));
    }

    #[test]
    fn test_board_keeps_last_ended_lines() {
        let mut board = StatusBoard::new(2, 2);
        board.push_ended("one".to_string());
        board.push_ended("two".to_string());
        board.push_ended("three".to_string());
        board.set_slot(1, "busy".to_string());
        board.set_slot(5, "ignored".to_string());
        board.set_total("total".to_string());

        assert_eq!(board.lines(), vec!["two", "three", "busy", "total"]);

        board.clear_slot(1);
        assert_eq!(board.lines(), vec!["two", "three", "total"]);
    }

    #[test]
    fn test_aggregator_accounts_finished_tasks() {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let mut aggregator = Aggregator::new(2, 4, Box::new(CaptureSink(captured.clone())));

        aggregator.handle(PoolEvent::Queued { bytes: 10 });
        aggregator.handle(PoolEvent::Queued { bytes: 30 });
        aggregator.handle(PoolEvent::Progress {
            slot: 0,
            line: "working".to_string(),
        });
        assert!(captured.lock().unwrap().contains(&"working".to_string()));

        aggregator.handle(PoolEvent::Finished {
            slot: 0,
            bytes: 10,
            ok: true,
            summary: "uploaded a".to_string(),
        });
        aggregator.handle(PoolEvent::Finished {
            slot: 1,
            bytes: 0,
            ok: false,
            summary: "b: failed".to_string(),
        });

        let report = aggregator.report();
        assert_eq!(report.processed, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.bytes, 10);

        let lines = captured.lock().unwrap().clone();
        assert_eq!(lines[0], "uploaded a");
        assert_eq!(lines[1], "b: failed");
        assert!(lines[2].starts_with("[total]"));
        assert!(lines[2].ends_with("2/2 tasks, 1 failed"));
    }
}
