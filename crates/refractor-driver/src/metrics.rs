//! 命令队列计数器
//!
//! 原子计数器，工作线程写入，任何线程都可以无锁读取快照。

use std::sync::atomic::{AtomicU64, Ordering};

/// 队列运行指标
#[derive(Debug, Default)]
pub struct QueueMetrics {
    /// 成功入队的命令数
    pub submitted: AtomicU64,
    /// 开始执行的命令数
    pub started: AtomicU64,
    /// 成功完成的命令数
    pub completed: AtomicU64,
    /// 返回错误的命令数（不含取消）
    pub failed: AtomicU64,
    /// 被取消的命令数
    pub cancelled: AtomicU64,
    /// panic 的命令数
    pub panicked: AtomicU64,
}

impl QueueMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            started: self.started.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// 指标快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueSnapshot {
    pub submitted: u64,
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub panicked: u64,
}

impl QueueSnapshot {
    /// 已结束（任意结果）的命令数
    pub fn finished(&self) -> u64 {
        self.completed + self.failed + self.cancelled + self.panicked
    }

    /// 未成功结束（失败、取消或 panic）的命令数
    pub fn unsuccessful(&self) -> u64 {
        self.failed + self.cancelled + self.panicked
    }

    /// 入队但尚未结束的命令数
    pub fn outstanding(&self) -> u64 {
        self.submitted.saturating_sub(self.finished())
    }
}
