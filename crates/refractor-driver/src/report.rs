//! 报告通道
//!
//! 命令通过 [`Reporter`] 发布面向操作员的进度与错误信息（英文短句）。
//! 报告在工作线程上发生，实现必须线程安全且不能长时间阻塞。

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::info;

/// 操作员报告接口
pub trait Reporter: Send + Sync {
    fn report(&self, line: &str);
}

/// 共享报告器
pub type SharedReporter = Arc<dyn Reporter>;

/// 写入 tracing 日志（target: `refractor::report`）
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&self, line: &str) {
        info!(target: "refractor::report", "{}", line);
    }
}

/// 把报告转发到 channel，由交互线程打印
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    sender: Sender<String>,
}

impl ChannelReporter {
    pub fn new() -> (Self, Receiver<String>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (Self { sender }, receiver)
    }
}

impl Reporter for ChannelReporter {
    fn report(&self, line: &str) {
        // 接收端已关闭时丢弃
        let _ = self.sender.send(line.to_string());
    }
}

/// 在内存中收集报告（测试用）
#[derive(Debug, Default)]
pub struct MemoryReporter {
    lines: Mutex<Vec<String>>,
}

impl MemoryReporter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// 是否有任意一行包含 `needle`
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.lock().iter().any(|line| line.contains(needle))
    }
}

impl Reporter for MemoryReporter {
    fn report(&self, line: &str) {
        self.lines.lock().push(line.to_string());
    }
}
