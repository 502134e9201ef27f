//! 命令执行钩子
//!
//! 工作线程在每条命令开始和结束时通知已注册的观察者，
//! 用于审计日志、测试中的执行顺序断言等。
//!
//! 回调在工作线程上同步执行，实现应尽快返回。

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::ErrorKind;

/// 命令执行结果摘要
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Completed,
    Failed(ErrorKind),
    Panicked,
}

/// 命令观察者
pub trait CommandObserver: Send + Sync {
    /// 命令开始执行
    fn on_started(&self, _name: &str) {}

    /// 命令执行结束（无论成功与否）
    fn on_finished(&self, name: &str, outcome: CommandOutcome, elapsed: Duration);
}

/// 观察者集合
#[derive(Default)]
pub struct HookManager {
    observers: Vec<Arc<dyn CommandObserver>>,
}

impl HookManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_observer(&mut self, observer: Arc<dyn CommandObserver>) {
        self.observers.push(observer);
    }

    pub fn notify_started(&self, name: &str) {
        for observer in &self.observers {
            observer.on_started(name);
        }
    }

    pub fn notify_finished(&self, name: &str, outcome: CommandOutcome, elapsed: Duration) {
        for observer in &self.observers {
            observer.on_finished(name, outcome, elapsed);
        }
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl std::fmt::Debug for HookManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookManager").field("observers", &self.observers.len()).finish()
    }
}

/// 单条命令的执行记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRecord {
    pub name: String,
    pub started_at: Instant,
    pub finished_at: Instant,
    pub outcome: CommandOutcome,
}

/// 记录执行顺序与起止时间的观察者
///
/// 队列同一时刻只执行一条命令，所以只需要一个"进行中"槽位。
#[derive(Debug, Default)]
pub struct ExecutionLog {
    current: Mutex<Option<(String, Instant)>>,
    records: Mutex<Vec<ExecutionRecord>>,
}

impl ExecutionLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn records(&self) -> Vec<ExecutionRecord> {
        self.records.lock().clone()
    }

    /// 已完成命令的名字（按完成顺序）
    pub fn names(&self) -> Vec<String> {
        self.records.lock().iter().map(|r| r.name.clone()).collect()
    }

    /// 当前正在执行的命令
    pub fn in_flight(&self) -> Option<String> {
        self.current.lock().as_ref().map(|(name, _)| name.clone())
    }
}

impl CommandObserver for ExecutionLog {
    fn on_started(&self, name: &str) {
        *self.current.lock() = Some((name.to_string(), Instant::now()));
    }

    fn on_finished(&self, name: &str, outcome: CommandOutcome, elapsed: Duration) {
        let finished_at = Instant::now();
        let started_at = match self.current.lock().take() {
            Some((_, started)) => started,
            None => finished_at - elapsed,
        };
        self.records.lock().push(ExecutionRecord {
            name: name.to_string(),
            started_at,
            finished_at,
            outcome,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hook_manager_notifies_all_observers() {
        let first = ExecutionLog::new();
        let second = ExecutionLog::new();
        let mut hooks = HookManager::new();
        assert!(hooks.is_empty());
        hooks.add_observer(first.clone());
        hooks.add_observer(second.clone());
        assert_eq!(hooks.len(), 2);

        hooks.notify_started("open");
        assert_eq!(first.in_flight().as_deref(), Some("open"));
        hooks.notify_finished("open", CommandOutcome::Completed, Duration::from_millis(1));

        assert_eq!(first.names(), vec!["open"]);
        assert_eq!(second.names(), vec!["open"]);
        assert!(first.in_flight().is_none());
    }

    #[test]
    fn test_execution_log_records_outcome() {
        let log = ExecutionLog::new();
        log.on_started("home");
        log.on_finished(
            "home",
            CommandOutcome::Failed(ErrorKind::HardwareFault),
            Duration::ZERO,
        );

        let records = log.records();
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].outcome,
            CommandOutcome::Failed(ErrorKind::HardwareFault)
        );
        assert!(records[0].started_at <= records[0].finished_at);
    }
}
