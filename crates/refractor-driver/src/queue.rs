//! 命令队列（对外 API）
//!
//! 进程内唯一的硬件命令通道：任意线程提交，单个工作线程
//! （`refractor-worker`）按提交顺序逐条执行，保证任何两条硬件动作不会并发。

use std::sync::Arc;
use std::thread::{JoinHandle, spawn};
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error};

use crate::worker::{Job, WorkerContext, worker_loop};
use crate::{
    CancelToken, Command, CommandObserver, DriverError, HookManager, QueueConfig, QueueMetrics,
    QueueSnapshot, SharedReporter, WorkerStatus,
};

/// 带超时的线程 join
trait JoinTimeout {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()>;
}

impl<T: Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()> {
        use std::sync::mpsc;

        let (tx, rx) = mpsc::channel();
        // 看门狗线程负责 join，超时后由进程退出回收
        spawn(move || {
            let _ = tx.send(self.join());
        });

        match rx.recv_timeout(timeout) {
            Ok(join_result) => join_result.map(|_| ()),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Thread join timeout",
            ))),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "Thread panicked during join",
            ))),
        }
    }
}

/// 单消费者 FIFO 命令队列
///
/// # 示例
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use refractor_driver::{Command, CommandQueue, MemoryReporter};
///
/// let reporter = MemoryReporter::new();
/// let queue = CommandQueue::new(reporter.clone()).unwrap();
///
/// let r = reporter.clone();
/// queue.submit(Command::new("greet", move || {
///     use refractor_driver::Reporter;
///     r.report("hello from the worker");
///     Ok(())
/// })).unwrap();
///
/// queue.flush(Duration::from_secs(1)).unwrap();
/// assert!(reporter.contains("hello from the worker"));
/// ```
pub struct CommandQueue {
    sender: Mutex<Option<Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    ctx: Arc<WorkerContext>,
    config: QueueConfig,
}

impl CommandQueue {
    /// 使用默认配置创建队列并启动工作线程
    pub fn new(reporter: SharedReporter) -> Result<Self, DriverError> {
        Self::with_config(reporter, QueueConfig::default())
    }

    /// 使用指定配置创建队列并启动工作线程
    ///
    /// # 错误
    /// - `DriverError::Spawn`: 无法创建线程
    pub fn with_config(reporter: SharedReporter, config: QueueConfig) -> Result<Self, DriverError> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let ctx = Arc::new(WorkerContext {
            reporter,
            hooks: Arc::new(RwLock::new(HookManager::new())),
            metrics: Arc::new(QueueMetrics::new()),
            cancel: CancelToken::new(),
            status: Mutex::new(WorkerStatus::Running),
        });

        let worker_ctx = ctx.clone();
        let policy = config.fault_policy;
        let worker = std::thread::Builder::new()
            .name("refractor-worker".into())
            .spawn(move || worker_loop(receiver, worker_ctx, policy))
            .map_err(DriverError::Spawn)?;

        debug!("Command worker started ({:?})", policy);
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            ctx,
            config,
        })
    }

    fn send(&self, job: Job) -> Result<(), DriverError> {
        let sender = self.sender.lock();
        let sender = sender.as_ref().ok_or(DriverError::WorkerStopped)?;
        sender.send(job).map_err(|_| DriverError::WorkerStopped)
    }

    /// 追加一条命令，立即返回
    ///
    /// # 错误
    /// - `DriverError::WorkerStopped`: 工作线程已停止或队列已关闭
    pub fn submit(&self, command: Command) -> Result<(), DriverError> {
        let name = command.name().to_string();
        self.send(Job::Run(command))?;
        QueueMetrics::incr(&self.ctx.metrics.submitted);
        debug!("Queued command: {}", name);
        Ok(())
    }

    /// 等待此前提交的所有命令执行完毕
    ///
    /// # 错误
    /// - `DriverError::Timeout`: 超时（命令仍在执行）
    /// - `DriverError::WorkerStopped`: 工作线程在屏障之前停止
    pub fn flush(&self, timeout: Duration) -> Result<(), DriverError> {
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        self.send(Job::Barrier(done_tx))?;
        match done_rx.recv_timeout(timeout) {
            Ok(()) => Ok(()),
            Err(RecvTimeoutError::Timeout) => Err(DriverError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(DriverError::WorkerStopped),
        }
    }

    /// 请求取消当前正在执行的命令（不影响排队中的命令）
    pub fn cancel_current(&self) {
        self.ctx.cancel.cancel();
    }

    /// 与运动控制共享的取消标志
    pub fn cancel_token(&self) -> CancelToken {
        self.ctx.cancel.clone()
    }

    /// 注册命令观察者
    pub fn add_observer(&self, observer: Arc<dyn CommandObserver>) {
        self.ctx.hooks.write().add_observer(observer);
    }

    pub fn metrics(&self) -> QueueSnapshot {
        self.ctx.metrics.snapshot()
    }

    pub fn status(&self) -> WorkerStatus {
        self.ctx.status.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.status().is_running()
    }

    /// 排队中（未开始执行）的任务数
    pub fn pending(&self) -> usize {
        self.sender.lock().as_ref().map_or(0, |s| s.len())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// 关闭队列：不再接受新命令，已排队的命令执行完后工作线程退出
    ///
    /// # 错误
    /// - `DriverError::Timeout`: 工作线程未在 `timeout` 内退出
    pub fn shutdown(&self, timeout: Duration) -> Result<(), DriverError> {
        drop(self.sender.lock().take());
        let worker = self.worker.lock().take();
        if let Some(handle) = worker {
            handle.join_timeout(timeout).map_err(|_| DriverError::Timeout)?;
            debug!("Command worker joined");
        }
        Ok(())
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        let timeout = self.config.shutdown_timeout();
        if let Err(e) = self.shutdown(timeout) {
            error!("Command worker did not exit within {:?}: {}", timeout, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CommandError, ExecutionLog, MemoryReporter};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn queue() -> (Arc<MemoryReporter>, CommandQueue) {
        let reporter = MemoryReporter::new();
        let queue = CommandQueue::new(reporter.clone()).unwrap();
        (reporter, queue)
    }

    #[test]
    fn test_submit_and_flush() {
        let (_reporter, queue) = queue();
        let counter = Arc::new(AtomicU32::new(0));
        for _ in 0..10 {
            let c = counter.clone();
            queue
                .submit(Command::new("incr", move || {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }))
                .unwrap();
        }
        queue.flush(Duration::from_secs(5)).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 10);

        let metrics = queue.metrics();
        assert_eq!(metrics.submitted, 10);
        assert_eq!(metrics.completed, 10);
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn test_flush_times_out_while_busy() {
        let (_reporter, queue) = queue();
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(1);
        queue
            .submit(Command::new("block", move || {
                let _ = release_rx.recv();
                Ok(())
            }))
            .unwrap();

        assert!(matches!(
            queue.flush(Duration::from_millis(20)),
            Err(DriverError::Timeout)
        ));
        release_tx.send(()).unwrap();
        queue.flush(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn test_error_is_reported_and_worker_continues() {
        let (reporter, queue) = queue();
        queue
            .submit(Command::new("centroid", || {
                Err(CommandError::user("No exposure found"))
            }))
            .unwrap();
        queue.submit(Command::new("open", || Ok(()))).unwrap();
        queue.flush(Duration::from_secs(5)).unwrap();

        assert!(reporter.contains("ERROR (centroid): No exposure found"));
        assert!(queue.is_running());
        assert_eq!(queue.metrics().completed, 1);
    }

    #[test]
    fn test_observer_sees_commands() {
        let (_reporter, queue) = queue();
        let log = ExecutionLog::new();
        queue.add_observer(log.clone());

        queue.submit(Command::new("close", || Ok(()))).unwrap();
        queue.submit(Command::new("open", || Ok(()))).unwrap();
        queue.flush(Duration::from_secs(5)).unwrap();

        assert_eq!(log.names(), vec!["close", "open"]);
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let (_reporter, queue) = queue();
        queue.shutdown(Duration::from_secs(5)).unwrap();
        assert!(matches!(
            queue.submit(Command::new("open", || Ok(()))),
            Err(DriverError::WorkerStopped)
        ));
        assert!(!queue.is_running());
    }

    #[test]
    fn test_shutdown_drains_queued_commands() {
        let (_reporter, queue) = queue();
        let counter = Arc::new(AtomicU32::new(0));
        for _ in 0..3 {
            let c = counter.clone();
            queue
                .submit(Command::new("incr", move || {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }))
                .unwrap();
        }
        queue.shutdown(Duration::from_secs(5)).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_cancel_flag_is_cleared_between_commands() {
        let (_reporter, queue) = queue();
        let token = queue.cancel_token();
        let seen = Arc::new(AtomicU32::new(0));

        let t = token.clone();
        queue
            .submit(Command::new("first", move || {
                t.cancel();
                Ok(())
            }))
            .unwrap();
        let t = token.clone();
        let s = seen.clone();
        queue
            .submit(Command::new("second", move || {
                if !t.is_cancelled() {
                    s.fetch_add(1, Ordering::SeqCst);
                }
                Ok(())
            }))
            .unwrap();
        queue.flush(Duration::from_secs(5)).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
