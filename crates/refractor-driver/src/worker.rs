//! 命令工作线程主循环
//!
//! 单消费者：从 channel 头部取出命令，同步执行，记录指标并通知钩子，
//! 然后取下一条。队列为空时阻塞。

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, warn};

use crate::{
    CancelToken, Command, CommandOutcome, ErrorKind, HookManager, QueueMetrics, SharedReporter,
    WorkerStatus,
};

/// 命令失败后的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum FaultPolicy {
    /// 报告所有错误和 panic，继续处理后续命令
    #[default]
    Continue,
    /// 硬件故障或 panic 时停止工作线程，其余错误照常报告
    StopOnFault,
}

/// 队列配置
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct QueueConfig {
    pub fault_policy: FaultPolicy,
    /// 关闭时等待工作线程退出的时间（毫秒）
    pub shutdown_timeout_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            fault_policy: FaultPolicy::default(),
            shutdown_timeout_ms: 2000,
        }
    }
}

impl QueueConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// channel 中传递的任务
pub(crate) enum Job {
    Run(Command),
    /// 屏障：执行到此处时通知等待方，不计入指标和钩子
    Barrier(Sender<()>),
}

/// 队列句柄与工作线程共享的上下文
pub(crate) struct WorkerContext {
    pub reporter: SharedReporter,
    pub hooks: Arc<RwLock<HookManager>>,
    pub metrics: Arc<QueueMetrics>,
    pub cancel: CancelToken,
    pub status: Mutex<WorkerStatus>,
}

pub(crate) fn worker_loop(jobs: Receiver<Job>, ctx: Arc<WorkerContext>, policy: FaultPolicy) {
    while let Ok(job) = jobs.recv() {
        let command = match job {
            Job::Run(command) => command,
            Job::Barrier(done) => {
                let _ = done.send(());
                continue;
            },
        };

        if let Some(reason) = run_command(command, &ctx, policy) {
            error!("Command worker stopped: {}", reason);
            ctx.reporter
                .report(&format!("FATAL: {reason}. No further commands will run."));
            *ctx.status.lock() = WorkerStatus::Stopped { reason };
            return;
        }
    }

    debug!("Command channel closed, worker exiting");
    *ctx.status.lock() = WorkerStatus::Stopped {
        reason: "queue shut down".to_string(),
    };
}

/// 执行一条命令；返回 `Some(reason)` 表示工作线程必须停止
fn run_command(command: Command, ctx: &WorkerContext, policy: FaultPolicy) -> Option<String> {
    let name = command.name().to_string();

    ctx.cancel.reset();
    QueueMetrics::incr(&ctx.metrics.started);
    ctx.hooks.read().notify_started(&name);
    debug!("Executing command: {}", name);

    let started = Instant::now();
    let result = panic::catch_unwind(AssertUnwindSafe(|| command.execute()));
    let elapsed = started.elapsed();

    let (outcome, fatal) = match result {
        Ok(Ok(())) => {
            QueueMetrics::incr(&ctx.metrics.completed);
            debug!("Command {} completed in {:?}", name, elapsed);
            (CommandOutcome::Completed, None)
        },
        Ok(Err(err)) => {
            let kind = err.kind();
            match kind {
                ErrorKind::Cancelled => {
                    QueueMetrics::incr(&ctx.metrics.cancelled);
                    warn!("Command {} cancelled", name);
                    ctx.reporter.report(&format!("{name} cancelled"));
                },
                ErrorKind::HardwareFault => {
                    QueueMetrics::incr(&ctx.metrics.failed);
                    error!("Command {} failed: {}", name, err);
                    ctx.reporter.report(&format!("ERROR ({name}): {err}"));
                },
                ErrorKind::ExternalToolFailure | ErrorKind::UserInputError => {
                    QueueMetrics::incr(&ctx.metrics.failed);
                    warn!("Command {} failed: {}", name, err);
                    ctx.reporter.report(&format!("ERROR ({name}): {err}"));
                },
            }
            let fatal = (policy == FaultPolicy::StopOnFault && kind == ErrorKind::HardwareFault)
                .then(|| format!("{name}: {err}"));
            (CommandOutcome::Failed(kind), fatal)
        },
        Err(payload) => {
            QueueMetrics::incr(&ctx.metrics.panicked);
            let message = panic_message(payload.as_ref());
            error!("Command {} panicked: {}", name, message);
            ctx.reporter
                .report(&format!("ERROR ({name}): internal error: {message}"));
            let fatal = (policy == FaultPolicy::StopOnFault)
                .then(|| format!("{name} panicked: {message}"));
            (CommandOutcome::Panicked, fatal)
        },
    };

    ctx.hooks.read().notify_finished(&name, outcome, elapsed);
    fatal
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
