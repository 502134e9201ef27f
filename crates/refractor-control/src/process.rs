//! 外部程序调用
//!
//! 所有协作者（相机、叠加、查看器、质心、偏移链路）都通过
//! "程序 + 固定参数 + 动态参数"的方式调用外部命令。

use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use refractor_driver::{CancelToken, CommandError, DriverError};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// 等待子进程时检查取消标志的间隔
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// 外部命令配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// 构造 `std::process::Command`（含固定参数，stdin 置空）
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).stdin(Stdio::null());
        cmd
    }

    /// 同上，并设置工作目录
    pub fn command_in(&self, dir: &Path) -> Command {
        let mut cmd = self.command();
        cmd.current_dir(dir);
        cmd
    }
}

/// 运行命令直到退出；取消时杀掉子进程
///
/// stdout 丢弃，stderr 的最后一行作为失败详情。
///
/// # 错误
/// - `CommandError::ExternalToolFailure`: 无法启动或非零退出
/// - `CommandError::HardwareFault(DriverError::Cancelled)`: 被取消
pub fn run_cancellable(
    tool: &str,
    mut cmd: Command,
    cancel: &CancelToken,
) -> Result<(), CommandError> {
    cmd.stdout(Stdio::null()).stderr(Stdio::piped());
    debug!("Running {}: {:?}", tool, cmd);

    let mut child = cmd
        .spawn()
        .map_err(|e| CommandError::external(tool, format!("failed to start: {e}")))?;

    let stderr = child.stderr.take();
    let reader = thread::spawn(move || {
        let mut text = String::new();
        if let Some(mut pipe) = stderr {
            let _ = pipe.read_to_string(&mut text);
        }
        text
    });

    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if cancel.is_cancelled() {
                    if let Err(e) = child.kill() {
                        warn!("Failed to kill {}: {}", tool, e);
                    }
                    let _ = child.wait();
                    return Err(DriverError::Cancelled.into());
                }
                thread::sleep(POLL_INTERVAL);
            },
            Err(e) => return Err(CommandError::external(tool, format!("wait failed: {e}"))),
        }
    };

    let stderr = reader.join().unwrap_or_default();
    if status.success() {
        Ok(())
    } else {
        Err(CommandError::external(
            tool,
            failure_detail(&status.to_string(), &stderr),
        ))
    }
}

/// 运行命令并返回 stdout
pub fn run_output(tool: &str, mut cmd: Command) -> Result<String, CommandError> {
    debug!("Running {}: {:?}", tool, cmd);
    let output = cmd
        .output()
        .map_err(|e| CommandError::external(tool, format!("failed to start: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CommandError::external(
            tool,
            failure_detail(&output.status.to_string(), &stderr),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn failure_detail(status: &str, stderr: &str) -> String {
    match stderr.lines().rev().find(|line| !line.trim().is_empty()) {
        Some(line) => format!("{status}: {}", line.trim()),
        None => status.to_string(),
    }
}
