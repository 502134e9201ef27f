//! 图像查看器（XPA / DS9）

use std::path::Path;
use std::process::{Child, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use refractor_driver::CommandError;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::process::{ToolCommand, run_output};

const TOOL: &str = "viewer";
const STARTUP_POLL: Duration = Duration::from_millis(250);

/// 查看器接口
pub trait Viewer: Send + Sync {
    /// 确保查看器在运行，必要时启动
    fn ensure_running(&self) -> Result<(), CommandError>;

    /// 载入图像，缩放到窗口并使用 zscale 拉伸
    fn display(&self, image: &Path) -> Result<(), CommandError>;

    /// 在 (x, y) 处标记一个点区域
    fn mark_point(&self, x: f64, y: f64) -> Result<(), CommandError>;

    /// 把当前区域保存到文件
    fn save_regions(&self, path: &Path) -> Result<(), CommandError>;
}

/// XPA 查看器配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// XPA 目标名
    pub target: String,
    /// 启动后等待 XPA 可达的时间（毫秒）
    pub startup_timeout_ms: u64,
    /// `xpaset` 命令
    pub xpaset: ToolCommand,
    /// `xpaaccess` 命令
    pub xpaaccess: ToolCommand,
    /// 查看器未运行时的启动命令
    pub launch: ToolCommand,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            target: "ds9".to_string(),
            startup_timeout_ms: 15_000,
            xpaset: ToolCommand::new("xpaset", Vec::<String>::new()),
            xpaaccess: ToolCommand::new("xpaaccess", Vec::<String>::new()),
            launch: ToolCommand::new("ds9", Vec::<String>::new()),
        }
    }
}

/// 通过 XPA 命令行工具控制的查看器
#[derive(Debug)]
pub struct XpaViewer {
    config: ViewerConfig,
    launched: Mutex<Option<Child>>,
}

impl XpaViewer {
    pub fn new(config: ViewerConfig) -> Self {
        Self {
            config,
            launched: Mutex::new(None),
        }
    }

    /// `xpaaccess <target>` 输出 `yes` 表示可达
    pub fn is_running(&self) -> bool {
        let mut cmd = self.config.xpaaccess.command();
        cmd.arg(&self.config.target).stderr(Stdio::null());
        match run_output(TOOL, cmd) {
            Ok(stdout) => stdout.trim() == "yes",
            Err(e) => {
                debug!("Viewer access check failed: {}", e);
                false
            },
        }
    }

    fn xpaset(&self, args: &[&str]) -> Result<(), CommandError> {
        let mut cmd = self.config.xpaset.command();
        cmd.arg("-p").arg(&self.config.target).args(args);
        run_output(TOOL, cmd).map(|_| ())
    }

    fn launch(&self) -> Result<(), CommandError> {
        let mut launched = self.launched.lock();
        // 回收上一次启动后已退出的进程
        if let Some(child) = launched.as_mut()
            && !matches!(child.try_wait(), Ok(None))
        {
            *launched = None;
        }
        if launched.is_some() {
            return Ok(());
        }

        let child = self
            .config
            .launch
            .command()
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                let program = &self.config.launch.program;
                CommandError::external(TOOL, format!("failed to launch {program}: {e}"))
            })?;
        info!("Launched viewer (pid {})", child.id());
        *launched = Some(child);
        Ok(())
    }
}

fn path_arg(path: &Path) -> Result<&str, CommandError> {
    path.to_str()
        .ok_or_else(|| CommandError::user(format!("path is not valid UTF-8: {}", path.display())))
}

impl Viewer for XpaViewer {
    fn ensure_running(&self) -> Result<(), CommandError> {
        if self.is_running() {
            return Ok(());
        }

        self.launch()?;
        let deadline = Instant::now() + Duration::from_millis(self.config.startup_timeout_ms);
        while Instant::now() < deadline {
            if self.is_running() {
                return Ok(());
            }
            thread::sleep(STARTUP_POLL);
        }

        warn!("Viewer {} not reachable over XPA", self.config.target);
        Err(CommandError::external(
            TOOL,
            format!(
                "{} not reachable after {} ms",
                self.config.target, self.config.startup_timeout_ms
            ),
        ))
    }

    fn display(&self, image: &Path) -> Result<(), CommandError> {
        self.xpaset(&["fits", path_arg(image)?])?;
        self.xpaset(&["zoom", "to", "fit"])?;
        self.xpaset(&["zscale"])
    }

    fn mark_point(&self, x: f64, y: f64) -> Result<(), CommandError> {
        let region = format!("{{point {x} {y} # point=x 20 color=red}}");
        self.xpaset(&["regions", "command", &region])
    }

    fn save_regions(&self, path: &Path) -> Result<(), CommandError> {
        self.xpaset(&["regions", "save", path_arg(path)?])
    }
}
