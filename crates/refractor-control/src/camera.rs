//! 导星相机与图像叠加

use std::path::{Path, PathBuf};

use refractor_driver::{CancelToken, CommandError};
use tracing::debug;

use crate::process::{ToolCommand, run_cancellable};

/// 相机接口
///
/// 一次调用完成一次曝光，并在工作目录写出
/// `RefractorImage_temp-G.fits`。
pub trait Camera: Send + Sync {
    fn capture(
        &self,
        seconds: u32,
        working_dir: &Path,
        cancel: &CancelToken,
    ) -> Result<(), CommandError>;
}

/// 图像叠加接口：逐像素求和，写出到 `output`
pub trait ImageStacker: Send + Sync {
    fn stack(
        &self,
        frames: &[PathBuf],
        output: &Path,
        working_dir: &Path,
        cancel: &CancelToken,
    ) -> Result<(), CommandError>;
}

/// 调用外部采集程序：`<program> <args…> <seconds>`
#[derive(Debug, Clone)]
pub struct ProcessCamera {
    tool: ToolCommand,
}

impl ProcessCamera {
    pub fn new(tool: ToolCommand) -> Self {
        Self { tool }
    }
}

impl Camera for ProcessCamera {
    fn capture(
        &self,
        seconds: u32,
        working_dir: &Path,
        cancel: &CancelToken,
    ) -> Result<(), CommandError> {
        let mut cmd = self.tool.command_in(working_dir);
        cmd.arg(seconds.to_string());
        debug!("Capturing {} s exposure", seconds);
        run_cancellable("capture", cmd, cancel)
    }
}

/// 调用外部叠加程序：`<program> <args…> <output> <frames…>`
#[derive(Debug, Clone)]
pub struct ProcessStacker {
    tool: ToolCommand,
}

impl ProcessStacker {
    pub fn new(tool: ToolCommand) -> Self {
        Self { tool }
    }
}

impl ImageStacker for ProcessStacker {
    fn stack(
        &self,
        frames: &[PathBuf],
        output: &Path,
        working_dir: &Path,
        cancel: &CancelToken,
    ) -> Result<(), CommandError> {
        let mut cmd = self.tool.command_in(working_dir);
        cmd.arg(output).args(frames);
        run_cancellable("stack", cmd, cancel)?;

        if !output.is_file() {
            return Err(CommandError::external(
                "stack",
                format!("{} was not written", output.display()),
            ));
        }
        Ok(())
    }
}
