//! 质心测量与导星偏移链路

use std::path::Path;

use refractor_driver::CommandError;
use refractor_tools::GuideOffset;
use tracing::debug;

use crate::process::{ToolCommand, run_output};

/// 质心测量接口：返回区域内星像的像素坐标 (x, y)
pub trait CentroidSolver: Send + Sync {
    fn centroid(&self, image: &Path, regions: &Path) -> Result<(f64, f64), CommandError>;
}

/// 导星偏移发送接口
///
/// 认证（如 ssh 密钥）由实现自行负责，这里不保存任何凭据。
pub trait OffsetLink: Send + Sync {
    fn send(&self, offset: &GuideOffset) -> Result<(), CommandError>;
}

/// 调用外部质心程序：`<program> <args…> <image> <regions>`，
/// stdout 最后一行为 `x y`
#[derive(Debug, Clone)]
pub struct ProcessCentroid {
    tool: ToolCommand,
}

impl ProcessCentroid {
    pub fn new(tool: ToolCommand) -> Self {
        Self { tool }
    }
}

impl CentroidSolver for ProcessCentroid {
    fn centroid(&self, image: &Path, regions: &Path) -> Result<(f64, f64), CommandError> {
        if !image.is_file() {
            return Err(CommandError::user(format!(
                "No exposure found at {}; take an exposure with the guide camera first",
                image.display()
            )));
        }
        if !regions.is_file() {
            return Err(CommandError::user(format!(
                "No region file at {}; draw a box region around a star in the viewer",
                regions.display()
            )));
        }

        let mut cmd = self.tool.command();
        cmd.arg(image).arg(regions);
        let stdout = run_output("centroid", cmd)?;
        debug!("Centroid output: {:?}", stdout.trim());

        parse_centroid(&stdout).ok_or_else(|| {
            CommandError::user("No star region found; draw a box region around a star in the viewer")
        })
    }
}

/// 解析质心输出的最后一个非空行
///
/// 接受 `x y`、`x, y` 与 `(x, y)` 三种写法。
pub fn parse_centroid(output: &str) -> Option<(f64, f64)> {
    let line = output.lines().rev().find(|l| !l.trim().is_empty())?;
    let mut values = line
        .split(|c: char| c.is_whitespace() || c == ',' || c == '(' || c == ')')
        .filter(|token| !token.is_empty())
        .map(str::parse::<f64>);

    let x = values.next()?.ok()?;
    let y = values.next()?.ok()?;
    if values.next().is_some() || !x.is_finite() || !y.is_finite() {
        return None;
    }
    Some((x, y))
}

/// 调用外部程序发送偏移：`<program> <args…> <offset>`
#[derive(Debug, Clone)]
pub struct ProcessOffsetLink {
    tool: ToolCommand,
}

impl ProcessOffsetLink {
    pub fn new(tool: ToolCommand) -> Self {
        Self { tool }
    }
}

impl OffsetLink for ProcessOffsetLink {
    fn send(&self, offset: &GuideOffset) -> Result<(), CommandError> {
        let mut cmd = self.tool.command();
        cmd.arg(offset.command());
        run_output("offset link", cmd).map(|_| ())
    }
}
