//! 曝光图像命名约定
//!
//! 所有曝光产物都在工作目录下，以 `RefractorImage_temp` 开头：
//!
//! | 文件 | 含义 |
//! |---|---|
//! | `RefractorImage_temp-G.fits` | 采集程序每次写出的单帧 |
//! | `RefractorImage_temp-frame-NNN.fits` | 多帧曝光时保存的第 N 帧 |
//! | `RefractorImage_temp-stacked.fits` | 多帧逐像素求和结果 |
//!
//! 新一轮曝光开始前清除上一轮的全部产物。

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// 曝光产物公共前缀
pub const CAPTURE_STEM: &str = "RefractorImage_temp";
/// 采集程序写出的单帧文件名
pub const SINGLE_IMAGE: &str = "RefractorImage_temp-G.fits";
/// 叠加结果文件名
pub const STACKED_IMAGE: &str = "RefractorImage_temp-stacked.fits";

const FRAME_PREFIX: &str = "RefractorImage_temp-frame-";
const FITS_SUFFIX: &str = ".fits";

/// 工作目录中的曝光图像
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageStore {
    dir: PathBuf,
}

impl ImageStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 采集程序的输出路径
    pub fn capture_output(&self) -> PathBuf {
        self.dir.join(SINGLE_IMAGE)
    }

    /// 叠加结果路径
    pub fn stacked_output(&self) -> PathBuf {
        self.dir.join(STACKED_IMAGE)
    }

    /// 第 `index` 帧（从 1 开始）的保存路径
    pub fn frame_path(&self, index: u32) -> PathBuf {
        self.dir.join(format!("{FRAME_PREFIX}{index:03}{FITS_SUFFIX}"))
    }

    /// 删除上一轮曝光的全部产物，返回删除的文件数
    pub fn clear(&self) -> io::Result<usize> {
        let mut removed = 0;
        for path in self.matching(CAPTURE_STEM, "")? {
            fs::remove_file(&path)?;
            removed += 1;
        }
        Ok(removed)
    }

    /// 把刚采集的单帧移到第 `index` 帧的位置，避免被下一次采集覆盖
    ///
    /// # 错误
    /// 采集程序没有写出 `RefractorImage_temp-G.fits` 时返回 `NotFound`。
    pub fn claim_frame(&self, index: u32) -> io::Result<PathBuf> {
        let source = self.capture_output();
        if !source.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} was not written", source.display()),
            ));
        }
        let target = self.frame_path(index);
        fs::rename(&source, &target)?;
        Ok(target)
    }

    /// 工作目录中最近一轮曝光的结果：叠加图优先，其次单帧
    pub fn latest(&self) -> Option<PathBuf> {
        [self.stacked_output(), self.capture_output()]
            .into_iter()
            .find(|path| path.is_file())
    }

    /// 已保存的帧（按序号排序）
    pub fn frames(&self) -> io::Result<Vec<PathBuf>> {
        self.matching(FRAME_PREFIX, FITS_SUFFIX)
    }

    /// 工作目录中文件名以 `prefix` 开头、以 `suffix` 结尾的文件，按文件名排序
    pub fn matching(&self, prefix: &str, suffix: &str) -> io::Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.starts_with(prefix) && name.ends_with(suffix) {
                paths.push(entry.path());
            }
        }
        paths.sort();
        Ok(paths)
    }
}
