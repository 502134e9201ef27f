//! 配置文件（TOML）
//!
//! 所有字段都有默认值，缺失的段落使用默认配置。
//!
//! ```toml
//! [gpio]
//! backend = "sysfs"
//!
//! [motor]
//! step_delay_us = 100
//! max_homing_steps = 21600   # 0 表示不设上限
//!
//! [queue]
//! fault_policy = "stop_on_fault"
//!
//! [paths]
//! working_dir = "/home/observer/refractor"
//!
//! [offset_link]
//! program = "ssh"
//! args = ["guider@claudius", "guide_offset"]
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use refractor_driver::{MotorConfig, QueueConfig, SwitchConfig};
use refractor_tools::GuideConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::process::ToolCommand;
use crate::viewer::ViewerConfig;

/// 多帧求和脚本（astropy），参数：`<output> <frames…>`
const STACK_SCRIPT: &str = "import sys; import numpy as np; from astropy.io import fits; \
fits.PrimaryHDU(np.sum([fits.getdata(p) for p in sys.argv[2:]], axis=0))\
.writeto(sys.argv[1], overwrite=True)";

/// 质心脚本，参数：`<image> <regions>`，输出 `x y`
const CENTROID_SCRIPT: &str = "import sys; from Centroid_DS9 import imexcentroid; \
x, y = imexcentroid(sys.argv[1], sys.argv[2]); print(x, y)";

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// 数字 IO 后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Linux sysfs GPIO
    #[default]
    Sysfs,
    /// 模拟后端（无硬件）
    Mock,
}

/// `[gpio]` 段
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpioConfig {
    pub backend: Backend,
    /// sysfs 根目录
    pub sysfs_base: PathBuf,
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            sysfs_base: PathBuf::from("/sys/class/gpio"),
        }
    }
}

/// `[paths]` 段
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    /// 曝光产物所在的工作目录
    pub working_dir: PathBuf,
    /// 查看器区域文件（相对路径基于工作目录）
    pub region_file: PathBuf,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from("."),
            region_file: PathBuf::from("refractor.reg"),
        }
    }
}

impl PathConfig {
    /// 区域文件的实际路径
    pub fn region_path(&self) -> PathBuf {
        if self.region_file.is_absolute() {
            self.region_file.clone()
        } else {
            self.working_dir.join(&self.region_file)
        }
    }
}

/// 完整配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefractorConfig {
    pub gpio: GpioConfig,
    pub motor: MotorConfig,
    pub switch: SwitchConfig,
    pub queue: QueueConfig,
    pub paths: PathConfig,
    pub guide: GuideConfig,
    /// 采集程序：`<program> <args…> <seconds>`
    pub capture: ToolCommand,
    /// 叠加程序：`<program> <args…> <output> <frames…>`
    pub stack: ToolCommand,
    /// 质心程序：`<program> <args…> <image> <regions>`
    pub centroid: ToolCommand,
    pub viewer: ViewerConfig,
    /// 导星偏移发送程序（可选）：`<program> <args…> <offset>`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset_link: Option<ToolCommand>,
}

impl Default for RefractorConfig {
    fn default() -> Self {
        Self {
            gpio: GpioConfig::default(),
            motor: MotorConfig::default(),
            switch: SwitchConfig::default(),
            queue: QueueConfig::default(),
            paths: PathConfig::default(),
            guide: GuideConfig::default(),
            capture: ToolCommand::new("python3.7", ["refractor_camera.py"]),
            stack: ToolCommand::new("python3", ["-c", STACK_SCRIPT]),
            centroid: ToolCommand::new("python3", ["-c", CENTROID_SCRIPT]),
            viewer: ViewerConfig::default(),
            offset_link: None,
        }
    }
}

impl RefractorConfig {
    /// 从 TOML 文本解析
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// 读取配置文件
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// 读取配置文件；文件不存在时返回默认配置
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// 写入配置文件（自动创建父目录）
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(path, self.to_toml_string()?).map_err(io_err)
    }
}
