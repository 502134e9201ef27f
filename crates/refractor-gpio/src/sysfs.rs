//! Linux sysfs GPIO 后端
//!
//! 通过 `/sys/class/gpio` 导出线、设置方向并读写 `value` 文件。
//! sysfs 接口不支持配置内部上下拉，`Pull` 只会记录警告，
//! 需要在硬件上提供外部电阻或在系统启动时配置（如 `raspi-gpio`）。

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use embedded_hal::digital::{ErrorType, InputPin, OutputPin};
use tracing::{debug, trace, warn};

use crate::{ClaimGuard, ClaimSet, DigitalIo, GpioError, Level, Pull};

/// 默认 sysfs 根目录
pub const DEFAULT_SYSFS_BASE: &str = "/sys/class/gpio";

/// 导出后等待 `gpioN/` 出现的上限（udev 需要时间调整权限）
const EXPORT_TIMEOUT: Duration = Duration::from_millis(1000);
const EXPORT_POLL: Duration = Duration::from_millis(10);

/// sysfs GPIO 后端
#[derive(Debug, Clone)]
pub struct SysfsGpio {
    base: PathBuf,
    claims: ClaimSet,
}

impl Default for SysfsGpio {
    fn default() -> Self {
        Self::new()
    }
}

impl SysfsGpio {
    /// 使用默认根目录 `/sys/class/gpio`
    pub fn new() -> Self {
        Self::with_base(DEFAULT_SYSFS_BASE)
    }

    /// 使用自定义根目录（测试或非标准挂载点）
    pub fn with_base(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            claims: ClaimSet::default(),
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    fn line_dir(&self, line: u32) -> PathBuf {
        self.base.join(format!("gpio{line}"))
    }

    /// 导出线并等待其目录就绪
    fn export(&self, line: u32) -> Result<PathBuf, GpioError> {
        let dir = self.line_dir(line);
        if dir.join("value").exists() {
            trace!("Line {} already exported", line);
            return Ok(dir);
        }

        fs::write(self.base.join("export"), line.to_string())
            .map_err(|e| GpioError::io(line, e))?;

        let deadline = Instant::now() + EXPORT_TIMEOUT;
        while !dir.join("value").exists() {
            if Instant::now() >= deadline {
                return Err(GpioError::io(
                    line,
                    std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("{} did not appear after export", dir.display()),
                    ),
                ));
            }
            thread::sleep(EXPORT_POLL);
        }
        debug!("Exported GPIO line {}", line);
        Ok(dir)
    }
}

/// 释放线时取消导出（尽力而为）
fn unexport(base: &Path, line: u32) {
    if let Err(e) = fs::write(base.join("unexport"), line.to_string()) {
        debug!("Failed to unexport GPIO line {}: {}", line, e);
    }
}

impl DigitalIo for SysfsGpio {
    type Output = SysfsOutput;
    type Input = SysfsInput;

    fn output(&mut self, line: u32, initial: Level) -> Result<SysfsOutput, GpioError> {
        let claim = self.claims.claim(line)?;
        let dir = self.export(line)?;

        // "high"/"low" 在设置方向的同时给定初始电平，避免输出毛刺
        let direction = match initial {
            Level::High => "high",
            Level::Low => "low",
        };
        fs::write(dir.join("direction"), direction).map_err(|e| GpioError::io(line, e))?;

        let value = OpenOptions::new()
            .read(true)
            .write(true)
            .open(dir.join("value"))
            .map_err(|e| GpioError::io(line, e))?;

        Ok(SysfsOutput {
            line,
            value,
            base: self.base.clone(),
            _claim: claim,
        })
    }

    fn input(&mut self, line: u32, pull: Pull) -> Result<SysfsInput, GpioError> {
        let claim = self.claims.claim(line)?;
        let dir = self.export(line)?;

        if pull != Pull::None {
            warn!(
                "sysfs cannot configure pull {:?} on line {}; relying on external bias",
                pull, line
            );
        }
        fs::write(dir.join("direction"), "in").map_err(|e| GpioError::io(line, e))?;

        let value = File::open(dir.join("value")).map_err(|e| GpioError::io(line, e))?;

        Ok(SysfsInput {
            line,
            value,
            base: self.base.clone(),
            _claim: claim,
        })
    }
}

/// sysfs 输出线
#[derive(Debug)]
pub struct SysfsOutput {
    line: u32,
    value: File,
    base: PathBuf,
    _claim: ClaimGuard,
}

impl SysfsOutput {
    pub fn line(&self) -> u32 {
        self.line
    }

    fn drive(&mut self, level: Level) -> Result<(), GpioError> {
        let byte: &[u8] = match level {
            Level::High => b"1",
            Level::Low => b"0",
        };
        self.value
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.value.write_all(byte))
            .map_err(|e| GpioError::io(self.line, e))
    }
}

impl ErrorType for SysfsOutput {
    type Error = GpioError;
}

impl OutputPin for SysfsOutput {
    fn set_low(&mut self) -> Result<(), GpioError> {
        self.drive(Level::Low)
    }

    fn set_high(&mut self) -> Result<(), GpioError> {
        self.drive(Level::High)
    }
}

impl Drop for SysfsOutput {
    fn drop(&mut self) {
        unexport(&self.base, self.line);
    }
}

/// sysfs 输入线
#[derive(Debug)]
pub struct SysfsInput {
    line: u32,
    value: File,
    base: PathBuf,
    _claim: ClaimGuard,
}

impl SysfsInput {
    pub fn line(&self) -> u32 {
        self.line
    }

    /// 读取 `value` 文件
    pub fn level(&mut self) -> Result<Level, GpioError> {
        let mut raw = String::with_capacity(2);
        self.value
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.value.read_to_string(&mut raw))
            .map_err(|e| GpioError::io(self.line, e))?;

        match raw.trim() {
            "1" => Ok(Level::High),
            "0" => Ok(Level::Low),
            other => Err(GpioError::InvalidValue {
                line: self.line,
                value: other.to_string(),
            }),
        }
    }
}

impl ErrorType for SysfsInput {
    type Error = GpioError;
}

impl InputPin for SysfsInput {
    fn is_high(&mut self) -> Result<bool, GpioError> {
        Ok(self.level()?.is_high())
    }

    fn is_low(&mut self) -> Result<bool, GpioError> {
        Ok(self.level()?.is_low())
    }
}

impl Drop for SysfsInput {
    fn drop(&mut self) {
        unexport(&self.base, self.line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// 伪造一个已导出线的 sysfs 目录
    fn fake_sysfs(lines: &[u32]) -> TempDir {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("export"), "").unwrap();
        fs::write(root.path().join("unexport"), "").unwrap();
        for line in lines {
            let dir = root.path().join(format!("gpio{line}"));
            fs::create_dir(&dir).unwrap();
            fs::write(dir.join("direction"), "in").unwrap();
            fs::write(dir.join("value"), "0\n").unwrap();
        }
        root
    }

    #[test]
    fn test_output_sets_direction_and_value() {
        let root = fake_sysfs(&[17]);
        let mut gpio = SysfsGpio::with_base(root.path());

        let mut out = gpio.output(17, Level::High).unwrap();
        let dir = root.path().join("gpio17");
        assert_eq!(fs::read_to_string(dir.join("direction")).unwrap(), "high");

        out.set_high().unwrap();
        assert!(fs::read_to_string(dir.join("value")).unwrap().starts_with('1'));
        out.set_low().unwrap();
        assert!(fs::read_to_string(dir.join("value")).unwrap().starts_with('0'));
    }

    #[test]
    fn test_input_reads_value() {
        let root = fake_sysfs(&[19]);
        let mut gpio = SysfsGpio::with_base(root.path());
        let mut input = gpio.input(19, Pull::None).unwrap();
        let value = root.path().join("gpio19").join("value");

        assert!(input.is_low().unwrap());
        fs::write(&value, "1\n").unwrap();
        assert_eq!(input.level().unwrap(), Level::High);
        fs::write(&value, "x\n").unwrap();
        assert!(matches!(
            input.is_high(),
            Err(GpioError::InvalidValue { line: 19, .. })
        ));
    }

    #[test]
    fn test_drop_unexports_line() {
        let root = fake_sysfs(&[22]);
        let mut gpio = SysfsGpio::with_base(root.path());
        let out = gpio.output(22, Level::High).unwrap();
        drop(out);
        assert_eq!(
            fs::read_to_string(root.path().join("unexport")).unwrap(),
            "22"
        );
    }

    #[test]
    fn test_double_claim_is_busy() {
        let root = fake_sysfs(&[20]);
        let mut gpio = SysfsGpio::with_base(root.path());
        let _out = gpio.output(20, Level::Low).unwrap();
        assert!(matches!(
            gpio.output(20, Level::Low),
            Err(GpioError::LineBusy(20))
        ));
    }

    #[test]
    fn test_missing_base_is_io_error() {
        let root = tempfile::tempdir().unwrap();
        let mut gpio = SysfsGpio::with_base(root.path().join("absent"));
        assert!(matches!(
            gpio.output(17, Level::High),
            Err(GpioError::Io { line: 17, .. })
        ));
    }
}
