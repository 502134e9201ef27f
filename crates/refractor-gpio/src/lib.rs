//! # Refractor GPIO Layer
//!
//! 数字 IO 抽象层：按线号（BCM 编号）寻址的输出线与输入线。
//!
//! - [`DigitalIo`]：后端 trait，负责占用（claim）线并交出独占句柄
//! - 句柄实现 `embedded-hal` 的 [`OutputPin`] / [`InputPin`]，驱动层只依赖这两个 trait
//! - [`SysfsGpio`]：Linux sysfs 后端（仅 Linux）
//! - [`MockGpio`]：无硬件模拟后端，记录电平历史，可注入故障
//!
//! 同一条线在同一后端内只能被占用一次，句柄 Drop 时释放。

use std::collections::HashSet;
use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;

use embedded_hal::digital::{self, ErrorType};
use parking_lot::Mutex;
use thiserror::Error;

pub mod mock;
#[cfg(target_os = "linux")]
pub mod sysfs;

pub use embedded_hal::digital::{InputPin, OutputPin, PinState};
pub use mock::{InputRule, LevelChange, MockGpio, MockInput, MockOutput};
#[cfg(target_os = "linux")]
pub use sysfs::{SysfsGpio, SysfsInput, SysfsOutput};

/// 数字 IO 错误
#[derive(Error, Debug)]
pub enum GpioError {
    /// 底层 IO 错误（sysfs 读写失败等）
    #[error("IO error on line {line}: {source}")]
    Io {
        line: u32,
        #[source]
        source: std::io::Error,
    },

    /// 线已被占用
    #[error("Line {0} is already claimed")]
    LineBusy(u32),

    /// 从线读到无法识别的值
    #[error("Unexpected value {value:?} read from line {line}")]
    InvalidValue { line: u32, value: String },

    /// 模拟后端注入的故障
    #[error("Injected fault on line {0}")]
    Injected(u32),

    /// 当前平台不支持该后端
    #[error("GPIO backend not supported on this platform: {0}")]
    Unsupported(&'static str),
}

impl GpioError {
    pub(crate) fn io(line: u32, source: std::io::Error) -> Self {
        GpioError::Io { line, source }
    }
}

impl digital::Error for GpioError {
    fn kind(&self) -> digital::ErrorKind {
        digital::ErrorKind::Other
    }
}

/// 不会失败的 HAL 引脚（错误类型为 `Infallible`）可直接接入驱动层
impl From<Infallible> for GpioError {
    fn from(never: Infallible) -> Self {
        match never {}
    }
}

/// 数字电平
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn is_high(self) -> bool {
        self == Level::High
    }

    pub fn is_low(self) -> bool {
        self == Level::Low
    }
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high { Level::High } else { Level::Low }
    }
}

impl From<Level> for PinState {
    fn from(level: Level) -> Self {
        match level {
            Level::Low => PinState::Low,
            Level::High => PinState::High,
        }
    }
}

impl From<PinState> for Level {
    fn from(state: PinState) -> Self {
        match state {
            PinState::Low => Level::Low,
            PinState::High => Level::High,
        }
    }
}

impl std::ops::Not for Level {
    type Output = Level;

    fn not(self) -> Level {
        match self {
            Level::Low => Level::High,
            Level::High => Level::Low,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Low => f.write_str("low"),
            Level::High => f.write_str("high"),
        }
    }
}

/// 输入线的内部上下拉配置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Pull {
    #[default]
    None,
    Up,
    Down,
}

impl Pull {
    /// 悬空时的默认电平
    pub fn idle_level(self) -> Level {
        match self {
            Pull::Up => Level::High,
            Pull::None | Pull::Down => Level::Low,
        }
    }
}

/// 类型擦除的输出引脚
pub struct DynOutput(Box<dyn OutputPin<Error = GpioError> + Send>);

impl DynOutput {
    pub fn new(pin: impl OutputPin<Error = GpioError> + Send + 'static) -> Self {
        Self(Box::new(pin))
    }
}

impl ErrorType for DynOutput {
    type Error = GpioError;
}

impl OutputPin for DynOutput {
    fn set_low(&mut self) -> Result<(), GpioError> {
        self.0.set_low()
    }

    fn set_high(&mut self) -> Result<(), GpioError> {
        self.0.set_high()
    }
}

/// 类型擦除的输入引脚
pub struct DynInput(Box<dyn InputPin<Error = GpioError> + Send>);

impl DynInput {
    pub fn new(pin: impl InputPin<Error = GpioError> + Send + 'static) -> Self {
        Self(Box::new(pin))
    }
}

impl ErrorType for DynInput {
    type Error = GpioError;
}

impl InputPin for DynInput {
    fn is_high(&mut self) -> Result<bool, GpioError> {
        self.0.is_high()
    }

    fn is_low(&mut self) -> Result<bool, GpioError> {
        self.0.is_low()
    }
}

/// 数字 IO 后端
///
/// 后端负责占用线，交出实现 embedded-hal [`OutputPin`] / [`InputPin`] 的
/// 独占句柄；需要擦除类型时使用 [`DigitalIo::boxed`]。
pub trait DigitalIo {
    type Output: OutputPin<Error = GpioError> + Send + 'static;
    type Input: InputPin<Error = GpioError> + Send + 'static;

    /// 占用一条输出线，并立即驱动到 `initial` 电平
    ///
    /// # 错误
    /// - `GpioError::LineBusy`: 该线已被占用
    fn output(&mut self, line: u32, initial: Level) -> Result<Self::Output, GpioError>;

    /// 占用一条输入线
    fn input(&mut self, line: u32, pull: Pull) -> Result<Self::Input, GpioError>;

    /// 返回交出 [`DynOutput`] / [`DynInput`] 句柄的视图
    fn boxed(&mut self) -> BoxedIo<'_, Self>
    where
        Self: Sized,
    {
        BoxedIo(self)
    }
}

/// 类型擦除的后端视图，见 [`DigitalIo::boxed`]
pub struct BoxedIo<'a, D>(&'a mut D);

impl<D: DigitalIo> DigitalIo for BoxedIo<'_, D> {
    type Output = DynOutput;
    type Input = DynInput;

    fn output(&mut self, line: u32, initial: Level) -> Result<Self::Output, GpioError> {
        Ok(DynOutput::new(self.0.output(line, initial)?))
    }

    fn input(&mut self, line: u32, pull: Pull) -> Result<Self::Input, GpioError> {
        Ok(DynInput::new(self.0.input(line, pull)?))
    }
}

/// 后端内共享的占用表
#[derive(Debug, Clone, Default)]
pub(crate) struct ClaimSet {
    lines: Arc<Mutex<HashSet<u32>>>,
}

impl ClaimSet {
    pub(crate) fn claim(&self, line: u32) -> Result<ClaimGuard, GpioError> {
        if !self.lines.lock().insert(line) {
            return Err(GpioError::LineBusy(line));
        }
        Ok(ClaimGuard {
            line,
            lines: self.lines.clone(),
        })
    }

    pub(crate) fn contains(&self, line: u32) -> bool {
        self.lines.lock().contains(&line)
    }
}

/// 占用凭证，Drop 时释放线
#[derive(Debug)]
pub(crate) struct ClaimGuard {
    line: u32,
    lines: Arc<Mutex<HashSet<u32>>>,
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        self.lines.lock().remove(&self.line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_conversions() {
        assert_eq!(Level::from(true), Level::High);
        assert_eq!(Level::from(false), Level::Low);
        assert_eq!(!Level::High, Level::Low);
        assert_eq!(!Level::Low, Level::High);
        assert!(Level::High.is_high());
        assert!(Level::Low.is_low());
        assert_eq!(Level::High.to_string(), "high");
    }

    #[test]
    fn test_pull_idle_level() {
        assert_eq!(Pull::Down.idle_level(), Level::Low);
        assert_eq!(Pull::Up.idle_level(), Level::High);
        assert_eq!(Pull::default(), Pull::None);
    }

    #[test]
    fn test_claim_set_rejects_double_claim() {
        let claims = ClaimSet::default();
        let guard = claims.claim(17).unwrap();
        assert!(matches!(claims.claim(17), Err(GpioError::LineBusy(17))));
        assert!(claims.contains(17));

        drop(guard);
        assert!(!claims.contains(17));
        assert!(claims.claim(17).is_ok());
    }

    #[test]
    fn test_pin_state_conversions() {
        assert_eq!(PinState::from(Level::High), PinState::High);
        assert_eq!(Level::from(PinState::Low), Level::Low);
        assert_eq!(Level::from(PinState::from(Level::Low)), Level::Low);
    }

    #[test]
    fn test_gpio_error_is_a_hal_error() {
        use embedded_hal::digital::Error;
        assert_eq!(
            GpioError::Injected(17).kind(),
            embedded_hal::digital::ErrorKind::Other
        );
    }

    #[test]
    fn test_boxed_view_hands_out_hal_pins() {
        let mut gpio = MockGpio::new();
        let mut out: DynOutput = gpio.boxed().output(22, Level::High).unwrap();
        let mut input: DynInput = gpio.boxed().input(19, Pull::Down).unwrap();

        out.set_low().unwrap();
        assert_eq!(gpio.level(22), Some(Level::Low));
        out.set_state(PinState::High).unwrap();
        assert_eq!(gpio.level(22), Some(Level::High));
        assert!(input.is_low().unwrap());
        assert!(!input.is_high().unwrap());
    }
}
