//! 限位开关（回零开关）
//!
//! 开关检测回路由一条输出线供电，另一条带下拉的输入线读取开关状态。
//! 检测回路只在读数窗口内通电，窗口结束立即断电。
//!
//! 到位（home）时输入读数为低电平。读数不做消抖。

use std::thread;
use std::time::Duration;

use embedded_hal::digital::{InputPin, OutputPin};
use refractor_gpio::{DigitalIo, GpioError, Level, Pull};
use tracing::{error, trace};

use crate::{DriverError, SwitchState};

/// 默认检测回路供电线（BCM）
pub const SWITCH_SENSE_LINE: u32 = 20;
/// 默认开关输入线（BCM）
pub const SWITCH_INPUT_LINE: u32 = 19;
/// 通电后到读数前的稳定时间
pub const SWITCH_SETTLE_MS: u64 = 50;

/// 限位开关配置
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct SwitchConfig {
    /// 检测回路供电输出线
    pub sense_line: u32,
    /// 开关读数输入线（下拉）
    pub input_line: u32,
    /// 通电稳定时间（毫秒）
    pub settle_ms: u64,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            sense_line: SWITCH_SENSE_LINE,
            input_line: SWITCH_INPUT_LINE,
            settle_ms: SWITCH_SETTLE_MS,
        }
    }
}

impl SwitchConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

/// 限位开关
///
/// 检测回路与输入可以是任意 embedded-hal 引脚，错误需能转换为 [`GpioError`]。
pub struct LimitSwitch<O, I>
where
    O: OutputPin,
    O::Error: Into<GpioError>,
    I: InputPin,
    I::Error: Into<GpioError>,
{
    sense: O,
    input: I,
    settle: Duration,
    state: SwitchState,
}

impl<O, I> LimitSwitch<O, I>
where
    O: OutputPin,
    O::Error: Into<GpioError>,
    I: InputPin,
    I::Error: Into<GpioError>,
{
    /// 使用已占用的线创建开关，并立即断开检测回路
    pub fn new(sense: O, input: I, settle: Duration) -> Result<Self, DriverError> {
        let mut switch = Self {
            sense,
            input,
            settle,
            state: SwitchState::default(),
        };
        switch.deenergize()?;
        Ok(switch)
    }

    /// 从后端占用配置中的线
    pub fn from_io<D>(io: &mut D, config: &SwitchConfig) -> Result<Self, DriverError>
    where
        D: DigitalIo<Output = O, Input = I>,
    {
        let sense = io.output(config.sense_line, Level::Low)?;
        let input = io.input(config.input_line, Pull::Down)?;
        Self::new(sense, input, config.settle())
    }

    pub fn settle(&self) -> Duration {
        self.settle
    }

    pub fn state(&self) -> SwitchState {
        self.state
    }

    /// 检测回路通电
    pub fn energize(&mut self) -> Result<(), DriverError> {
        self.sense.set_high().map_err(DriverError::pin)?;
        self.state.sensing_energized = true;
        trace!("Switch sensing energized");
        Ok(())
    }

    /// 检测回路断电
    pub fn deenergize(&mut self) -> Result<(), DriverError> {
        self.sense.set_low().map_err(DriverError::pin)?;
        self.state = SwitchState::default();
        trace!("Switch sensing de-energized");
        Ok(())
    }

    /// 读取开关是否到位
    ///
    /// # 错误
    /// - `DriverError::SensingNotEnergized`: 检测回路未通电
    /// - `DriverError::Gpio`: 读取失败
    pub fn is_home(&mut self) -> Result<bool, DriverError> {
        if !self.state.sensing_energized {
            return Err(DriverError::SensingNotEnergized);
        }
        let home = self.input.is_low().map_err(DriverError::pin)?;
        self.state.last_read = Some(home);
        Ok(home)
    }

    /// 打开一个读数窗口
    ///
    /// 返回的守卫在 Drop 时断开检测回路；需要感知断电错误时调用
    /// [`SensingWindow::finish`]。
    pub fn sense(&mut self) -> Result<SensingWindow<'_, O, I>, DriverError> {
        if let Err(e) = self.energize() {
            // 输出状态未知，尽力断电
            let _ = self.deenergize();
            return Err(e);
        }
        Ok(SensingWindow {
            switch: self,
            closed: false,
        })
    }

    /// 单次完整读数：通电、等待稳定、读取、断电
    pub fn probe(&mut self) -> Result<bool, DriverError> {
        let settle = self.settle;
        let mut window = self.sense()?;
        thread::sleep(settle);
        let home = window.is_home();
        window.finish()?;
        home
    }
}

/// 读数窗口守卫
pub struct SensingWindow<'a, O, I>
where
    O: OutputPin,
    O::Error: Into<GpioError>,
    I: InputPin,
    I::Error: Into<GpioError>,
{
    switch: &'a mut LimitSwitch<O, I>,
    closed: bool,
}

impl<O, I> SensingWindow<'_, O, I>
where
    O: OutputPin,
    O::Error: Into<GpioError>,
    I: InputPin,
    I::Error: Into<GpioError>,
{
    pub fn is_home(&mut self) -> Result<bool, DriverError> {
        self.switch.is_home()
    }

    /// 关闭窗口并返回断电结果
    pub fn finish(mut self) -> Result<(), DriverError> {
        self.closed = true;
        self.switch.deenergize()
    }
}

impl<O, I> Drop for SensingWindow<'_, O, I>
where
    O: OutputPin,
    O::Error: Into<GpioError>,
    I: InputPin,
    I::Error: Into<GpioError>,
{
    fn drop(&mut self) {
        if !self.closed
            && let Err(e) = self.switch.deenergize()
        {
            error!("Failed to de-energize switch sensing: {}", e);
        }
    }
}
