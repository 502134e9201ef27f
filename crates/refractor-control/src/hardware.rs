//! 镜盖硬件组装
//!
//! 电机与限位开关持有各自的线句柄；这里用类型擦除的句柄把它们
//! 组合在一起，后端（sysfs / mock）在运行时选择。

use std::path::Path;

use refractor_driver::{
    CancelToken, DriverError, LimitSwitch, MotorConfig, MotorController, MotorState,
    MotorStateHandle, SwitchConfig, SwitchState,
};
use refractor_gpio::{DigitalIo, DynInput, DynOutput, Level, MockGpio};
use tracing::info;

use crate::config::{Backend, RefractorConfig};

pub type DynMotor = MotorController<DynOutput>;
pub type DynSwitch = LimitSwitch<DynOutput, DynInput>;

/// 镜盖的电机与限位开关
pub struct CoverHardware {
    motor: DynMotor,
    switch: DynSwitch,
}

impl CoverHardware {
    pub fn new(motor: DynMotor, switch: DynSwitch) -> Self {
        Self { motor, switch }
    }

    /// 从任意后端占用电机与开关的线
    pub fn from_io<D: DigitalIo>(
        io: &mut D,
        motor: MotorConfig,
        switch: &SwitchConfig,
        cancel: CancelToken,
    ) -> Result<Self, DriverError> {
        let mut io = io.boxed();
        let motor = MotorController::from_io(&mut io, motor)?.with_cancel_token(cancel);
        let switch = LimitSwitch::from_io(&mut io, switch)?;
        Ok(Self::new(motor, switch))
    }

    /// 按配置选择后端
    ///
    /// 模拟后端不需要等待时间，开关始终处于到位状态。
    pub fn from_config(
        config: &RefractorConfig,
        cancel: CancelToken,
    ) -> Result<Self, DriverError> {
        match config.gpio.backend {
            Backend::Sysfs => Self::sysfs(&config.gpio.sysfs_base, config, cancel),
            Backend::Mock => {
                let mock = MockGpio::new();
                mock.set_input(config.switch.input_line, Level::Low);
                Self::mock(&mock, config, cancel)
            },
        }
    }

    /// 使用给定的模拟后端（测试可保留克隆以观察线电平）
    pub fn mock(
        mock: &MockGpio,
        config: &RefractorConfig,
        cancel: CancelToken,
    ) -> Result<Self, DriverError> {
        info!("Using mock GPIO backend");
        let mut io = mock.clone();
        Self::from_io(
            &mut io,
            config.motor.clone().without_delays(),
            &SwitchConfig {
                settle_ms: 0,
                ..config.switch.clone()
            },
            cancel,
        )
    }

    #[cfg(target_os = "linux")]
    fn sysfs(
        base: &Path,
        config: &RefractorConfig,
        cancel: CancelToken,
    ) -> Result<Self, DriverError> {
        info!("Using sysfs GPIO backend at {}", base.display());
        let mut io = refractor_gpio::SysfsGpio::with_base(base);
        Self::from_io(&mut io, config.motor.clone(), &config.switch, cancel)
    }

    #[cfg(not(target_os = "linux"))]
    fn sysfs(
        _base: &Path,
        _config: &RefractorConfig,
        _cancel: CancelToken,
    ) -> Result<Self, DriverError> {
        Err(refractor_gpio::GpioError::Unsupported("sysfs").into())
    }

    /// 开盖，返回里程计
    pub fn open(&mut self) -> Result<i64, DriverError> {
        self.motor.open()
    }

    /// 关盖，返回里程计
    pub fn close(&mut self) -> Result<i64, DriverError> {
        self.motor.close()
    }

    /// 回零，返回所用步数
    pub fn home(&mut self) -> Result<u64, DriverError> {
        self.motor.home(&mut self.switch)
    }

    /// 单次读取限位开关
    pub fn probe_switch(&mut self) -> Result<bool, DriverError> {
        self.switch.probe()
    }

    pub fn motor_state(&self) -> MotorState {
        self.motor.state()
    }

    pub fn switch_state(&self) -> SwitchState {
        self.switch.state()
    }

    pub fn state_handle(&self) -> MotorStateHandle {
        self.motor.state_handle()
    }
}
