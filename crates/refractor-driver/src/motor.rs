//! 步进电机控制器
//!
//! 通过脉冲（PUL）、方向（DIR）、使能（ENA）三条线驱动步进电机驱动器。
//!
//! # 状态机
//!
//! ```text
//! Idle ──open/close──▶ Driving(dir) ──▶ Idle
//!   └──────home──────▶ Homing ───(开关到位)──▶ Idle
//! ```
//!
//! 所有复合动作（开、关、回零）在任何退出路径上都会关闭驱动器，
//! 回零时检测回路在任何退出路径上都会断电。
//!
//! # 电平约定
//!
//! - 使能低电平有效（ENA 低 = 使能）
//! - 方向高电平为正向（开盖）
//! - 每一步：PUL 拉低，保持 `step_delay`，拉高，再保持 `step_delay`

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use arc_swap::ArcSwap;
use embedded_hal::digital::{InputPin, OutputPin, PinState};
use refractor_gpio::{DigitalIo, GpioError, Level};
use tracing::{debug, error, info, warn};

use crate::{
    CancelToken, Direction, DriverError, LimitSwitch, MotorPhase, MotorState, MotorStateHandle,
};

/// 默认脉冲线（BCM）
pub const PULSE_LINE: u32 = 17;
/// 默认方向线（BCM）
pub const DIRECTION_LINE: u32 = 27;
/// 默认使能线（BCM）
pub const ENABLE_LINE: u32 = 22;

/// 每转脉冲数（1.8° 步距角，4 细分）
pub const PULSES_PER_REVOLUTION: u32 = 800;
/// 减速比
pub const GEAR_RATIO: u32 = 27;
/// 盖板转过 180° 所需脉冲数
pub const STEPS_PER_HALF_ROTATION: u32 = PULSES_PER_REVOLUTION / 2 * GEAR_RATIO;
/// 脉冲半周期（微秒）
pub const STEP_DELAY_US: u64 = 100;
/// 使能/换向前后的稳定时间（毫秒）
pub const SETTLE_MS: u64 = 500;
/// 默认回零步数上限（两次完整扫动）
pub const DEFAULT_MAX_HOMING_STEPS: u32 = 2 * STEPS_PER_HALF_ROTATION;

const ENABLE_ACTIVE: Level = Level::Low;
const FORWARD_LEVEL: Level = Level::High;

/// 运动中每隔多少步发布一次状态快照
const PUBLISH_INTERVAL: u32 = 100;

/// 电机配置
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct MotorConfig {
    pub pulse_line: u32,
    pub direction_line: u32,
    pub enable_line: u32,
    /// 脉冲半周期（微秒）
    pub step_delay_us: u64,
    /// 一次开/关扫动的步数
    pub steps_per_sweep: u32,
    /// 稳定时间（毫秒）
    pub settle_ms: u64,
    /// 回零步数上限；`None` 表示不设上限（配置文件中写 0）
    #[cfg_attr(feature = "serde", serde(with = "homing_ceiling"))]
    pub max_homing_steps: Option<u32>,
}

#[cfg(feature = "serde")]
mod homing_ceiling {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<u32>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(value.unwrap_or(0))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
        let steps = u32::deserialize(deserializer)?;
        Ok((steps != 0).then_some(steps))
    }
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            pulse_line: PULSE_LINE,
            direction_line: DIRECTION_LINE,
            enable_line: ENABLE_LINE,
            step_delay_us: STEP_DELAY_US,
            steps_per_sweep: STEPS_PER_HALF_ROTATION,
            settle_ms: SETTLE_MS,
            max_homing_steps: Some(DEFAULT_MAX_HOMING_STEPS),
        }
    }
}

impl MotorConfig {
    /// 去掉所有等待时间（模拟后端与测试使用）
    pub fn without_delays(mut self) -> Self {
        self.step_delay_us = 0;
        self.settle_ms = 0;
        self
    }

    pub fn step_delay(&self) -> Duration {
        Duration::from_micros(self.step_delay_us)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

/// 步进电机控制器
///
/// 三条线可以是任意 embedded-hal [`OutputPin`]，错误需能转换为 [`GpioError`]
/// （`Infallible` 的 HAL 引脚可直接使用）。
pub struct MotorController<O>
where
    O: OutputPin,
    O::Error: Into<GpioError>,
{
    pulse: O,
    direction: O,
    enable: O,
    config: MotorConfig,
    state: MotorState,
    shared: Arc<ArcSwap<MotorState>>,
    cancel: CancelToken,
}

impl<O> MotorController<O>
where
    O: OutputPin,
    O::Error: Into<GpioError>,
{
    /// 使用已占用的三条输出线创建控制器，并立即关闭驱动器
    pub fn new(
        pulse: O,
        direction: O,
        enable: O,
        config: MotorConfig,
    ) -> Result<Self, DriverError> {
        if config.max_homing_steps.is_none() {
            warn!("Homing has no step ceiling; a stuck switch will block the worker indefinitely");
        }

        let mut motor = Self {
            pulse,
            direction,
            enable,
            config,
            state: MotorState::default(),
            shared: Arc::new(ArcSwap::from_pointee(MotorState::default())),
            cancel: CancelToken::new(),
        };
        motor.pulse.set_high().map_err(DriverError::pin)?;
        motor.set_direction(Direction::Forward)?;
        motor.disable()?;
        Ok(motor)
    }

    /// 从后端占用配置中的线
    ///
    /// 使能线以"关闭"电平占用，上电瞬间驱动器不会锁轴。
    pub fn from_io<D>(io: &mut D, config: MotorConfig) -> Result<Self, DriverError>
    where
        D: DigitalIo<Output = O>,
    {
        let enable = io.output(config.enable_line, !ENABLE_ACTIVE)?;
        let pulse = io.output(config.pulse_line, Level::High)?;
        let direction = io.output(config.direction_line, FORWARD_LEVEL)?;
        Self::new(pulse, direction, enable, config)
    }

    /// 与队列共享取消标志
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &MotorConfig {
        &self.config
    }

    pub fn state(&self) -> MotorState {
        self.state
    }

    /// 可跨线程读取的状态句柄
    pub fn state_handle(&self) -> MotorStateHandle {
        MotorStateHandle::new(self.shared.clone())
    }

    fn publish(&self) {
        self.shared.store(Arc::new(self.state));
    }

    /// 使能驱动器
    pub fn enable(&mut self) -> Result<(), DriverError> {
        self.enable
            .set_state(PinState::from(ENABLE_ACTIVE))
            .map_err(DriverError::pin)?;
        self.state.enabled = true;
        self.publish();
        debug!("Motor driver enabled");
        Ok(())
    }

    /// 关闭驱动器
    pub fn disable(&mut self) -> Result<(), DriverError> {
        self.enable
            .set_state(PinState::from(!ENABLE_ACTIVE))
            .map_err(DriverError::pin)?;
        self.state.enabled = false;
        self.state.phase = MotorPhase::Idle;
        self.publish();
        debug!("Motor driver disabled");
        Ok(())
    }

    pub fn forward(&mut self) -> Result<(), DriverError> {
        self.set_direction(Direction::Forward)
    }

    pub fn reverse(&mut self) -> Result<(), DriverError> {
        self.set_direction(Direction::Reverse)
    }

    fn set_direction(&mut self, direction: Direction) -> Result<(), DriverError> {
        let level = match direction {
            Direction::Forward => FORWARD_LEVEL,
            Direction::Reverse => !FORWARD_LEVEL,
        };
        self.direction
            .set_state(PinState::from(level))
            .map_err(DriverError::pin)?;
        self.state.direction = direction;
        self.publish();
        Ok(())
    }

    /// 发出一个脉冲，里程计按方向加减 1
    ///
    /// # 错误
    /// - `DriverError::MotorDisabled`: 驱动器未使能
    /// - `DriverError::Gpio`: 写线失败
    pub fn step(&mut self) -> Result<(), DriverError> {
        if !self.state.enabled {
            return Err(DriverError::MotorDisabled);
        }
        let delay = self.config.step_delay();
        self.pulse.set_low().map_err(DriverError::pin)?;
        spin_sleep::sleep(delay);
        self.pulse.set_high().map_err(DriverError::pin)?;
        spin_sleep::sleep(delay);
        self.state.step_count += self.state.direction.sign();
        Ok(())
    }

    /// 正向扫动一次（开盖），返回里程计
    pub fn open(&mut self) -> Result<i64, DriverError> {
        self.sweep(Direction::Forward)
    }

    /// 反向扫动一次（关盖），返回里程计
    pub fn close(&mut self) -> Result<i64, DriverError> {
        self.sweep(Direction::Reverse)
    }

    fn sweep(&mut self, direction: Direction) -> Result<i64, DriverError> {
        let steps = self.config.steps_per_sweep;
        let settle = self.config.settle();

        let result = self.with_driver(|motor| {
            thread::sleep(settle);
            motor.set_direction(direction)?;
            motor.state.phase = MotorPhase::Driving(direction);
            motor.publish();
            motor.drive(steps)
        });
        thread::sleep(settle);
        result?;

        info!(
            "Swept {} steps {}, odometer at {}",
            steps, direction, self.state.step_count
        );
        Ok(self.state.step_count)
    }

    fn drive(&mut self, steps: u32) -> Result<(), DriverError> {
        for i in 1..=steps {
            self.cancel.check()?;
            self.step()?;
            if i % PUBLISH_INTERVAL == 0 {
                self.publish();
            }
        }
        self.publish();
        Ok(())
    }

    /// 反向驱动直到限位开关到位，返回所用步数；成功后里程计归零
    ///
    /// # 错误
    /// - `DriverError::HomingFailed`: 达到 `max_homing_steps` 仍未到位
    /// - `DriverError::Cancelled`: 被取消
    /// - `DriverError::Gpio`: 电机或开关线故障
    pub fn home<S, I>(&mut self, switch: &mut LimitSwitch<S, I>) -> Result<u64, DriverError>
    where
        S: OutputPin,
        S::Error: Into<GpioError>,
        I: InputPin,
        I::Error: Into<GpioError>,
    {
        let settle = self.config.settle();
        let switch_settle = switch.settle();
        let ceiling = self.config.max_homing_steps;

        let steps = self.with_driver(|motor| {
            thread::sleep(settle);
            motor.set_direction(Direction::Reverse)?;
            motor.state.phase = MotorPhase::Homing;
            motor.publish();

            let mut window = switch.sense()?;
            thread::sleep(switch_settle);

            let mut steps = 0u64;
            while !window.is_home()? {
                if ceiling_reached(steps, ceiling) {
                    return Err(DriverError::HomingFailed { steps });
                }
                motor.cancel.check()?;
                motor.step()?;
                steps += 1;
                if steps % u64::from(PUBLISH_INTERVAL) == 0 {
                    motor.publish();
                }
            }
            window.finish()?;

            motor.state.step_count = 0;
            Ok(steps)
        })?;

        info!("Home switch reached after {} steps", steps);
        Ok(steps)
    }

    /// 使能驱动器执行 `op`，无论结果如何都关闭驱动器
    fn with_driver<T>(
        &mut self,
        op: impl FnOnce(&mut Self) -> Result<T, DriverError>,
    ) -> Result<T, DriverError> {
        let result = match self.enable() {
            Ok(()) => op(self),
            Err(e) => Err(e),
        };
        let disabled = self.disable();

        if let (Err(op_err), Err(disable_err)) = (&result, &disabled) {
            error!(
                "Failed to disable motor driver after error ({}): {}",
                op_err, disable_err
            );
        }
        let value = result?;
        disabled?;
        Ok(value)
    }
}

/// 回零步数是否已达上限；`None` 不设上限
fn ceiling_reached(steps: u64, ceiling: Option<u32>) -> bool {
    ceiling.is_some_and(|max| steps >= u64::from(max))
}

impl<O> Drop for MotorController<O>
where
    O: OutputPin,
    O::Error: Into<GpioError>,
{
    fn drop(&mut self) {
        if self.state.enabled
            && let Err(e) = self.disable()
        {
            error!("Failed to disable motor driver on drop: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refractor_gpio::{GpioError, MockGpio, MockOutput};

    fn fast_config() -> MotorConfig {
        MotorConfig {
            steps_per_sweep: 25,
            ..MotorConfig::default().without_delays()
        }
    }

    fn setup() -> (MockGpio, MotorController<MockOutput>) {
        let mut gpio = MockGpio::new();
        let motor = MotorController::from_io(&mut gpio, fast_config()).unwrap();
        (gpio, motor)
    }

    #[test]
    fn test_default_constants() {
        let config = MotorConfig::default();
        assert_eq!(config.steps_per_sweep, 10_800);
        assert_eq!(config.step_delay(), Duration::from_micros(100));
        assert_eq!(config.settle(), Duration::from_millis(500));
        assert_eq!(config.max_homing_steps, Some(21_600));
    }

    #[test]
    fn test_construction_disables_driver() {
        let (gpio, motor) = setup();
        assert_eq!(gpio.level(ENABLE_LINE), Some(Level::High));
        assert_eq!(gpio.level(PULSE_LINE), Some(Level::High));
        assert!(!motor.state().enabled);
        assert_eq!(motor.state().phase, MotorPhase::Idle);
    }

    #[test]
    fn test_enable_is_active_low() {
        let (gpio, mut motor) = setup();
        motor.enable().unwrap();
        assert_eq!(gpio.level(ENABLE_LINE), Some(Level::Low));
        motor.disable().unwrap();
        assert_eq!(gpio.level(ENABLE_LINE), Some(Level::High));
    }

    #[test]
    fn test_direction_levels() {
        let (gpio, mut motor) = setup();
        motor.reverse().unwrap();
        assert_eq!(gpio.level(DIRECTION_LINE), Some(Level::Low));
        motor.forward().unwrap();
        assert_eq!(gpio.level(DIRECTION_LINE), Some(Level::High));
    }

    #[test]
    fn test_step_requires_enable() {
        let (gpio, mut motor) = setup();
        assert!(matches!(motor.step(), Err(DriverError::MotorDisabled)));
        assert_eq!(gpio.falling_edges(PULSE_LINE), 0);
        assert_eq!(motor.state().step_count, 0);
    }

    #[test]
    fn test_step_pulse_shape() {
        let (gpio, mut motor) = setup();
        motor.enable().unwrap();
        gpio.clear_history();

        motor.step().unwrap();
        assert_eq!(gpio.history_for(PULSE_LINE), vec![Level::Low, Level::High]);
        assert_eq!(motor.state().step_count, 1);

        motor.reverse().unwrap();
        motor.step().unwrap();
        motor.step().unwrap();
        assert_eq!(motor.state().step_count, -1);
    }

    #[test]
    fn test_open_then_close_restores_odometer() {
        let (gpio, mut motor) = setup();
        assert_eq!(motor.open().unwrap(), 25);
        assert_eq!(motor.close().unwrap(), 0);
        assert_eq!(gpio.falling_edges(PULSE_LINE), 50);
        assert_eq!(gpio.level(ENABLE_LINE), Some(Level::High));
        assert!(!motor.state().enabled);
    }

    #[test]
    fn test_sweep_disables_after_fault() {
        let (gpio, mut motor) = setup();
        gpio.inject_fault(PULSE_LINE);

        let err = motor.open().unwrap_err();
        assert!(matches!(err, DriverError::Gpio(GpioError::Injected(PULSE_LINE))));
        assert_eq!(gpio.level(ENABLE_LINE), Some(Level::High));
        assert!(!motor.state().enabled);
    }

    #[test]
    fn test_cancelled_sweep_stops_early() {
        let (gpio, mut motor) = setup();
        motor.cancel_token().cancel();

        assert!(matches!(motor.close(), Err(DriverError::Cancelled)));
        assert_eq!(gpio.falling_edges(PULSE_LINE), 0);
        assert_eq!(gpio.level(ENABLE_LINE), Some(Level::High));
    }

    #[test]
    fn test_state_handle_tracks_motion() {
        let (_gpio, mut motor) = setup();
        let handle = motor.state_handle();
        motor.open().unwrap();
        let state = handle.load();
        assert_eq!(state.step_count, 25);
        assert_eq!(state.direction, Direction::Forward);
        assert_eq!(state.phase, MotorPhase::Idle);
        assert!(!state.enabled);
    }

    /// 只实现 embedded-hal 的普通引脚，不经过任何后端
    #[derive(Clone, Default)]
    struct HalPin {
        levels: Arc<parking_lot::Mutex<Vec<bool>>>,
    }

    impl embedded_hal::digital::ErrorType for HalPin {
        type Error = std::convert::Infallible;
    }

    impl OutputPin for HalPin {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            self.levels.lock().push(false);
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            self.levels.lock().push(true);
            Ok(())
        }
    }

    #[test]
    fn test_drives_plain_hal_pins() {
        let (pulse, direction, enable) = (HalPin::default(), HalPin::default(), HalPin::default());
        let mut motor = MotorController::new(
            pulse.clone(),
            direction.clone(),
            enable.clone(),
            fast_config(),
        )
        .unwrap();

        assert_eq!(motor.open().unwrap(), 25);
        assert_eq!(motor.close().unwrap(), 0);

        let pulses = pulse.levels.lock();
        assert_eq!(pulses.iter().filter(|high| !**high).count(), 50);
        assert_eq!(direction.levels.lock().last(), Some(&false));
        // 使能低有效：最后一次写入为高（关闭）
        assert_eq!(enable.levels.lock().last(), Some(&true));
    }

    #[test]
    fn test_homing_ceiling_counts_past_u32() {
        let beyond = u64::from(u32::MAX) + 1;
        assert!(!ceiling_reached(beyond, None));
        assert!(ceiling_reached(beyond, Some(u32::MAX)));
        assert!(!ceiling_reached(49, Some(50)));
        assert!(ceiling_reached(50, Some(50)));
    }

    #[test]
    fn test_drop_disables_enabled_driver() {
        let (gpio, mut motor) = setup();
        motor.enable().unwrap();
        drop(motor);
        assert_eq!(gpio.level(ENABLE_LINE), Some(Level::High));
    }
}
