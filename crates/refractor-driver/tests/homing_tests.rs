//! 回零协议与检测回路断电测试
//!
//! 全部使用 MockGpio，时间参数为零。

use std::thread;
use std::time::Duration;

use refractor_driver::{
    DriverError, LimitSwitch, MotorConfig, MotorController, MotorPhase, SwitchConfig,
};
use refractor_gpio::{GpioError, InputRule, Level, MockGpio, MockInput, MockOutput};

const PULSE: u32 = 17;
const ENABLE: u32 = 22;
const SENSE: u32 = 20;
const INPUT: u32 = 19;

type Switch = LimitSwitch<MockOutput, MockInput>;

fn setup(config: MotorConfig) -> (MockGpio, MotorController<MockOutput>, Switch) {
    let mut gpio = MockGpio::new();
    let motor = MotorController::from_io(&mut gpio, config).unwrap();
    let switch = LimitSwitch::from_io(
        &mut gpio,
        &SwitchConfig {
            settle_ms: 0,
            ..SwitchConfig::default()
        },
    )
    .unwrap();
    (gpio, motor, switch)
}

fn fast(steps_per_sweep: u32, ceiling: Option<u32>) -> MotorConfig {
    MotorConfig {
        steps_per_sweep,
        max_homing_steps: ceiling,
        ..MotorConfig::default().without_delays()
    }
}

fn assert_safe(gpio: &MockGpio) {
    assert_eq!(gpio.level(SENSE), Some(Level::Low), "sensing left energized");
    assert_eq!(gpio.level(ENABLE), Some(Level::High), "driver left enabled");
}

#[test]
fn test_home_when_already_home_takes_no_steps() {
    let (gpio, mut motor, mut switch) = setup(fast(100, Some(200)));
    gpio.set_input(INPUT, Level::Low);
    gpio.clear_history();

    let steps = motor.home(&mut switch).unwrap();

    assert_eq!(steps, 0);
    assert_eq!(gpio.falling_edges(PULSE), 0);
    assert_eq!(gpio.reads(INPUT), 1);
    assert_eq!(gpio.history_for(SENSE), vec![Level::High, Level::Low]);
    assert_eq!(gpio.history_for(ENABLE), vec![Level::Low, Level::High]);
    assert_safe(&gpio);
    assert_eq!(motor.state().phase, MotorPhase::Idle);
}

#[test]
fn test_home_steps_until_switch_asserts() {
    let (gpio, mut motor, mut switch) = setup(fast(40, Some(200)));
    gpio.set_input_rule(
        INPUT,
        InputRule::AfterFallingEdges {
            edge_line: PULSE,
            count: 30,
            before: Level::High,
            after: Level::Low,
        },
    );

    assert_eq!(motor.home(&mut switch).unwrap(), 30);
    assert_eq!(gpio.falling_edges(PULSE), 30);
    assert_eq!(motor.state().step_count, 0);
    assert_safe(&gpio);
}

#[test]
fn test_home_after_open_resets_odometer() {
    let (gpio, mut motor, mut switch) = setup(fast(40, Some(200)));
    assert_eq!(motor.open().unwrap(), 40);

    gpio.set_input_rule(
        INPUT,
        InputRule::AfterFallingEdges {
            edge_line: PULSE,
            count: 38,
            before: Level::High,
            after: Level::Low,
        },
    );
    assert_eq!(motor.home(&mut switch).unwrap(), 38);
    assert_eq!(motor.state().step_count, 0);
}

#[test]
fn test_home_fails_at_ceiling() {
    let (gpio, mut motor, mut switch) = setup(fast(40, Some(50)));
    gpio.set_input(INPUT, Level::High);

    let err = motor.home(&mut switch).unwrap_err();

    assert!(matches!(err, DriverError::HomingFailed { steps: 50 }));
    assert_eq!(gpio.falling_edges(PULSE), 50);
    assert_eq!(motor.state().step_count, -50);
    assert_safe(&gpio);
}

#[test]
fn test_home_gpio_fault_deenergizes_sensing() {
    let (gpio, mut motor, mut switch) = setup(fast(40, Some(200)));
    gpio.set_input(INPUT, Level::High);
    gpio.inject_fault(PULSE);

    let err = motor.home(&mut switch).unwrap_err();

    assert!(matches!(err, DriverError::Gpio(GpioError::Injected(PULSE))));
    assert_safe(&gpio);
}

#[test]
fn test_home_switch_read_fault_deenergizes_sensing() {
    let (gpio, mut motor, mut switch) = setup(fast(40, Some(200)));
    gpio.inject_fault(INPUT);

    let err = motor.home(&mut switch).unwrap_err();

    assert!(matches!(err, DriverError::Gpio(GpioError::Injected(INPUT))));
    assert_eq!(gpio.falling_edges(PULSE), 0);
    assert_safe(&gpio);
}

#[test]
fn test_unbounded_home_can_be_cancelled() {
    let config = MotorConfig {
        step_delay_us: 10,
        ..fast(40, None)
    };
    let (gpio, mut motor, mut switch) = setup(config);
    gpio.set_input(INPUT, Level::High);

    let token = motor.cancel_token();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        token.cancel();
    });

    let err = motor.home(&mut switch).unwrap_err();
    canceller.join().unwrap();

    assert!(matches!(err, DriverError::Cancelled));
    assert!(gpio.falling_edges(PULSE) > 0);
    assert_safe(&gpio);
}

#[test]
fn test_open_close_round_trip() {
    let (gpio, mut motor, _switch) = setup(fast(120, Some(240)));
    let start = motor.state().step_count;

    motor.open().unwrap();
    let end = motor.close().unwrap();

    assert_eq!(end, start);
    assert_eq!(gpio.falling_edges(PULSE), 240);
    assert_safe(&gpio);
}
