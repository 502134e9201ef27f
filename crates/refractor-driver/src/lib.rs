//! # Refractor Driver
//!
//! 折射镜镜盖的驱动层：步进电机、限位开关，以及保证硬件动作
//! 互斥且有序执行的单消费者命令队列。
//!
//! ## 模块
//!
//! - [`motor`]: 步进电机控制器（开、关、回零）
//! - [`switch`]: 限位开关与读数窗口
//! - [`queue`] / [`worker`]: 命令队列与工作线程
//! - [`report`]: 面向操作员的报告通道
//! - [`hooks`]: 命令执行观察者
//! - [`metrics`]: 队列计数器
//!
//! ## 示例
//!
//! ```
//! use refractor_driver::{LimitSwitch, MotorConfig, MotorController, SwitchConfig};
//! use refractor_gpio::{Level, MockGpio};
//!
//! let mut gpio = MockGpio::new();
//! let config = MotorConfig { steps_per_sweep: 10, ..MotorConfig::default().without_delays() };
//! let mut motor = MotorController::from_io(&mut gpio, config).unwrap();
//! let mut switch = LimitSwitch::from_io(
//!     &mut gpio,
//!     &SwitchConfig { settle_ms: 0, ..SwitchConfig::default() },
//! ).unwrap();
//!
//! assert_eq!(motor.open().unwrap(), 10);
//! gpio.set_input(19, Level::Low);
//! assert_eq!(motor.home(&mut switch).unwrap(), 0);
//! assert_eq!(motor.state().step_count, 0);
//! ```

pub mod cancel;
pub mod command;
pub mod error;
pub mod hooks;
pub mod metrics;
pub mod motor;
pub mod queue;
pub mod report;
pub mod state;
pub mod switch;
pub mod worker;

pub use cancel::CancelToken;
pub use command::{Command, CommandResult};
pub use error::{CommandError, DriverError, ErrorKind};
pub use hooks::{CommandObserver, CommandOutcome, ExecutionLog, ExecutionRecord, HookManager};
pub use metrics::{QueueMetrics, QueueSnapshot};
pub use motor::{MotorConfig, MotorController};
pub use queue::CommandQueue;
pub use report::{ChannelReporter, MemoryReporter, Reporter, SharedReporter, TracingReporter};
pub use state::{Direction, MotorPhase, MotorState, MotorStateHandle, SwitchState, WorkerStatus};
pub use switch::{LimitSwitch, SensingWindow, SwitchConfig};
pub use worker::{FaultPolicy, QueueConfig};
