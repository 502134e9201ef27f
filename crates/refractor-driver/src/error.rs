//! 驱动层与命令层错误类型定义

use refractor_gpio::GpioError;
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 数字 IO 错误
    #[error("GPIO error: {0}")]
    Gpio(#[from] GpioError),

    /// 回零失败：步数达到上限仍未检测到开关
    #[error("Home switch not reached after {steps} steps")]
    HomingFailed { steps: u64 },

    /// 驱动器未使能时发出了脉冲
    #[error("Motor driver is not enabled")]
    MotorDisabled,

    /// 限位开关检测回路未通电时读取了开关
    #[error("Switch sensing circuit is not energized")]
    SensingNotEnergized,

    /// 当前操作被取消
    #[error("Operation cancelled")]
    Cancelled,

    /// 命令工作线程已停止，不再接受命令
    #[error("Command worker stopped")]
    WorkerStopped,

    /// 等待超时
    #[error("Operation timeout")]
    Timeout,

    /// 无法创建工作线程
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

impl DriverError {
    /// 把 embedded-hal 引脚错误转换为 [`DriverError::Gpio`]
    pub(crate) fn pin<E: Into<GpioError>>(err: E) -> Self {
        DriverError::Gpio(err.into())
    }
}

/// 命令失败的分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// 电机或开关硬件故障
    HardwareFault,
    /// 外部工具（相机、查看器、叠加、质心）失败
    ExternalToolFailure,
    /// 前置条件不满足，需要用户操作
    UserInputError,
    /// 操作被用户取消
    Cancelled,
}

/// 命令执行错误
///
/// 命令以返回值报告失败，由工作线程统一渲染到报告通道。
#[derive(Error, Debug)]
pub enum CommandError {
    /// 硬件故障
    #[error("hardware fault: {0}")]
    HardwareFault(#[from] DriverError),

    /// 外部工具失败
    #[error("{tool} failed: {detail}")]
    ExternalToolFailure { tool: String, detail: String },

    /// 用户输入或前置条件错误
    #[error("{0}")]
    UserInputError(String),
}

impl CommandError {
    pub fn external(tool: impl Into<String>, detail: impl Into<String>) -> Self {
        CommandError::ExternalToolFailure {
            tool: tool.into(),
            detail: detail.into(),
        }
    }

    pub fn user(message: impl Into<String>) -> Self {
        CommandError::UserInputError(message.into())
    }

    /// 错误分类（取消单独归类，不计为硬件故障）
    pub fn kind(&self) -> ErrorKind {
        match self {
            CommandError::HardwareFault(DriverError::Cancelled) => ErrorKind::Cancelled,
            CommandError::HardwareFault(_) => ErrorKind::HardwareFault,
            CommandError::ExternalToolFailure { .. } => ErrorKind::ExternalToolFailure,
            CommandError::UserInputError(_) => ErrorKind::UserInputError,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }
}

impl From<GpioError> for CommandError {
    fn from(err: GpioError) -> Self {
        CommandError::HardwareFault(DriverError::Gpio(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DriverError::HomingFailed { steps: 21600 };
        assert_eq!(err.to_string(), "Home switch not reached after 21600 steps");

        let err = CommandError::external("capture", "exited with status 1");
        assert_eq!(err.to_string(), "capture failed: exited with status 1");

        let err: CommandError = DriverError::MotorDisabled.into();
        assert_eq!(err.to_string(), "hardware fault: Motor driver is not enabled");
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(
            CommandError::from(DriverError::Timeout).kind(),
            ErrorKind::HardwareFault
        );
        assert_eq!(
            CommandError::from(DriverError::Cancelled).kind(),
            ErrorKind::Cancelled
        );
        assert_eq!(
            CommandError::external("viewer", "down").kind(),
            ErrorKind::ExternalToolFailure
        );
        assert_eq!(
            CommandError::user("take an exposure first").kind(),
            ErrorKind::UserInputError
        );
    }

    #[test]
    fn test_gpio_error_is_hardware_fault() {
        let err: CommandError = GpioError::Injected(17).into();
        assert_eq!(err.kind(), ErrorKind::HardwareFault);
        assert!(matches!(
            err,
            CommandError::HardwareFault(DriverError::Gpio(GpioError::Injected(17)))
        ));
    }
}
