//! 状态快照类型
//!
//! 电机状态由工作线程写入 `ArcSwap`，状态查询无需进入命令队列。

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;

/// 转动方向
///
/// `Forward` 为开盖方向，`Reverse` 为关盖/回零方向。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Direction {
    #[default]
    Forward,
    Reverse,
}

impl Direction {
    /// 里程计增量符号
    pub fn sign(self) -> i64 {
        match self {
            Direction::Forward => 1,
            Direction::Reverse => -1,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Forward => f.write_str("forward"),
            Direction::Reverse => f.write_str("reverse"),
        }
    }
}

/// 电机当前动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MotorPhase {
    #[default]
    Idle,
    Driving(Direction),
    Homing,
}

/// 电机状态快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MotorState {
    /// 驱动器是否使能
    pub enabled: bool,
    /// 当前方向
    pub direction: Direction,
    /// 有符号步数里程计（正向 +1，反向 -1；回零成功后归零）
    pub step_count: i64,
    pub phase: MotorPhase,
}

/// 限位开关状态快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SwitchState {
    /// 检测回路是否通电
    pub sensing_energized: bool,
    /// 最近一次读数（`Some(true)` 表示到位）
    pub last_read: Option<bool>,
}

/// 工作线程状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerStatus {
    Running,
    /// 工作线程已停止（致命故障或已关闭）
    Stopped { reason: String },
}

impl WorkerStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, WorkerStatus::Running)
    }
}

/// 电机状态的只读句柄，可在任意线程读取
#[derive(Debug, Clone)]
pub struct MotorStateHandle {
    inner: Arc<ArcSwap<MotorState>>,
}

impl MotorStateHandle {
    pub(crate) fn new(inner: Arc<ArcSwap<MotorState>>) -> Self {
        Self { inner }
    }

    pub fn load(&self) -> MotorState {
        **self.inner.load()
    }
}
