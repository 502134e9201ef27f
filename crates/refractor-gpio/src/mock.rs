//! 模拟 GPIO 后端
//!
//! 所有句柄共享同一份状态，测试代码持有 `MockGpio` 的克隆即可观察输出电平、
//! 下降沿计数和完整电平历史，并控制输入线的读数。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use embedded_hal::digital::{ErrorType, InputPin, OutputPin};

use crate::{ClaimGuard, ClaimSet, DigitalIo, GpioError, Level, Pull};

/// 一次输出写入记录
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelChange {
    pub line: u32,
    pub level: Level,
    pub at: Instant,
}

/// 输入线读数规则
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputRule {
    /// 始终返回固定电平
    Fixed(Level),
    /// `edge_line` 在规则安装后产生 `count` 个下降沿之前返回 `before`，之后返回 `after`
    AfterFallingEdges {
        edge_line: u32,
        count: u64,
        before: Level,
        after: Level,
    },
}

#[derive(Debug, Clone, Copy)]
struct ActiveRule {
    rule: InputRule,
    baseline: u64,
}

#[derive(Debug, Default)]
struct MockState {
    outputs: HashMap<u32, Level>,
    pulls: HashMap<u32, Pull>,
    history: Vec<LevelChange>,
    falling_edges: HashMap<u32, u64>,
    reads: HashMap<u32, u64>,
    rules: HashMap<u32, ActiveRule>,
    faults: HashSet<u32>,
}

impl MockState {
    fn write(&mut self, line: u32, level: Level) -> Result<(), GpioError> {
        if self.faults.contains(&line) {
            return Err(GpioError::Injected(line));
        }
        let previous = self.outputs.insert(line, level);
        if previous == Some(Level::High) && level == Level::Low {
            *self.falling_edges.entry(line).or_default() += 1;
        }
        self.history.push(LevelChange {
            line,
            level,
            at: Instant::now(),
        });
        Ok(())
    }

    fn read(&mut self, line: u32) -> Result<Level, GpioError> {
        if self.faults.contains(&line) {
            return Err(GpioError::Injected(line));
        }
        *self.reads.entry(line).or_default() += 1;

        let level = match self.rules.get(&line) {
            Some(ActiveRule {
                rule: InputRule::Fixed(level),
                ..
            }) => *level,
            Some(ActiveRule {
                rule:
                    InputRule::AfterFallingEdges {
                        edge_line,
                        count,
                        before,
                        after,
                    },
                baseline,
            }) => {
                let edges = self.edges(*edge_line) - baseline;
                if edges >= *count { *after } else { *before }
            },
            None => self.pulls.get(&line).copied().unwrap_or_default().idle_level(),
        };
        Ok(level)
    }

    fn edges(&self, line: u32) -> u64 {
        self.falling_edges.get(&line).copied().unwrap_or(0)
    }
}

/// 模拟 GPIO 后端
///
/// # 示例
///
/// ```
/// use refractor_gpio::{DigitalIo, InputPin, InputRule, Level, MockGpio, OutputPin, Pull};
///
/// let mut gpio = MockGpio::new();
/// let mut pulse = gpio.output(17, Level::High).unwrap();
/// let mut switch = gpio.input(19, Pull::Down).unwrap();
///
/// // 两个脉冲之后开关到位（低电平）
/// gpio.set_input_rule(19, InputRule::AfterFallingEdges {
///     edge_line: 17,
///     count: 2,
///     before: Level::High,
///     after: Level::Low,
/// });
///
/// assert!(switch.is_high().unwrap());
/// for _ in 0..2 {
///     pulse.set_low().unwrap();
///     pulse.set_high().unwrap();
/// }
/// assert!(switch.is_low().unwrap());
/// assert_eq!(gpio.falling_edges(17), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockGpio {
    state: Arc<Mutex<MockState>>,
    claims: ClaimSet,
}

impl MockGpio {
    pub fn new() -> Self {
        Self::default()
    }

    /// 输入线固定返回 `level`
    pub fn set_input(&self, line: u32, level: Level) {
        self.set_input_rule(line, InputRule::Fixed(level));
    }

    /// 安装输入规则，下降沿计数从安装时刻开始
    pub fn set_input_rule(&self, line: u32, rule: InputRule) {
        let mut state = self.state.lock();
        let baseline = match rule {
            InputRule::AfterFallingEdges { edge_line, .. } => state.edges(edge_line),
            InputRule::Fixed(_) => 0,
        };
        state.rules.insert(line, ActiveRule { rule, baseline });
    }

    /// 之后对该线的读写都返回 `GpioError::Injected`
    pub fn inject_fault(&self, line: u32) {
        self.state.lock().faults.insert(line);
    }

    pub fn clear_fault(&self, line: u32) {
        self.state.lock().faults.remove(&line);
    }

    /// 输出线当前电平（从未写入时为 `None`）
    pub fn level(&self, line: u32) -> Option<Level> {
        self.state.lock().outputs.get(&line).copied()
    }

    /// 输出线累计下降沿数
    pub fn falling_edges(&self, line: u32) -> u64 {
        self.state.lock().edges(line)
    }

    /// 输入线累计读取次数
    pub fn reads(&self, line: u32) -> u64 {
        self.state.lock().reads.get(&line).copied().unwrap_or(0)
    }

    /// 全部输出写入记录（按时间顺序）
    pub fn history(&self) -> Vec<LevelChange> {
        self.state.lock().history.clone()
    }

    /// 单条线的写入电平序列
    pub fn history_for(&self, line: u32) -> Vec<Level> {
        self.state
            .lock()
            .history
            .iter()
            .filter(|change| change.line == line)
            .map(|change| change.level)
            .collect()
    }

    pub fn clear_history(&self) {
        self.state.lock().history.clear();
    }

    pub fn is_claimed(&self, line: u32) -> bool {
        self.claims.contains(line)
    }
}

impl DigitalIo for MockGpio {
    type Output = MockOutput;
    type Input = MockInput;

    fn output(&mut self, line: u32, initial: Level) -> Result<MockOutput, GpioError> {
        let claim = self.claims.claim(line)?;
        self.state.lock().write(line, initial)?;
        Ok(MockOutput {
            line,
            state: self.state.clone(),
            _claim: claim,
        })
    }

    fn input(&mut self, line: u32, pull: Pull) -> Result<MockInput, GpioError> {
        let claim = self.claims.claim(line)?;
        self.state.lock().pulls.insert(line, pull);
        Ok(MockInput {
            line,
            state: self.state.clone(),
            _claim: claim,
        })
    }
}

/// 模拟输出线
#[derive(Debug)]
pub struct MockOutput {
    line: u32,
    state: Arc<Mutex<MockState>>,
    _claim: ClaimGuard,
}

impl MockOutput {
    pub fn line(&self) -> u32 {
        self.line
    }

    fn drive(&mut self, level: Level) -> Result<(), GpioError> {
        self.state.lock().write(self.line, level)
    }
}

impl ErrorType for MockOutput {
    type Error = GpioError;
}

impl OutputPin for MockOutput {
    fn set_low(&mut self) -> Result<(), GpioError> {
        self.drive(Level::Low)
    }

    fn set_high(&mut self) -> Result<(), GpioError> {
        self.drive(Level::High)
    }
}

/// 模拟输入线
#[derive(Debug)]
pub struct MockInput {
    line: u32,
    state: Arc<Mutex<MockState>>,
    _claim: ClaimGuard,
}

impl MockInput {
    pub fn line(&self) -> u32 {
        self.line
    }

    /// 读取一次电平（计入读取次数）
    pub fn level(&mut self) -> Result<Level, GpioError> {
        self.state.lock().read(self.line)
    }
}

impl ErrorType for MockInput {
    type Error = GpioError;
}

impl InputPin for MockInput {
    fn is_high(&mut self) -> Result<bool, GpioError> {
        Ok(self.level()?.is_high())
    }

    fn is_low(&mut self) -> Result<bool, GpioError> {
        Ok(self.level()?.is_low())
    }
}
