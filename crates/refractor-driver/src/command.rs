//! 命令类型定义
//!
//! 命令是一个带名字的一次性闭包，所需参数在构造时按值捕获，
//! 由队列的工作线程执行且只执行一次。

use std::borrow::Cow;
use std::fmt;

use crate::CommandError;

/// 命令执行结果
pub type CommandResult = Result<(), CommandError>;

type Action = Box<dyn FnOnce() -> CommandResult + Send + 'static>;

/// 排队执行的工作单元
pub struct Command {
    name: Cow<'static, str>,
    action: Action,
}

impl Command {
    /// 创建命令
    ///
    /// # 示例
    ///
    /// ```
    /// use refractor_driver::Command;
    ///
    /// let seconds = 5;
    /// let cmd = Command::new(format!("expose {seconds}s"), move || {
    ///     assert_eq!(seconds, 5);
    ///     Ok(())
    /// });
    /// assert_eq!(cmd.name(), "expose 5s");
    /// assert!(cmd.execute().is_ok());
    /// ```
    pub fn new<F>(name: impl Into<Cow<'static, str>>, action: F) -> Self
    where
        F: FnOnce() -> CommandResult + Send + 'static,
    {
        Self {
            name: name.into(),
            action: Box::new(action),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 执行命令（消耗自身）
    pub fn execute(self) -> CommandResult {
        (self.action)()
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command").field("name", &self.name).finish_non_exhaustive()
    }
}
