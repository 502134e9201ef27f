//! One-shot 模式
//!
//! 每个命令独立执行：
//! 1. 读取配置
//! 2. 占用硬件，启动工作线程
//! 3. 提交一个动作并等待队列清空
//! 4. 释放硬件
//!
//! Ctrl+C 取消正在执行的动作（电机停在当前位置，外部程序被终止）。

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use refractor_control::{ActionDispatcher, DispatchError, RefractorBuilder, RefractorConfig};
use refractor_driver::DriverError;

use crate::utils::{ConsoleReporter, print_status};

const POLL: Duration = Duration::from_millis(500);

/// 单次请求
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Open,
    Close,
    Home,
    Expose { count: u32, seconds: u32 },
    View,
    /// `confirmed`: 已确认星像框选
    Centroid { confirmed: bool },
    Status,
    Switch,
}

/// One-shot 模式
pub struct OneShotMode {
    dispatcher: ActionDispatcher,
}

impl OneShotMode {
    pub fn new(config: RefractorConfig) -> Result<Self> {
        let dispatcher = RefractorBuilder::new(config)
            .reporter(Arc::new(ConsoleReporter))
            .build()
            .context("初始化镜盖硬件失败")?;

        let token = dispatcher.cancel_token();
        ctrlc::set_handler(move || {
            eprintln!("\n🛑 收到 Ctrl+C，取消当前动作...");
            token.cancel();
        })
        .context("注册 Ctrl+C 处理失败")?;

        Ok(Self { dispatcher })
    }

    pub fn run(self, request: Request) -> Result<()> {
        let before = self.dispatcher.status().queue;

        let submitted = match request {
            Request::Open => self.dispatcher.request_open(),
            Request::Close => self.dispatcher.request_close(),
            Request::Home => self.dispatcher.request_home(),
            Request::Expose { count, seconds } => self.dispatcher.request_expose(count, seconds),
            Request::View => self.dispatcher.request_viewer_refresh(),
            Request::Centroid { confirmed } => {
                if !confirmed && !confirm_region()? {
                    println!("❌ 操作已取消");
                    return Ok(());
                }
                self.dispatcher.request_centroid()
            },
            Request::Switch => self.dispatcher.request_switch_probe(),
            Request::Status => {
                print_status(&self.dispatcher.status());
                return Ok(());
            },
        };
        match submitted {
            Ok(()) => {},
            Err(DispatchError::Rejected(_)) => bail!("请求被拒绝"),
            Err(e) => return Err(e).context("提交命令失败"),
        }

        wait_idle(&self.dispatcher)?;
        let after = self.dispatcher.status().queue;
        if after.unsuccessful() > before.unsuccessful() {
            bail!("命令执行失败");
        }
        Ok(())
    }
}

/// 等待队列中的命令全部完成（曝光可能持续很久，不设上限）
fn wait_idle(dispatcher: &ActionDispatcher) -> Result<()> {
    loop {
        match dispatcher.flush(POLL) {
            Ok(()) => return Ok(()),
            Err(DriverError::Timeout) => continue,
            Err(e) => return Err(e).context("命令队列已停止"),
        }
    }
}

fn confirm_region() -> Result<bool> {
    inquire::Confirm::new("已在查看器中用方框框选导星星像了吗？")
        .with_default(false)
        .prompt()
        .map_err(|e| anyhow::anyhow!("用户交互失败: {}", e))
}
