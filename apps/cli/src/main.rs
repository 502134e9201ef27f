//! # Refractor CLI
//!
//! 折射镜镜盖控制器的命令行工具。
//!
//! ## 双模式架构
//!
//! ### One-shot 模式（适合脚本）
//!
//! ```bash
//! # 生成默认配置
//! refractor-cli config init
//!
//! # 执行单个动作（内部：占用硬件 -> 执行 -> 等待完成 -> 释放）
//! refractor-cli open
//! refractor-cli expose -n 3 -s 10
//! ```
//!
//! ### Shell 模式（观测时使用）
//!
//! ```bash
//! $ refractor-cli shell
//! refractor> open
//! refractor> expose 1 5
//! refractor> centroid
//! refractor> exit
//! ```
//!
//! Shell 启动时先回零，退出前总是关盖回零。

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use refractor_control::Backend;
use tracing_subscriber::EnvFilter;

mod commands;
mod modes;
mod utils;

use commands::ConfigCommand;
use modes::oneshot::{OneShotMode, Request};
use modes::shell::run_shell;

/// Refractor CLI - 镜盖控制命令行工具
#[derive(Parser, Debug)]
#[command(name = "refractor-cli")]
#[command(about = "Command-line interface for the refractor cover controller", long_about = None)]
#[command(version)]
struct Cli {
    /// 配置文件路径（默认 <config_dir>/refractor/config.toml）
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// 覆盖配置中的 GPIO 后端
    #[arg(long, global = true, value_enum)]
    backend: Option<BackendArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum BackendArg {
    Sysfs,
    Mock,
}

impl From<BackendArg> for Backend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Sysfs => Backend::Sysfs,
            BackendArg::Mock => Backend::Mock,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 配置管理
    #[command(subcommand)]
    Config(ConfigCommand),

    /// 开盖
    Open,

    /// 关盖
    Close,

    /// 回零（反向运行直到限位开关触发）
    Home,

    /// 曝光并在查看器中显示
    Expose {
        /// 曝光次数（大于 1 时叠加）
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,

        /// 单次曝光时间（秒）
        #[arg(short, long, default_value_t = 5)]
        seconds: u32,
    },

    /// 在查看器中重新显示最近一次曝光
    View,

    /// 测量质心并计算导星偏移
    Centroid {
        /// 跳过"已框选星像"确认
        #[arg(short, long)]
        yes: bool,
    },

    /// 显示电机与队列状态
    Status,

    /// 读取一次限位开关
    Switch,

    /// 启动交互式 Shell
    Shell,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("refractor_cli=info,refractor_control=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let load = || commands::config::load(cli.config.as_deref(), cli.backend.map(Into::into));

    let request = match cli.command {
        Commands::Config(cmd) => return cmd.execute(cli.config.as_deref()),
        Commands::Shell => return run_shell(load()?),
        Commands::Open => Request::Open,
        Commands::Close => Request::Close,
        Commands::Home => Request::Home,
        Commands::Expose { count, seconds } => Request::Expose { count, seconds },
        Commands::View => Request::View,
        Commands::Centroid { yes } => Request::Centroid { confirmed: yes },
        Commands::Status => Request::Status,
        Commands::Switch => Request::Switch,
    };

    OneShotMode::new(load()?)?.run(request)
}
