//! Shell 模式（交互式）
//!
//! 专用输入线程持有 rustyline 编辑器（保留历史记录），解析后的命令经
//! crossbeam channel 交给主线程；工作线程的报告经 `ChannelReporter`
//! 回到主线程打印。需要确认的命令在输入线程内完成确认。
//!
//! 会话开始时镜盖回零，退出（包括 Ctrl+D）前总是关盖回零。
//! Ctrl+D 与 `exit` 一样需要确认；输入流已经关闭、无法再回答时直接退出。

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use crossbeam_channel::{Receiver, Sender, bounded, select};
use refractor_control::{ActionDispatcher, DispatchError, RefractorBuilder, RefractorConfig};
use refractor_driver::{ChannelReporter, DriverError};
use rustyline::Editor;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use tracing::warn;

use crate::utils::{is_yes, print_report, print_status};

const PROMPT: &str = "refractor> ";
const POLL: Duration = Duration::from_millis(200);

/// Shell 命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellCommand {
    Open,
    Close,
    Home,
    Park,
    Expose { count: u32, seconds: u32 },
    View,
    Centroid,
    Switch,
    Status,
    Cancel,
    Help,
    Exit,
}

impl ShellCommand {
    /// 需要操作员确认的命令返回确认问题
    pub fn confirmation(&self) -> Option<&'static str> {
        match self {
            ShellCommand::Centroid => Some("已在查看器中用方框框选导星星像了吗？"),
            ShellCommand::Exit => Some("退出前将关盖并回零，确定退出吗？"),
            _ => None,
        }
    }
}

/// 解析一行输入
///
/// `expose [count] [seconds]` 缺省为 1 次、5 秒；数值范围由分发器校验。
pub fn parse_command(line: &str) -> Result<ShellCommand, String> {
    let mut parts = line.split_whitespace();
    let Some(name) = parts.next() else {
        return Err("空命令".to_string());
    };

    let command = match name {
        "open" => ShellCommand::Open,
        "close" => ShellCommand::Close,
        "home" => ShellCommand::Home,
        "park" => ShellCommand::Park,
        "view" => ShellCommand::View,
        "centroid" => ShellCommand::Centroid,
        "switch" => ShellCommand::Switch,
        "status" => ShellCommand::Status,
        "cancel" | "stop" => ShellCommand::Cancel,
        "help" | "?" => ShellCommand::Help,
        "exit" | "quit" => ShellCommand::Exit,
        "expose" => {
            let count = match parts.next() {
                Some(arg) => arg.parse().map_err(|_| format!("无效的曝光次数: {}", arg))?,
                None => 1,
            };
            let seconds = match parts.next() {
                Some(arg) => arg.parse().map_err(|_| format!("无效的曝光时间: {}", arg))?,
                None => 5,
            };
            ShellCommand::Expose { count, seconds }
        },
        other => return Err(format!("未知命令: {}", other)),
    };

    if let Some(extra) = parts.next() {
        return Err(format!("多余的参数: {}", extra));
    }
    Ok(command)
}

/// 输入线程发给主线程的事件
#[derive(Debug, PartialEq)]
enum InputEvent {
    Command(ShellCommand),
    Invalid(String),
    /// Ctrl+C
    Interrupt,
    /// 已确认的 Ctrl+D，或输入失败
    Closed,
}

fn history_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|dir| dir.join("refractor").join("shell_history"))
}

/// 在专用线程内创建编辑器，生命周期等于 Shell 会话
fn spawn_input() -> Receiver<InputEvent> {
    let (tx, rx) = bounded::<InputEvent>(10);
    thread::spawn(move || read_loop(&tx));
    rx
}

fn read_loop(tx: &Sender<InputEvent>) {
    let mut rl = match Editor::<(), DefaultHistory>::new() {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("❌ 初始化行编辑器失败: {}", e);
            let _ = tx.send(InputEvent::Closed);
            return;
        },
    };
    let history = history_path();
    if let Some(path) = &history {
        let _ = rl.load_history(path);
    }

    loop {
        let event = match rl.readline(PROMPT) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line);

                match parse_command(line) {
                    Ok(command) => {
                        if let Some(question) = command.confirmation()
                            && confirm(&mut rl, question) != Some(true)
                        {
                            println!("❌ 操作已取消");
                            continue;
                        }
                        InputEvent::Command(command)
                    },
                    Err(message) => InputEvent::Invalid(message),
                }
            },
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                InputEvent::Interrupt
            },
            Err(ReadlineError::Eof) => {
                let question = ShellCommand::Exit.confirmation().unwrap_or_default();
                match eof_event(confirm(&mut rl, question)) {
                    Some(event) => event,
                    None => {
                        println!("❌ 操作已取消");
                        continue;
                    },
                }
            },
            Err(e) => {
                eprintln!("❌ 读取输入失败: {}", e);
                InputEvent::Closed
            },
        };

        let last = matches!(
            event,
            InputEvent::Closed | InputEvent::Command(ShellCommand::Exit)
        );
        if tx.send(event).is_err() || last {
            break;
        }
    }

    if let Some(path) = &history {
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        let _ = rl.save_history(path);
    }
}

/// 读取一次确认；Ctrl+C 视为否，输入流关闭或读取失败时返回 `None`
fn confirm(rl: &mut Editor<(), DefaultHistory>, question: &str) -> Option<bool> {
    match rl.readline(&format!("{} [y/N] ", question)) {
        Ok(answer) => Some(is_yes(&answer)),
        Err(ReadlineError::Interrupted) => Some(false),
        Err(_) => None,
    }
}

/// Ctrl+D 之后的退出确认结果；`None` 表示继续读取命令
fn eof_event(answer: Option<bool>) -> Option<InputEvent> {
    match answer {
        Some(false) => None,
        Some(true) | None => Some(InputEvent::Closed),
    }
}

/// 运行 Shell 模式
pub fn run_shell(config: RefractorConfig) -> Result<()> {
    let (reporter, reports) = ChannelReporter::new();
    let dispatcher = RefractorBuilder::new(config)
        .reporter(Arc::new(reporter))
        .build()
        .context("初始化镜盖硬件失败")?;

    // 行编辑器之外（确认提示、退出流程）的 Ctrl+C
    let token = dispatcher.cancel_token();
    ctrlc::set_handler(move || token.cancel()).context("注册 Ctrl+C 处理失败")?;

    println!("Refractor CLI v{} - 交互式 Shell", env!("CARGO_PKG_VERSION"));
    println!("输入 'help' 查看帮助，'exit' 退出");
    println!();
    println!("⏳ 镜盖回零...");
    dispatcher.request_home().context("提交回零命令失败")?;

    let events = spawn_input();
    loop {
        select! {
            recv(reports) -> line => {
                if let Ok(line) = line {
                    print_report(&line);
                }
            },
            recv(events) -> event => match event {
                Ok(InputEvent::Command(ShellCommand::Exit) | InputEvent::Closed) | Err(_) => break,
                Ok(InputEvent::Command(command)) => handle_command(&dispatcher, command),
                Ok(InputEvent::Invalid(message)) => {
                    eprintln!("❌ {}", message);
                    eprintln!("💡 提示: 输入 'help' 查看所有命令");
                },
                Ok(InputEvent::Interrupt) => {
                    eprintln!("🛑 取消当前动作");
                    dispatcher.cancel_current();
                },
            },
        }
    }

    park_and_exit(&dispatcher, &reports)
}

fn handle_command(dispatcher: &ActionDispatcher, command: ShellCommand) {
    let result = match command {
        ShellCommand::Open => dispatcher.request_open(),
        ShellCommand::Close => dispatcher.request_close(),
        ShellCommand::Home => dispatcher.request_home(),
        ShellCommand::Park => dispatcher.request_park(),
        ShellCommand::Expose { count, seconds } => dispatcher.request_expose(count, seconds),
        ShellCommand::View => dispatcher.request_viewer_refresh(),
        ShellCommand::Centroid => dispatcher.request_centroid(),
        ShellCommand::Switch => dispatcher.request_switch_probe(),
        ShellCommand::Status => {
            print_status(&dispatcher.status());
            Ok(())
        },
        ShellCommand::Cancel => {
            dispatcher.cancel_current();
            Ok(())
        },
        ShellCommand::Help => {
            print_help();
            Ok(())
        },
        ShellCommand::Exit => Ok(()),
    };

    match result {
        Ok(()) => {},
        // 拒绝原因已经通过报告通道输出
        Err(DispatchError::Rejected(_)) => {},
        Err(e) => eprintln!("❌ Error: {}", e),
    }
}

fn drain(reports: &Receiver<String>) {
    for line in reports.try_iter() {
        print_report(&line);
    }
}

/// 排队的命令执行完后关盖回零，再关闭队列
fn park_and_exit(dispatcher: &ActionDispatcher, reports: &Receiver<String>) -> Result<()> {
    println!("⏳ 关盖回零后退出...");
    let before = dispatcher.status().queue;
    dispatcher.request_park().context("提交关盖命令失败")?;

    loop {
        match dispatcher.flush(POLL) {
            Ok(()) => break,
            Err(DriverError::Timeout) => drain(reports),
            Err(e) => {
                drain(reports);
                warn!("Worker stopped before park completed: {}", e);
                bail!("命令队列已停止，镜盖未能回零，请检查硬件");
            },
        }
    }
    drain(reports);

    let after = dispatcher.status().queue;
    let timeout = dispatcher.queue().config().shutdown_timeout();
    dispatcher.queue().shutdown(timeout).context("关闭命令队列失败")?;

    if after.unsuccessful() > before.unsuccessful() {
        bail!("退出前有命令未成功完成，请确认镜盖状态");
    }
    println!("👋 再见！");
    Ok(())
}

/// 打印帮助信息
fn print_help() {
    println!("可用命令:");
    println!("  open                          开盖");
    println!("  close                         关盖");
    println!("  home                          回零（运行到限位开关）");
    println!("  park                          关盖回零");
    println!("  expose [次数] [秒]            曝光（默认 1 次 5 秒，多次时叠加）");
    println!("  view                          在查看器中显示最近一次曝光");
    println!("  centroid                      测量质心并计算导星偏移");
    println!("  switch                        读取一次限位开关");
    println!("  status                        显示状态");
    println!("  cancel                        取消当前动作");
    println!("  help                          显示帮助");
    println!("  exit / quit                   关盖回零并退出");
    println!();
    println!("快捷键:");
    println!("  Ctrl+C                        取消当前动作");
    println!("  Ctrl+D                        关盖回零并退出（需确认）");
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eof_asks_before_exit() {
        assert_eq!(eof_event(Some(true)), Some(InputEvent::Closed));
        assert_eq!(eof_event(Some(false)), None);
        // 输入流已关闭，无法再确认
        assert_eq!(eof_event(None), Some(InputEvent::Closed));
        assert!(ShellCommand::Exit.confirmation().is_some());
    }

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(parse_command("open"), Ok(ShellCommand::Open));
        assert_eq!(parse_command("  close  "), Ok(ShellCommand::Close));
        assert_eq!(parse_command("stop"), Ok(ShellCommand::Cancel));
        assert_eq!(parse_command("quit"), Ok(ShellCommand::Exit));
    }

    #[test]
    fn test_parse_expose_defaults() {
        assert_eq!(
            parse_command("expose"),
            Ok(ShellCommand::Expose {
                count: 1,
                seconds: 5
            })
        );
        assert_eq!(
            parse_command("expose 3"),
            Ok(ShellCommand::Expose {
                count: 3,
                seconds: 5
            })
        );
        assert_eq!(
            parse_command("expose 3 20"),
            Ok(ShellCommand::Expose {
                count: 3,
                seconds: 20
            })
        );
    }

    #[test]
    fn test_parse_expose_zero_is_left_to_dispatcher() {
        assert_eq!(
            parse_command("expose 0"),
            Ok(ShellCommand::Expose {
                count: 0,
                seconds: 5
            })
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_command("").is_err());
        assert!(parse_command("expose -1").unwrap_err().contains("曝光次数"));
        assert!(parse_command("expose 2 fast").unwrap_err().contains("曝光时间"));
        assert!(parse_command("open now").unwrap_err().contains("now"));
        assert!(parse_command("enable").unwrap_err().contains("enable"));
    }

    #[test]
    fn test_confirmations() {
        assert!(ShellCommand::Centroid.confirmation().is_some());
        assert!(ShellCommand::Exit.confirmation().is_some());
        assert!(ShellCommand::Open.confirmation().is_none());
        assert!(ShellCommand::Park.confirmation().is_none());
    }
}
