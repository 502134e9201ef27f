//! 运行模式
//!
//! - One-shot 模式：每次命令独立占用硬件
//! - Shell 模式：交互式会话，开始时回零，退出前关盖回零

pub mod oneshot;
pub mod shell;
