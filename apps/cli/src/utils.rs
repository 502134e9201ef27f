//! 终端输出工具

use refractor_control::CoverStatus;
use refractor_driver::{MotorPhase, Reporter, WorkerStatus};

/// 把报告行打印到终端
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleReporter;

impl Reporter for ConsoleReporter {
    fn report(&self, line: &str) {
        print_report(line);
    }
}

/// 错误行打印到 stderr，其余打印到 stdout
pub fn print_report(line: &str) {
    if line.starts_with("ERROR") || line.starts_with("FATAL") {
        eprintln!("❌ {}", line);
    } else if line.ends_with("cancelled") {
        eprintln!("🛑 {}", line);
    } else {
        println!("📡 {}", line);
    }
}

/// 回答是否为肯定
pub fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes" | "是")
}

pub fn print_status(status: &CoverStatus) {
    let motor = &status.motor;
    let phase = match motor.phase {
        MotorPhase::Idle => "空闲".to_string(),
        MotorPhase::Driving(direction) => format!("运行中 ({})", direction),
        MotorPhase::Homing => "回零中".to_string(),
    };
    let worker = match &status.worker {
        WorkerStatus::Running => "运行中".to_string(),
        WorkerStatus::Stopped { reason } => format!("已停止: {}", reason),
    };

    println!("📊 镜盖状态:");
    println!("  电机: {}，驱动器{}", phase, if motor.enabled { "已使能" } else { "未使能" });
    println!("  方向: {}", motor.direction);
    println!("  里程计: {} 步", motor.step_count);
    println!("  工作线程: {}", worker);
    println!(
        "  队列: 排队 {}，完成 {}，失败 {}，取消 {}",
        status.pending, status.queue.completed, status.queue.failed, status.queue.cancelled
    );
    match &status.last_image {
        Some(image) => println!("  最近曝光: {}", image.display()),
        None => println!("  最近曝光: (无)"),
    }
}
