//! 协作式取消标志
//!
//! 长时间运行的操作（扫动、回零、曝光）在每个脉冲或轮询间隔检查一次。
//! 工作线程在每条命令开始前复位标志，因此取消只作用于当前命令。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::DriverError;

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// 请求取消当前操作
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// 清除取消请求
    pub fn reset(&self) {
        self.flag.store(false, Ordering::Release);
    }

    /// 已取消时返回 `DriverError::Cancelled`
    pub fn check(&self) -> Result<(), DriverError> {
        if self.is_cancelled() {
            Err(DriverError::Cancelled)
        } else {
            Ok(())
        }
    }
}
