//! # Refractor Tools
//!
//! 不依赖硬件的辅助逻辑：
//!
//! - [`images`]: 曝光图像的命名约定与工作目录管理
//! - [`guide`]: 由质心计算导星偏移指令

pub mod guide;
pub mod images;

pub use guide::{AxisDirection, AxisOffset, GuideConfig, GuideOffset};
pub use images::ImageStore;
