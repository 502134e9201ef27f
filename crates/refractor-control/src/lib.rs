//! # Refractor Control
//!
//! 折射镜镜盖控制器的应用层：把操作员请求转换为命令并交给
//! [`refractor_driver::CommandQueue`] 串行执行。
//!
//! ## 模块
//!
//! - [`dispatcher`]: 动作分发器与各动作的执行逻辑
//! - [`builder`]: 组装队列、硬件与协作者
//! - [`hardware`]: 电机与限位开关的后端选择
//! - [`config`]: TOML 配置文件
//! - [`camera`] / [`viewer`] / [`centroid`]: 外部协作者接口及其进程实现
//! - [`process`]: 外部程序调用（可取消）
//!
//! 外部协作者都是 trait，测试与其他部署可以替换为自己的实现。

pub mod builder;
pub mod camera;
pub mod centroid;
pub mod config;
pub mod dispatcher;
pub mod hardware;
pub mod process;
pub mod viewer;

pub use builder::RefractorBuilder;
pub use camera::{Camera, ImageStacker, ProcessCamera, ProcessStacker};
pub use centroid::{CentroidSolver, OffsetLink, ProcessCentroid, ProcessOffsetLink, parse_centroid};
pub use config::{Backend, ConfigError, GpioConfig, PathConfig, RefractorConfig};
pub use dispatcher::{ActionDispatcher, Collaborators, CoverStatus, DispatchError};
pub use hardware::CoverHardware;
pub use process::ToolCommand;
pub use viewer::{Viewer, ViewerConfig, XpaViewer};
