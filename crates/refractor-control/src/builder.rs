//! Builder 模式实现
//!
//! 链式组装命令队列、镜盖硬件与外部协作者，得到 [`ActionDispatcher`]。

use std::sync::Arc;

use refractor_driver::{
    CommandObserver, CommandQueue, DriverError, SharedReporter, TracingReporter,
};
use refractor_gpio::MockGpio;
use tracing::info;

use crate::camera::{Camera, ImageStacker};
use crate::centroid::{CentroidSolver, OffsetLink};
use crate::config::RefractorConfig;
use crate::dispatcher::{ActionDispatcher, Collaborators};
use crate::hardware::CoverHardware;
use crate::viewer::Viewer;

/// Refractor Builder（链式构造）
///
/// 未指定的协作者按配置使用外部程序实现；未指定报告通道时
/// 使用 [`TracingReporter`]。
///
/// # Example
///
/// ```
/// use refractor_control::{RefractorBuilder, RefractorConfig};
/// use refractor_gpio::{Level, MockGpio};
///
/// let gpio = MockGpio::new();
/// gpio.set_input(19, Level::Low);
///
/// let dispatcher = RefractorBuilder::new(RefractorConfig::default())
///     .mock_gpio(gpio)
///     .build()
///     .unwrap();
///
/// dispatcher.request_home().unwrap();
/// dispatcher.flush(std::time::Duration::from_secs(5)).unwrap();
/// assert_eq!(dispatcher.status().motor.step_count, 0);
/// ```
pub struct RefractorBuilder {
    config: RefractorConfig,
    reporter: Option<SharedReporter>,
    mock_gpio: Option<MockGpio>,
    observers: Vec<Arc<dyn CommandObserver>>,
    camera: Option<Arc<dyn Camera>>,
    stacker: Option<Arc<dyn ImageStacker>>,
    viewer: Option<Arc<dyn Viewer>>,
    centroid: Option<Arc<dyn CentroidSolver>>,
    offset_link: Option<Arc<dyn OffsetLink>>,
}

impl RefractorBuilder {
    pub fn new(config: RefractorConfig) -> Self {
        Self {
            config,
            reporter: None,
            mock_gpio: None,
            observers: Vec::new(),
            camera: None,
            stacker: None,
            viewer: None,
            centroid: None,
            offset_link: None,
        }
    }

    /// 设置报告通道
    pub fn reporter(mut self, reporter: SharedReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// 使用给定的模拟 GPIO（覆盖配置中的后端）
    ///
    /// 调用方保留克隆即可驱动开关输入并观察线电平。
    pub fn mock_gpio(mut self, gpio: MockGpio) -> Self {
        self.mock_gpio = Some(gpio);
        self
    }

    /// 在工作线程启动后、第一条命令之前注册观察者
    pub fn observer(mut self, observer: Arc<dyn CommandObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn camera(mut self, camera: Arc<dyn Camera>) -> Self {
        self.camera = Some(camera);
        self
    }

    pub fn stacker(mut self, stacker: Arc<dyn ImageStacker>) -> Self {
        self.stacker = Some(stacker);
        self
    }

    pub fn viewer(mut self, viewer: Arc<dyn Viewer>) -> Self {
        self.viewer = Some(viewer);
        self
    }

    pub fn centroid(mut self, centroid: Arc<dyn CentroidSolver>) -> Self {
        self.centroid = Some(centroid);
        self
    }

    pub fn offset_link(mut self, link: Arc<dyn OffsetLink>) -> Self {
        self.offset_link = Some(link);
        self
    }

    /// 启动工作线程并占用硬件
    ///
    /// 电机与队列共享同一个取消标志，`cancel_current` 可以中断
    /// 正在进行的扫动或回零。
    ///
    /// # Errors
    /// - `DriverError::Spawn`: 工作线程创建失败
    /// - `DriverError::Gpio`: 线占用或初始化失败
    pub fn build(self) -> Result<ActionDispatcher, DriverError> {
        let reporter = self
            .reporter
            .unwrap_or_else(|| Arc::new(TracingReporter) as SharedReporter);

        let queue = Arc::new(CommandQueue::with_config(
            reporter.clone(),
            self.config.queue.clone(),
        )?);
        for observer in self.observers {
            queue.add_observer(observer);
        }

        let cancel = queue.cancel_token();
        let hardware = match &self.mock_gpio {
            Some(gpio) => CoverHardware::mock(gpio, &self.config, cancel)?,
            None => CoverHardware::from_config(&self.config, cancel)?,
        };

        let defaults = Collaborators::from_config(&self.config);
        let collaborators = Collaborators {
            camera: self.camera.unwrap_or(defaults.camera),
            stacker: self.stacker.unwrap_or(defaults.stacker),
            viewer: self.viewer.unwrap_or(defaults.viewer),
            centroid: self.centroid.unwrap_or(defaults.centroid),
            offset_link: self.offset_link.or(defaults.offset_link),
        };

        info!(
            "Refractor controller ready (working dir {})",
            self.config.paths.working_dir.display()
        );
        Ok(ActionDispatcher::new(
            queue,
            hardware,
            collaborators,
            &self.config.paths,
            self.config.guide,
            reporter,
        ))
    }
}
