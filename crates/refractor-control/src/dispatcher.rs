//! 动作分发器
//!
//! 交互侧的唯一入口：每个请求在提交时按值捕获参数，构造一条命令
//! 放入 [`CommandQueue`]，立即返回。动作本身全部在工作线程上执行，
//! 分发器从不直接接触硬件。
//!
//! [`ActionDispatcher::status`] 读取无锁快照，不经过队列。

use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use refractor_driver::{
    CancelToken, Command, CommandError, CommandQueue, CommandResult, DriverError, MotorState,
    MotorStateHandle, QueueSnapshot, SharedReporter, WorkerStatus,
};
use refractor_tools::{GuideConfig, GuideOffset, ImageStore};
use thiserror::Error;
use tracing::{debug, info};

use crate::camera::{Camera, ImageStacker, ProcessCamera, ProcessStacker};
use crate::centroid::{CentroidSolver, OffsetLink, ProcessCentroid, ProcessOffsetLink};
use crate::config::{PathConfig, RefractorConfig};
use crate::hardware::CoverHardware;
use crate::viewer::{Viewer, XpaViewer};

/// 请求被拒绝或无法入队
#[derive(Error, Debug)]
pub enum DispatchError {
    /// 参数校验失败，未入队
    #[error("{0}")]
    Rejected(String),

    /// 队列不可用
    #[error(transparent)]
    Queue(#[from] DriverError),
}

/// 外部协作者集合
#[derive(Clone)]
pub struct Collaborators {
    pub camera: Arc<dyn Camera>,
    pub stacker: Arc<dyn ImageStacker>,
    pub viewer: Arc<dyn Viewer>,
    pub centroid: Arc<dyn CentroidSolver>,
    pub offset_link: Option<Arc<dyn OffsetLink>>,
}

impl Collaborators {
    /// 全部使用外部程序实现
    pub fn from_config(config: &RefractorConfig) -> Self {
        Self {
            camera: Arc::new(ProcessCamera::new(config.capture.clone())),
            stacker: Arc::new(ProcessStacker::new(config.stack.clone())),
            viewer: Arc::new(XpaViewer::new(config.viewer.clone())),
            centroid: Arc::new(ProcessCentroid::new(config.centroid.clone())),
            offset_link: config
                .offset_link
                .clone()
                .map(|tool| Arc::new(ProcessOffsetLink::new(tool)) as Arc<dyn OffsetLink>),
        }
    }
}

/// 状态快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverStatus {
    pub motor: MotorState,
    pub worker: WorkerStatus,
    /// 排队中的命令数
    pub pending: usize,
    pub queue: QueueSnapshot,
    /// 最近一次曝光结果
    pub last_image: Option<PathBuf>,
}

#[derive(Debug, Default)]
struct Session {
    last_image: Option<PathBuf>,
}

/// 动作在工作线程上使用的共享上下文
struct ActionContext {
    hardware: Mutex<CoverHardware>,
    collaborators: Collaborators,
    images: ImageStore,
    region_file: PathBuf,
    guide: GuideConfig,
    session: Mutex<Session>,
    reporter: SharedReporter,
    cancel: CancelToken,
}

/// 动作分发器
#[derive(Clone)]
pub struct ActionDispatcher {
    queue: Arc<CommandQueue>,
    ctx: Arc<ActionContext>,
    motor_state: MotorStateHandle,
}

impl ActionDispatcher {
    pub fn new(
        queue: Arc<CommandQueue>,
        hardware: CoverHardware,
        collaborators: Collaborators,
        paths: &PathConfig,
        guide: GuideConfig,
        reporter: SharedReporter,
    ) -> Self {
        let motor_state = hardware.state_handle();
        let ctx = Arc::new(ActionContext {
            hardware: Mutex::new(hardware),
            collaborators,
            images: ImageStore::new(&paths.working_dir),
            region_file: paths.region_path(),
            guide,
            session: Mutex::new(Session::default()),
            reporter,
            cancel: queue.cancel_token(),
        });
        Self {
            queue,
            ctx,
            motor_state,
        }
    }

    fn submit<F>(&self, name: impl Into<Cow<'static, str>>, action: F) -> Result<(), DispatchError>
    where
        F: FnOnce(&ActionContext) -> CommandResult + Send + 'static,
    {
        let ctx = self.ctx.clone();
        self.queue.submit(Command::new(name, move || action(&ctx)))?;
        Ok(())
    }

    fn reject(&self, message: String) -> Result<(), DispatchError> {
        self.ctx.reporter.report(&format!("ERROR: {message}"));
        Err(DispatchError::Rejected(message))
    }

    /// 开盖
    pub fn request_open(&self) -> Result<(), DispatchError> {
        self.submit("open", ActionContext::open)
    }

    /// 关盖
    pub fn request_close(&self) -> Result<(), DispatchError> {
        self.submit("close", ActionContext::close)
    }

    /// 回零
    pub fn request_home(&self) -> Result<(), DispatchError> {
        self.submit("home", ActionContext::home)
    }

    /// 退出前的关盖回零
    pub fn request_park(&self) -> Result<(), DispatchError> {
        self.submit("park", ActionContext::park)
    }

    /// 读取一次限位开关
    pub fn request_switch_probe(&self) -> Result<(), DispatchError> {
        self.submit("switch", ActionContext::probe_switch)
    }

    /// 曝光 `count` 帧，每帧 `seconds` 秒
    ///
    /// # 错误
    /// - `DispatchError::Rejected`: `count` 或 `seconds` 为 0（不入队）
    pub fn request_expose(&self, count: u32, seconds: u32) -> Result<(), DispatchError> {
        if count == 0 {
            return self.reject("Exposure count must be at least 1".to_string());
        }
        if seconds == 0 {
            return self.reject("Exposure time must be at least 1 second".to_string());
        }
        self.submit(format!("expose {count}x{seconds}s"), move |ctx| {
            ctx.expose(count, seconds)
        })
    }

    /// 在查看器中重新显示最近一次曝光
    pub fn request_viewer_refresh(&self) -> Result<(), DispatchError> {
        self.submit("view", ActionContext::refresh_viewer)
    }

    /// 测量质心并计算导星偏移
    pub fn request_centroid(&self) -> Result<(), DispatchError> {
        self.submit("centroid", ActionContext::centroid)
    }

    /// 状态快照（不经过队列，不接触硬件）
    pub fn status(&self) -> CoverStatus {
        CoverStatus {
            motor: self.motor_state.load(),
            worker: self.queue.status(),
            pending: self.queue.pending(),
            queue: self.queue.metrics(),
            last_image: self.ctx.last_image(),
        }
    }

    /// 取消正在执行的命令
    pub fn cancel_current(&self) {
        self.queue.cancel_current();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.queue.cancel_token()
    }

    /// 等待此前提交的命令全部执行完
    pub fn flush(&self, timeout: Duration) -> Result<(), DriverError> {
        self.queue.flush(timeout)
    }

    pub fn queue(&self) -> &Arc<CommandQueue> {
        &self.queue
    }
}

impl ActionContext {
    fn report(&self, line: impl AsRef<str>) {
        self.reporter.report(line.as_ref());
    }

    /// 本会话最近一次曝光；尚未曝光时沿用工作目录中已有的结果
    ///
    /// 只返回仍然存在的文件。
    fn last_image(&self) -> Option<PathBuf> {
        let session = self.session.lock().last_image.clone();
        session
            .filter(|image| image.is_file())
            .or_else(|| self.images.latest())
    }

    fn open(&self) -> CommandResult {
        self.report("Opening cover...");
        let position = self.hardware.lock().open()?;
        self.report(format!("Cover open (odometer {position})"));
        Ok(())
    }

    fn close(&self) -> CommandResult {
        self.report("Closing cover...");
        let position = self.hardware.lock().close()?;
        self.report(format!("Cover closed (odometer {position})"));
        Ok(())
    }

    fn home(&self) -> CommandResult {
        self.report("Sending cover home...");
        let steps = self.hardware.lock().home()?;
        self.report(format!("Cover at home after {steps} steps"));
        Ok(())
    }

    /// 以限位开关为终点关盖：盖板在任何位置都会停在到位处
    fn park(&self) -> CommandResult {
        self.report("Parking cover...");
        let steps = self.hardware.lock().home()?;
        info!("Cover parked after {} steps", steps);
        self.report("Cover parked");
        Ok(())
    }

    fn probe_switch(&self) -> CommandResult {
        let home = self.hardware.lock().probe_switch()?;
        self.report(if home {
            "Home switch: engaged"
        } else {
            "Home switch: not engaged"
        });
        Ok(())
    }

    fn expose(&self, count: u32, seconds: u32) -> CommandResult {
        let removed = self
            .images
            .clear()
            .map_err(|e| CommandError::external("image store", e.to_string()))?;
        self.session.lock().last_image = None;
        debug!("Removed {} old images", removed);

        for i in 1..=count {
            self.report(format!("Taking exposure {i} of {count} ({seconds} s)..."));
            self.collaborators
                .camera
                .capture(seconds, self.images.dir(), &self.cancel)?;

            if count > 1 {
                self.images.claim_frame(i).map_err(|e| {
                    CommandError::external("capture", format!("no image produced: {e}"))
                })?;
            }
            self.report(format!("Exposure {i} of {count} complete"));
        }

        let image = if count > 1 {
            let frames = self
                .images
                .frames()
                .map_err(|e| CommandError::external("image store", e.to_string()))?;
            if frames.len() != count as usize {
                return Err(CommandError::external(
                    "capture",
                    format!("expected {count} frames, found {}", frames.len()),
                ));
            }
            let stacked = self.images.stacked_output();
            self.collaborators
                .stacker
                .stack(&frames, &stacked, self.images.dir(), &self.cancel)?;
            self.report(format!("Stacked {count} exposures into {}", stacked.display()));
            stacked
        } else {
            let single = self.images.capture_output();
            if !single.is_file() {
                return Err(CommandError::external(
                    "capture",
                    format!("no image produced at {}", single.display()),
                ));
            }
            single
        };

        self.session.lock().last_image = Some(image.clone());
        self.show(&image)
    }

    fn show(&self, image: &Path) -> CommandResult {
        let viewer = &self.collaborators.viewer;
        viewer.ensure_running()?;
        viewer.display(image)?;
        self.report(format!("Displaying {}", image.display()));
        Ok(())
    }

    fn refresh_viewer(&self) -> CommandResult {
        self.collaborators.viewer.ensure_running()?;
        match self.last_image() {
            Some(image) => self.show(&image),
            None => Err(CommandError::user(
                "Viewer is open but there is no exposure to display; take an exposure first",
            )),
        }
    }

    fn centroid(&self) -> CommandResult {
        let image = self.last_image().ok_or_else(|| {
            CommandError::user("No exposure found; take an exposure with the guide camera first")
        })?;

        let viewer = &self.collaborators.viewer;
        viewer.ensure_running()?;
        viewer.mark_point(self.guide.fiber_x, self.guide.fiber_y)?;
        viewer.save_regions(&self.region_file)?;

        let (x, y) = self.collaborators.centroid.centroid(&image, &self.region_file)?;
        let offset = GuideOffset::from_centroid(x, y, &self.guide);
        self.report(format!("Star centroid at ({x:.2}, {y:.2})"));
        self.report(format!("Guide offset: {}", offset.command()));

        if let Some(link) = &self.collaborators.offset_link {
            link.send(&offset)?;
            self.report("Guide offset sent");
        }
        Ok(())
    }
}
