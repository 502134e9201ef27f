//! 配置管理命令
//!
//! 配置文件为 TOML，默认位于 `<config_dir>/refractor/config.toml`。

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Subcommand;
use refractor_control::{Backend, RefractorConfig};
use tracing::{debug, info};

/// 默认配置文件路径
pub fn default_config_path() -> Result<PathBuf> {
    let mut path = dirs::config_dir().ok_or_else(|| anyhow::anyhow!("无法确定配置目录"))?;
    path.push("refractor");
    path.push("config.toml");
    Ok(path)
}

fn resolve(path: Option<&Path>) -> Result<PathBuf> {
    match path {
        Some(path) => Ok(path.to_path_buf()),
        None => default_config_path(),
    }
}

/// 读取配置
///
/// 显式指定的文件必须存在；默认位置的文件不存在时使用默认配置。
pub fn load(path: Option<&Path>, backend: Option<Backend>) -> Result<RefractorConfig> {
    let mut config = match path {
        Some(path) => RefractorConfig::load(path)
            .with_context(|| format!("读取配置文件失败: {}", path.display()))?,
        None => {
            let path = default_config_path()?;
            debug!("Loading config from {}", path.display());
            RefractorConfig::load_or_default(&path)
                .with_context(|| format!("读取配置文件失败: {}", path.display()))?
        },
    };

    if let Some(backend) = backend {
        info!("GPIO backend overridden to {:?}", backend);
        config.gpio.backend = backend;
    }
    Ok(config)
}

/// 配置命令
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// 显示生效的配置（TOML）
    Show,

    /// 写入默认配置文件
    Init {
        /// 覆盖已存在的文件
        #[arg(short, long)]
        force: bool,
    },

    /// 显示配置文件路径
    Path,
}

impl ConfigCommand {
    pub fn execute(self, path: Option<&Path>) -> Result<()> {
        match self {
            ConfigCommand::Show => Self::show_(path),
            ConfigCommand::Init { force } => Self::init_(path, force),
            ConfigCommand::Path => Self::path_(path),
        }
    }

    fn show_(path: Option<&Path>) -> Result<()> {
        let config = load(path, None)?;
        print!("{}", config.to_toml_string()?);
        Ok(())
    }

    fn init_(path: Option<&Path>, force: bool) -> Result<()> {
        let path = resolve(path)?;

        if path.exists() && !force {
            let overwrite = inquire::Confirm::new(&format!("{} 已存在，覆盖吗？", path.display()))
                .with_default(false)
                .prompt()
                .map_err(|e| anyhow::anyhow!("用户交互失败: {}", e))?;
            if !overwrite {
                println!("❌ 操作已取消");
                return Ok(());
            }
        }

        RefractorConfig::default()
            .save(&path)
            .with_context(|| format!("写入配置文件失败: {}", path.display()))?;
        println!("✅ 已写入默认配置: {}", path.display());
        Ok(())
    }

    fn path_(path: Option<&Path>) -> Result<()> {
        let path = resolve(path)?;
        let marker = if path.exists() { "" } else { " (不存在，使用默认配置)" };
        println!("{}{}", path.display(), marker);
        Ok(())
    }
}
