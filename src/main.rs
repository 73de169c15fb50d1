use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use taskgrid::Application;
use taskgrid_core::{logging::init_logging, AppConfig};

/// 分布式作业执行网格驱动器
#[derive(Parser)]
#[command(name = "taskgrid", version, about)]
struct Cli {
    /// 配置文件路径（TOML）
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 覆盖配置中的日志级别
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref()).context("加载配置失败")?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    init_logging(&config.logging)?;

    let app = Application::start(config).await?;

    tokio::signal::ctrl_c()
        .await
        .context("等待中断信号失败")?;
    info!("收到中断信号，开始关闭");
    app.stop().await;
    Ok(())
}
