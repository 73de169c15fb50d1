use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;
use crate::errors::{GridError, GridResult};

/// 初始化全局日志订阅器
///
/// 日志级别优先取 `RUST_LOG` 环境变量，否则使用配置中的级别。
/// `json` 为 true 时输出结构化 JSON 日志，适用于日志采集场景。
pub fn init_logging(config: &LoggingConfig) -> GridResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| GridError::Configuration(format!("无效的日志级别 '{}': {}", config.level, e)))?;

    let builder = fmt().with_env_filter(filter).with_target(true);

    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    // 测试中可能重复初始化，忽略已安装订阅器的错误
    if let Err(e) = result {
        tracing::debug!("日志订阅器已存在，跳过初始化: {}", e);
    }

    Ok(())
}
