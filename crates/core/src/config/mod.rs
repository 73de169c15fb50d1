mod models;

pub use models::{
    AppConfig, BundlerConfig, DiscoveryConfig, LoggingConfig, NetworkConfig, QueueConfig,
};

use std::path::Path;

use crate::errors::{GridError, GridResult};

impl AppConfig {
    /// 加载应用配置
    ///
    /// 配置来源按优先级从低到高：内置默认值、TOML 配置文件（可选）、
    /// `TASKGRID_` 前缀的环境变量（如 `TASKGRID_NETWORK__NODE_PORT=12000`）。
    pub fn load(config_path: Option<&Path>) -> GridResult<Self> {
        let defaults = config::Config::try_from(&AppConfig::default())
            .map_err(|e| GridError::Configuration(format!("构建默认配置失败: {}", e)))?;

        let mut builder = config::Config::builder().add_source(defaults);

        if let Some(path) = config_path {
            let path_str = path.to_string_lossy();
            builder = builder.add_source(config::File::with_name(&path_str));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("TASKGRID")
                .separator("__")
                .try_parsing(true),
        );

        let app_config: AppConfig = builder
            .build()
            .map_err(|e| GridError::Configuration(format!("加载配置失败: {}", e)))?
            .try_deserialize()
            .map_err(|e| GridError::Configuration(format!("解析配置失败: {}", e)))?;

        app_config.validate()?;
        Ok(app_config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = AppConfig::load(None).unwrap();
        assert_eq!(config.network.node_port, crate::constants::DEFAULT_NODE_PORT);
        assert_eq!(config.bundler.algorithm, "fixed");
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[network]
node_port = 22222

[bundler]
algorithm = "autotuned"

[bundler.profile]
size = "8"
"#
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.network.node_port, 22222);
        assert_eq!(config.bundler.algorithm, "autotuned");
        assert_eq!(config.bundler.profile.get("size").map(String::as_str), Some("8"));
        // 未覆盖的段保持默认值
        assert_eq!(config.network.class_port, crate::constants::DEFAULT_CLASS_PORT);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = AppConfig::default();
        config.queue.max_bundle_size = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.discovery.broadcast_interval_ms = 0;
        assert!(config.validate().is_err());
    }
}
