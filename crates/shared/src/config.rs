//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::observability::ObservabilityConfig;

/// 数据库配置
///
/// `url` 为空时服务端退回内存存储，便于本地调试与测试。
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 2,
            connect_timeout_seconds: 30,
            idle_timeout_seconds: 600,
        }
    }
}

/// 投递与重试配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// 最大投递尝试次数，耗尽后记录保持 failed
    pub max_attempts: u32,
    pub initial_delay_secs: u64,
    pub max_delay_secs: u64,
    pub multiplier: f64,
    pub jitter: bool,
    /// 单次投递超时（毫秒）
    pub delivery_timeout_ms: u64,
    /// 是否为 low/normal 优先级启用批量通道
    pub batching_enabled: bool,
    pub batch_size: usize,
    pub batch_flush_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_secs: 30,
            max_delay_secs: 30 * 60,
            multiplier: 2.0,
            jitter: true,
            delivery_timeout_ms: 10_000,
            batching_enabled: false,
            batch_size: 50,
            batch_flush_ms: 500,
        }
    }
}

impl DispatchConfig {
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    pub fn batch_flush_interval(&self) -> Duration {
        Duration::from_millis(self.batch_flush_ms)
    }
}

/// 到期通知扫描配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub interval_secs: u64,
    /// 每批加载的到期记录数
    pub batch_size: i64,
    /// 单次 tick 最多处理的批次数，避免积压时长时间占用
    pub max_batches_per_tick: usize,
    /// 批内并发投递数
    pub concurrency: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: 15,
            batch_size: 100,
            max_batches_per_tick: 10,
            concurrency: 8,
        }
    }
}

impl SweepConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// 设备端配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// SQLite 连接串，如 `sqlite://courier-device.db?mode=rwc`
    pub storage_url: String,
    /// 离线队列提交单条信封的超时（毫秒）
    pub drain_timeout_ms: u64,
    pub group_window: usize,
    pub group_preview: usize,
    pub group_ttl_hours: i64,
    pub group_sweep_interval_secs: u64,
    /// 服务端通知 API 地址
    pub remote_base_url: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            storage_url: "sqlite://courier-device.db?mode=rwc".to_string(),
            drain_timeout_ms: 10_000,
            group_window: 5,
            group_preview: 3,
            group_ttl_hours: 24,
            group_sweep_interval_secs: 600,
            remote_base_url: "http://localhost:8080".to_string(),
        }
    }
}

impl DeviceConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn group_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.group_ttl_hours)
    }

    pub fn group_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.group_sweep_interval_secs)
    }
}

/// 推送网关配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    /// 为空时推送通道仅记录日志
    pub endpoint: String,
    pub api_key: Option<String>,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: None,
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub database: DatabaseConfig,
    pub dispatch: DispatchConfig,
    pub sweep: SweepConfig,
    pub device: DeviceConfig,
    pub push: PushConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. config/default.toml（默认配置）
    /// 2. config/{environment}.toml（环境特定配置）
    /// 3. config/{service_name}.toml（服务特定配置）
    /// 4. 环境变量（COURIER_ 前缀，如 COURIER_DATABASE__URL -> database.url）
    pub fn load(service_name: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("COURIER_ENV").unwrap_or_else(|_| "development".to_string());

        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        let builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", env.clone())?
            .add_source(File::from(Path::new(&config_dir).join("default.toml")).required(false))
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{}.toml", env))).required(false),
            )
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{}.toml", service_name)))
                    .required(false),
            )
            // 字段名本身含下划线，层级分隔使用双下划线
            .add_source(
                Environment::with_prefix("COURIER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.dispatch.max_attempts, 5);
        assert_eq!(config.dispatch.initial_delay_secs, 30);
        assert_eq!(config.dispatch.max_delay_secs, 1800);
        assert_eq!(config.sweep.batch_size, 100);
        assert_eq!(config.device.group_window, 5);
        assert_eq!(config.device.group_preview, 3);
        assert!(config.database.url.is_empty());
    }

    #[test]
    fn test_duration_helpers() {
        let config = AppConfig::default();
        assert_eq!(config.dispatch.delivery_timeout(), Duration::from_secs(10));
        assert_eq!(config.sweep.interval(), Duration::from_secs(15));
        assert_eq!(config.device.group_ttl(), chrono::Duration::hours(24));
    }

    #[test]
    fn test_load_from_config_dir() {
        let dir = std::env::temp_dir().join(format!("courier-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let mut file = std::fs::File::create(dir.join("default.toml")).unwrap();
        writeln!(
            file,
            "[dispatch]\nmax_attempts = 3\n\n[sweep]\nconcurrency = 2\n"
        )
        .unwrap();

        // SAFETY: 测试仅设置本模块专用的目录变量
        unsafe {
            std::env::set_var("CONFIG_DIR", &dir);
        }
        let config = AppConfig::load("notification-service").unwrap();
        unsafe {
            std::env::remove_var("CONFIG_DIR");
        }

        assert_eq!(config.service_name, "notification-service");
        assert_eq!(config.dispatch.max_attempts, 3);
        // 未出现在文件中的字段保持默认值
        assert_eq!(config.dispatch.initial_delay_secs, 30);
        assert_eq!(config.sweep.concurrency, 2);

        std::fs::remove_dir_all(&dir).ok();
    }
}
