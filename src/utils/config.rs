use crate::utils::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 应用程序主配置结构
/// 包含测试编排核心运行所需的所有配置信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 应用程序基本设置
    pub app_settings: AppSettings,
    /// 夹具链路配置
    pub fixture_config: FixtureConfig,
    /// 测试配置
    pub test_config: TestConfig,
    /// 日志配置
    pub logging_config: LoggingConfig,
}

/// 应用程序基本设置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    /// 应用程序名称
    pub app_name: String,
    /// 应用程序版本
    pub app_version: String,
    /// 运行环境 (development, testing, production)
    pub environment: String,
    /// 是否启用调试模式
    pub debug_mode: bool,
    /// 工作目录
    pub work_directory: Option<PathBuf>,
    /// 操作超时时间（毫秒）
    pub default_timeout_ms: u64,
}

/// 夹具链路配置
///
/// 串口传输本身由外部协作层实现，这里只保存链路端点与超时参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureConfig {
    /// 串口设备路径 (如 COM3 / /dev/ttyUSB0)
    pub port: String,
    /// 波特率
    pub baud_rate: u32,
    /// 普通指令超时时间（毫秒）
    pub command_timeout_ms: u64,
    /// 重量级操作超时时间（毫秒），如整板测量、烧录选板
    pub heavy_command_timeout_ms: u64,
    /// 异步事件等待超时时间（毫秒）
    pub event_timeout_ms: u64,
}

/// 测试配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestConfig {
    /// 上电稳定默认时间（毫秒）
    pub default_stabilization_time_ms: u64,
    /// 单个功能测试步骤的默认持续时间（毫秒）
    pub default_function_duration_ms: u64,
    /// 颜色采样等待超时时间（毫秒）
    pub color_sample_timeout_ms: u64,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别 (debug, info, warn, error)
    pub log_level: String,
    /// 日志文件路径
    pub log_file_path: Option<PathBuf>,
    /// 是否启用控制台输出
    pub console_output: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_settings: AppSettings::default(),
            fixture_config: FixtureConfig::default(),
            test_config: TestConfig::default(),
            logging_config: LoggingConfig::default(),
        }
    }
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            app_name: "LedFat".to_string(),
            app_version: "0.1.0".to_string(),
            environment: "development".to_string(),
            debug_mode: true,
            work_directory: None,
            default_timeout_ms: 5000,
        }
    }
}

impl Default for FixtureConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115200,
            command_timeout_ms: 2000,
            heavy_command_timeout_ms: 25000,
            event_timeout_ms: 10000,
        }
    }
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            default_stabilization_time_ms: 2000,
            default_function_duration_ms: 1000,
            color_sample_timeout_ms: 15000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_file_path: Some(PathBuf::from("logs/led_fat.log")),
            console_output: true,
        }
    }
}

/// 配置管理器
/// 负责加载、保存和管理应用程序配置
pub struct ConfigManager {
    config: AppConfig,
    config_file_path: PathBuf,
}

impl ConfigManager {
    /// 创建新的配置管理器
    pub fn new(config_file_path: PathBuf) -> Self {
        Self {
            config: AppConfig::default(),
            config_file_path,
        }
    }

    /// 从文件加载配置
    pub async fn load_from_file(&mut self) -> AppResult<()> {
        if !self.config_file_path.exists() {
            // 如果配置文件不存在，创建默认配置文件
            self.save_to_file().await?;
            return Ok(());
        }

        let content = tokio::fs::read_to_string(&self.config_file_path)
            .await
            .map_err(|e| {
                AppError::io_error(format!("读取配置文件失败: {}", e), e.kind().to_string())
            })?;

        self.config = serde_json::from_str(&content)
            .map_err(|e| AppError::configuration_error(format!("解析配置文件失败: {}", e)))?;

        Ok(())
    }

    /// 将配置保存到文件
    pub async fn save_to_file(&self) -> AppResult<()> {
        // 确保目录存在
        if let Some(parent) = self.config_file_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                AppError::io_error(format!("创建配置目录失败: {}", e), e.kind().to_string())
            })?;
        }

        let content = serde_json::to_string_pretty(&self.config)
            .map_err(|e| AppError::serialization_error(format!("序列化配置失败: {}", e)))?;

        tokio::fs::write(&self.config_file_path, content)
            .await
            .map_err(|e| {
                AppError::io_error(format!("写入配置文件失败: {}", e), e.kind().to_string())
            })?;

        Ok(())
    }

    /// 从环境变量覆盖配置
    pub fn override_from_env(&mut self) {
        // 夹具链路配置
        if let Ok(port) = std::env::var("FIXTURE_PORT") {
            self.config.fixture_config.port = port;
        }
        if let Ok(baud) = std::env::var("FIXTURE_BAUD") {
            if let Ok(baud) = baud.parse::<u32>() {
                self.config.fixture_config.baud_rate = baud;
            }
        }

        // 应用程序设置
        if let Ok(env) = std::env::var("APP_ENVIRONMENT") {
            self.config.app_settings.environment = env;
        }
        if let Ok(debug) = std::env::var("DEBUG_MODE") {
            self.config.app_settings.debug_mode = debug.to_lowercase() == "true";
        }
        if let Ok(log_level) = std::env::var("LOG_LEVEL") {
            self.config.logging_config.log_level = log_level;
        }
    }

    /// 获取配置的只读引用
    pub fn get_config(&self) -> &AppConfig {
        &self.config
    }

    /// 获取配置的可变引用
    pub fn get_config_mut(&mut self) -> &mut AppConfig {
        &mut self.config
    }

    /// 验证配置的有效性
    pub fn validate_config(&self) -> AppResult<()> {
        if self.config.fixture_config.port.is_empty() {
            return Err(AppError::configuration_error("夹具串口路径不能为空"));
        }

        if self.config.fixture_config.command_timeout_ms == 0 {
            return Err(AppError::configuration_error("指令超时时间不能为0"));
        }

        // 验证环境配置
        let valid_environments = ["development", "testing", "production"];
        if !valid_environments.contains(&self.config.app_settings.environment.as_str()) {
            return Err(AppError::configuration_error(format!(
                "无效的环境配置: {}，有效值: {:?}",
                self.config.app_settings.environment, valid_environments
            )));
        }

        // 验证日志级别
        let valid_log_levels = ["debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.config.logging_config.log_level.as_str()) {
            return Err(AppError::configuration_error(format!(
                "无效的日志级别: {}，有效值: {:?}",
                self.config.logging_config.log_level, valid_log_levels
            )));
        }

        Ok(())
    }

    /// 重置为默认配置
    pub fn reset_to_default(&mut self) {
        self.config = AppConfig::default();
    }
}

use std::sync::Mutex;
use std::sync::OnceLock;

static GLOBAL_CONFIG: OnceLock<Mutex<ConfigManager>> = OnceLock::new();

/// 初始化全局配置管理器
pub async fn init_global_config(config_path: Option<PathBuf>) -> AppResult<()> {
    let config_path = config_path.unwrap_or_else(|| PathBuf::from("config/led_fat.json"));
    let mut config_manager = ConfigManager::new(config_path);

    // 从文件加载配置
    config_manager.load_from_file().await?;

    // 从环境变量覆盖配置
    config_manager.override_from_env();

    // 验证配置
    config_manager.validate_config()?;

    // 设置全局配置
    GLOBAL_CONFIG
        .set(Mutex::new(config_manager))
        .map_err(|_| AppError::configuration_error("全局配置已经初始化"))?;

    Ok(())
}

/// 获取全局配置的副本
pub fn get_global_config() -> AppResult<AppConfig> {
    let manager = GLOBAL_CONFIG
        .get()
        .ok_or_else(|| AppError::configuration_error("全局配置尚未初始化"))?;

    let guard = manager
        .lock()
        .map_err(|_| AppError::concurrency_error("获取全局配置锁失败"))?;

    Ok(guard.get_config().clone())
}
