use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::product_config::FunctionTestStep;

/// 生成默认UUID字符串的辅助函数
pub fn default_id() -> String {
    Uuid::new_v4().to_string()
}

/// 合成板卡标签，测量结果以此为键（如 "Board 3"）
pub fn board_label(board: u32) -> String {
    format!("Board {}", board)
}

/// 数值范围限值
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range {
    /// 下限
    pub min: f64,
    /// 上限
    pub max: f64,
}

impl Range {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// 判断数值是否落在 [min, max] 闭区间内
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// 单个功能的电气限值，由配置提供、核心只读
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    /// 电流限值（安培）
    pub current_a: Range,
    /// 电压限值（伏特）
    pub voltage_v: Range,
}

/// 一条命名测量记录
///
/// `passed` 在创建时由 `min ≤ value ≤ max` 推导，之后不再变化
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// 测量名称（如 "mainbeam_Board 1_current"）
    pub name: String,
    /// 测量值
    pub value: f64,
    /// 下限
    pub min: f64,
    /// 上限
    pub max: f64,
    /// 单位
    pub unit: String,
    /// 是否通过
    pub passed: bool,
}

impl Measurement {
    /// 创建新的测量记录并推导通过标志
    pub fn new(
        name: impl Into<String>,
        value: f64,
        min: f64,
        max: f64,
        unit: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            value,
            min,
            max,
            unit: unit.into(),
            passed: value >= min && value <= max,
        }
    }
}

/// 一次测试执行的结果汇总
///
/// 由单次测试执行独占持有，`execute()` 返回后对调用方只读
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    /// 本次执行的唯一标识
    #[serde(default = "default_id")]
    pub execution_id: String,
    /// 测试名称
    pub test_name: String,
    /// 命名测量记录列表
    pub measurements: Vec<Measurement>,
    /// 自由文本失败描述列表
    pub failures: Vec<String>,
    /// 总体是否通过
    pub passed: bool,
    /// 开始时间
    pub start_time: DateTime<Utc>,
    /// 总耗时（毫秒），包含硬件清理
    pub duration_ms: u64,
}

impl TestResult {
    /// 创建新的测试结果
    pub fn new(test_name: impl Into<String>) -> Self {
        Self {
            execution_id: default_id(),
            test_name: test_name.into(),
            measurements: Vec::new(),
            failures: Vec::new(),
            passed: false,
            start_time: Utc::now(),
            duration_ms: 0,
        }
    }

    /// 追加一条测量记录，返回其通过标志
    pub fn add_measurement(
        &mut self,
        name: impl Into<String>,
        value: f64,
        min: f64,
        max: f64,
        unit: impl Into<String>,
    ) -> bool {
        let measurement = Measurement::new(name, value, min, max, unit);
        let passed = measurement.passed;
        self.measurements.push(measurement);
        passed
    }

    /// 追加一条失败描述
    pub fn add_failure(&mut self, message: impl Into<String>) {
        self.failures.push(message.into());
    }

    /// 按名称查找测量记录
    pub fn measurement(&self, name: &str) -> Option<&Measurement> {
        self.measurements.iter().find(|m| m.name == name)
    }

    /// 计算总体结果：无失败且至少记录了一条测量才算通过
    pub fn calculate_overall_result(&mut self) {
        self.passed = self.failures.is_empty() && !self.measurements.is_empty();
    }
}

/// 单个继电器通道的一次电气读数
///
/// 每次测量调用新建，创建后不再修改；功率在创建时由 V·I 计算
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelReading {
    /// 物理继电器编号（1..N）
    pub relay: u8,
    /// 电压（伏特）
    pub voltage: f64,
    /// 电流（安培）
    pub current: f64,
    /// 功率（瓦特）
    pub power: f64,
}

impl ChannelReading {
    pub fn new(relay: u8, voltage: f64, current: f64) -> Self {
        Self {
            relay,
            voltage,
            current,
            power: voltage * current,
        }
    }
}

/// 单块板的一次烧录结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgrammingResult {
    /// 板卡序号（1基）
    pub board: u32,
    /// 是否烧录成功
    pub success: bool,
    /// 结果消息（失败时携带编程器的原始错误输出）
    pub message: String,
}

/// 面板上的板位坐标
///
/// row 0 为底行；偶数行从左到右编号，奇数行从右到左（水平蛇形）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardPosition {
    pub row: u32,
    pub col: u32,
}

/// 夹具链路会话状态
///
/// 显式携带"通道数已配置"标志，取代挂在控制器实例上的隐式属性检查
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSession {
    /// 夹具通道数是否已下发配置
    pub configured: bool,
    /// 夹具继电器通道总数
    pub channel_count: u8,
}

impl DeviceSession {
    pub fn new(channel_count: u8) -> Self {
        Self {
            configured: false,
            channel_count,
        }
    }
}

/// 测试阶段计划项
///
/// 在 `run_test_sequence` 开始时一次性构建的不可变计划，执行器只读不改。
/// 封闭枚举取代自由文本动作字符串，未知动作在编译期即不可表达
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TestPhase {
    /// 板卡烧录阶段（仅当烧录启用且至少一个编程器初始化成功时加入）
    Programming,
    /// 上电稳定阶段（执行器中唯一有意的阻塞延时）
    PowerStabilization { duration_ms: u64 },
    /// 单个功能测试阶段
    FunctionTest { step: FunctionTestStep },
}

impl TestPhase {
    /// 阶段名称，用于进度汇报与失败描述
    pub fn name(&self) -> String {
        match self {
            Self::Programming => "programming".to_string(),
            Self::PowerStabilization { .. } => "power_stabilization".to_string(),
            Self::FunctionTest { step } => step.function.clone(),
        }
    }
}
