//! 产品测试配置模型
//!
//! 配置的加载/编辑由外部协作层负责，核心只消费这里的已验证结构。
//! `validate()` 在构建测试计划之前拒绝不合法的配置，保证编排核心
//! 可以假定输入是良构的（配置错误不触发任何硬件I/O）。

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use super::enums::ProgrammerType;
use super::structs::Limits;
use crate::utils::error::{AppError, AppResult};

/// 面板几何布局（行 × 列）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelGeometry {
    pub rows: u32,
    pub cols: u32,
}

impl PanelGeometry {
    /// 面板上的板卡总数
    pub fn board_count(&self) -> u32 {
        self.rows * self.cols
    }
}

/// 继电器表中一组继电器的归属：所属板卡与逻辑功能
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayGroupConfig {
    /// 板卡序号（1基）
    pub board: u32,
    /// 逻辑功能名（如 "mainbeam"、"backlight"）
    pub function: String,
}

/// 功能测试序列中的一步
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionTestStep {
    /// 被测功能名，须能在继电器表中找到对应继电器组
    pub function: String,
    /// 本步骤持续时间（毫秒）
    pub duration_ms: u64,
    /// 电流/电压限值
    pub limits: Limits,
    /// 是否在本步骤采集整板颜色样本（RGBW色彩循环测试）
    #[serde(default)]
    pub collect_color_samples: bool,
}

/// 单个编程器的板卡分配配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgrammerConfig {
    /// 编程器家族类型
    pub programmer_type: ProgrammerType,
    /// 编程器可执行工具路径
    pub path: PathBuf,
    /// 该编程器负责的板卡序号列表（与其它编程器互斥）
    pub boards: Vec<u32>,
    /// 每块板的固件hex文件路径
    pub hex_files: HashMap<u32, PathBuf>,
    /// 每块板的器件型号提示；缺失时由编程器自动识别
    #[serde(default)]
    pub device_hints: HashMap<u32, String>,
}

/// 烧录阶段配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgrammingConfig {
    /// 是否启用烧录阶段
    pub enabled: bool,
    /// 编程器列表
    pub programmers: Vec<ProgrammerConfig>,
}

/// 单个产品型号的完整测试配置
///
/// 由外部配置提供方按产品标识下发；继电器表的解析与互斥校验
/// 在 `RelayMapper::from_config` 中完成（同样早于任何硬件I/O）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductConfig {
    /// 产品标识
    pub product_id: String,
    /// 夹具继电器通道总数
    pub channel_count: u8,
    /// 面板几何布局
    pub panel: PanelGeometry,
    /// 继电器表: "1,2,3" → { board, function }
    pub relay_table: HashMap<String, RelayGroupConfig>,
    /// 按序执行的功能测试序列
    pub test_sequence: Vec<FunctionTestStep>,
    /// 上电稳定时间（毫秒）
    pub power_stabilization_ms: u64,
    /// 烧录配置；None 表示该产品不含烧录阶段
    pub programming: Option<ProgrammingConfig>,
}

impl ProductConfig {
    /// 验证配置的结构有效性
    ///
    /// 配置错误在此处立即拒绝，不会为损坏的阶段下发任何夹具指令
    pub fn validate(&self) -> AppResult<()> {
        if self.channel_count == 0 {
            return Err(AppError::configuration_error("夹具通道数不能为0"));
        }

        if self.panel.board_count() == 0 {
            return Err(AppError::configuration_error(format!(
                "面板布局无效: {} 行 × {} 列",
                self.panel.rows, self.panel.cols
            )));
        }

        if self.relay_table.is_empty() {
            return Err(AppError::configuration_error("继电器表不能为空"));
        }

        // 每个测试步骤的功能必须能在继电器表中找到
        let known_functions: HashSet<&str> = self
            .relay_table
            .values()
            .map(|g| g.function.as_str())
            .collect();
        for step in &self.test_sequence {
            if step.function.is_empty() {
                return Err(AppError::configuration_error("测试步骤缺少功能名"));
            }
            if !known_functions.contains(step.function.as_str()) {
                return Err(AppError::configuration_error(format!(
                    "测试步骤引用了继电器表中不存在的功能: {}",
                    step.function
                )));
            }
            if step.limits.current_a.min > step.limits.current_a.max {
                return Err(AppError::configuration_error(format!(
                    "功能 {} 的电流限值区间无效: {} > {}",
                    step.function, step.limits.current_a.min, step.limits.current_a.max
                )));
            }
            if step.limits.voltage_v.min > step.limits.voltage_v.max {
                return Err(AppError::configuration_error(format!(
                    "功能 {} 的电压限值区间无效: {} > {}",
                    step.function, step.limits.voltage_v.min, step.limits.voltage_v.max
                )));
            }
        }

        // 编程器之间的板卡分配必须互斥
        if let Some(programming) = &self.programming {
            let mut seen_boards: HashSet<u32> = HashSet::new();
            for programmer in &programming.programmers {
                if programmer.boards.is_empty() {
                    return Err(AppError::configuration_error(format!(
                        "编程器 {} 未分配任何板卡",
                        programmer.programmer_type
                    )));
                }
                for board in &programmer.boards {
                    if *board == 0 || *board > self.panel.board_count() {
                        return Err(AppError::configuration_error(format!(
                            "编程器 {} 分配的板卡序号越界: {}",
                            programmer.programmer_type, board
                        )));
                    }
                    if !seen_boards.insert(*board) {
                        return Err(AppError::configuration_error(format!(
                            "板卡 {} 被分配给了多个编程器",
                            board
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    /// 是否存在启用的烧录阶段
    pub fn programming_enabled(&self) -> bool {
        self.programming
            .as_ref()
            .map(|p| p.enabled && !p.programmers.is_empty())
            .unwrap_or(false)
    }
}
