//! # 模型枚举类型模块
//!
//! ## 业务作用
//! 本模块定义了测试编排核心使用的各种枚举类型，包括：
//! - **烧录状态枚举**: 单块板在烧录流水线中的状态机
//! - **编程器类型枚举**: 两种编程器家族及其电气接口预设
//!
//! ## 设计原则
//! - **类型安全**: 使用强类型枚举避免魔法数字和自由文本动作字符串
//! - **序列化支持**: 所有枚举都支持JSON序列化
//! - **封闭匹配**: 测试阶段与烧录状态均为封闭枚举，穷尽匹配由编译器保证

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// 单块板在烧录流水线中的状态
///
/// 状态机: Pending → Selected → InterfaceEnabled → Powered → Programmed | Failed
/// 任一中间步骤失败都会让该板进入 Failed，但不影响其它板的推进
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoardProgrammingState {
    /// 等待处理
    Pending,
    /// 已在夹具上选中（多路复用指令已下发）
    Selected,
    /// 编程电气接口已使能
    InterfaceEnabled,
    /// 编程电压已施加
    Powered,
    /// 烧录成功
    Programmed,
    /// 烧录失败（任一步骤失败均落入此状态）
    Failed,
}

impl Default for BoardProgrammingState {
    fn default() -> Self {
        Self::Pending
    }
}

impl Display for BoardProgrammingState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::Selected => "Selected",
            Self::InterfaceEnabled => "InterfaceEnabled",
            Self::Powered => "Powered",
            Self::Programmed => "Programmed",
            Self::Failed => "Failed",
        };
        write!(f, "{}", s)
    }
}

impl BoardProgrammingState {
    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Programmed | Self::Failed)
    }
}

/// 编程器家族类型
///
/// 两种家族对应两套不同的电压/接口预设：
/// - `Icsp`: Microchip ICSP 接口，编程电压 5000 mV
/// - `Swd`: ARM SWD 接口，编程电压 3300 mV
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProgrammerType {
    /// Microchip ICSP 家族（如 PICkit 系列）
    Icsp,
    /// ARM SWD 家族（如 ST-LINK 系列）
    Swd,
}

impl ProgrammerType {
    /// 夹具指令中的接口标识
    pub fn interface_token(&self) -> &'static str {
        match self {
            Self::Icsp => "ICSP",
            Self::Swd => "SWD",
        }
    }

    /// 该接口家族对应的编程电压预设（毫伏）
    pub fn vdd_millivolts(&self) -> u32 {
        match self {
            Self::Icsp => 5000,
            Self::Swd => 3300,
        }
    }
}

impl Display for ProgrammerType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.interface_token())
    }
}

impl FromStr for ProgrammerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ICSP" | "PICKIT" => Ok(Self::Icsp),
            "SWD" | "STLINK" | "ST-LINK" => Ok(Self::Swd),
            other => Err(format!("未知的编程器类型: {}", other)),
        }
    }
}
