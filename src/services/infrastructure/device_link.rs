//! # 夹具链路接口模块
//!
//! ## 业务作用
//! 本模块定义测试编排核心与单片机夹具之间的双工通道契约：
//! - 行式文本指令的请求/响应接口（字节级串口收发由外部协作层实现）
//! - 异步事件流（结果记录、颜色采样记录、按键事件）
//! - 对事件流的带超时等待原语，取代忙轮询
//!
//! ## 设计要点
//! - 响应中包含 `"ERROR"` 标记的指令视为设备上报的操作失败，在本边界
//!   统一转换为 `DeviceCommunicationError`，上层服务不再各自解释该标记
//! - 事件等待一律走 `tokio::time::timeout` 的通道await，超时即失败，
//!   不存在无限等待
//! - 等待整板颜色采样时以"去重后的板位覆盖"作为完成条件，而不是原始
//!   事件计数（同一板位可能重复上报）

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::sync::broadcast;

use crate::utils::error::{AppError, AppResult};

/// 设备上报失败的响应标记
pub const ERROR_TOKEN: &str = "ERROR";

/// 夹具指令构造函数集合
///
/// 指令为普通ASCII令牌；具体传输可替换，只要保持请求/响应与事件语义
pub mod cmd {
    /// 下发夹具通道数配置
    pub fn config_channels(n: u8) -> String {
        format!("CONFIG:CHANNELS:{}", n)
    }

    /// 驱动单个继电器
    pub fn relay(n: u8, on: bool) -> String {
        format!("RELAY:{}:{}", n, if on { "ON" } else { "OFF" })
    }

    /// 整板批量测量（一次性采样全部通道）
    pub fn measure_panel() -> String {
        "MEASURE:PANEL".to_string()
    }

    /// 单通道寻址测量
    pub fn measure_relay(n: u8) -> String {
        format!("MEASURE:{}", n)
    }

    /// 在夹具上选中一块板（多路复用）
    pub fn select_board(n: u32) -> String {
        format!("SELECT:BOARD:{}", n)
    }

    /// 取消所有板卡选择
    pub fn select_none() -> String {
        "SELECT:NONE".to_string()
    }

    /// 使能/关闭编程电气接口
    pub fn prog_interface(token: &str, on: bool) -> String {
        format!("PROG:INTERFACE:{}:{}", token, if on { "ON" } else { "OFF" })
    }

    /// 施加编程电压（毫伏）
    pub fn prog_vdd_on(millivolts: u32) -> String {
        format!("PROG:VDD:{}:ON", millivolts)
    }

    /// 关闭编程供电
    pub fn prog_power_off() -> String {
        "PROG:POWER:OFF".to_string()
    }

    /// 关闭全部输出
    pub fn outputs_off() -> String {
        "OUTPUTS:OFF".to_string()
    }

    /// 启动色彩循环测试（夹具随后以事件流上报各板位RGBW采样）
    pub fn test_color_cycle() -> String {
        "TEST:COLOR_CYCLE".to_string()
    }
}

/// 单个板位的一次RGBW颜色采样
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RgbwSample {
    pub red: f64,
    pub green: f64,
    pub blue: f64,
    pub white: f64,
    /// 照度（勒克斯）
    pub lux: f64,
}

/// 夹具主动上报的异步事件
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// 通用结果记录：命名测量映射
    Result { measurements: HashMap<String, f64> },
    /// 颜色采样记录：板位序号 + RGBW采样点
    Sample { index: u32, sample: RgbwSample },
    /// 夹具按键事件
    Button { pressed: bool },
}

/// 夹具链路trait
///
/// 一次测试执行期间由该测试的执行器独占持有；同一条链路上
/// 不允许两个并发测试执行
#[async_trait]
pub trait IDeviceLink: Send + Sync {
    /// 发送一条指令并等待响应
    ///
    /// 超时或设备上报 `"ERROR"` 均返回错误；调用方按操作粒度局部恢复
    async fn send(&self, command: &str, timeout: Duration) -> AppResult<String>;

    /// 订阅异步事件流
    ///
    /// 事件投递可能发生在独立的投递线程上；同一测试实例的处理器
    /// 不会被并发调用
    fn subscribe_events(&self) -> broadcast::Receiver<DeviceEvent>;

    /// 链路是否已建立
    fn is_connected(&self) -> bool;
}

/// 检查设备响应中的失败标记
///
/// 所有 `IDeviceLink` 实现都应在返回响应前调用本函数，保证
/// `"ERROR"` 标记只在链路边界被解释一次
pub fn check_device_response(command: &str, response: &str) -> AppResult<String> {
    if response.contains(ERROR_TOKEN) {
        return Err(AppError::device_communication_error(format!(
            "指令 {} 被设备拒绝: {}",
            command, response
        )));
    }
    Ok(response.to_string())
}

/// 带超时等待一条结果事件
///
/// 其它类型的事件在等待期间被跳过；超时返回 `TimeoutError`
pub async fn await_result_event(
    rx: &mut broadcast::Receiver<DeviceEvent>,
    timeout: Duration,
) -> AppResult<HashMap<String, f64>> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Err(_) => {
                return Err(AppError::timeout_error(
                    "await_result_event",
                    format!("等待结果事件超时（{:?}）", timeout),
                ));
            }
            Ok(Ok(DeviceEvent::Result { measurements })) => return Ok(measurements),
            Ok(Ok(_)) => continue,
            Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                log::warn!("[DeviceLink] 事件流滞后，丢弃了 {} 条事件", skipped);
                continue;
            }
            Ok(Err(broadcast::error::RecvError::Closed)) => {
                return Err(AppError::device_communication_error(
                    "事件流已关闭，链路可能已断开",
                ));
            }
        }
    }
}

/// 收集覆盖全部期望板位的颜色采样
///
/// 完成条件是去重后的板位覆盖（每个期望序号至少一条采样），
/// 而不是原始事件条数；重复板位的后续采样覆盖先前值
pub async fn collect_samples_covering(
    rx: &mut broadcast::Receiver<DeviceEvent>,
    expected: &BTreeSet<u32>,
    timeout: Duration,
) -> AppResult<HashMap<u32, RgbwSample>> {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut collected: HashMap<u32, RgbwSample> = HashMap::new();

    while !expected.iter().all(|i| collected.contains_key(i)) {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Err(_) => {
                let missing: Vec<u32> = expected
                    .iter()
                    .filter(|i| !collected.contains_key(i))
                    .copied()
                    .collect();
                return Err(AppError::timeout_error(
                    "collect_samples_covering",
                    format!("等待颜色采样超时，缺少板位: {:?}", missing),
                ));
            }
            Ok(Ok(DeviceEvent::Sample { index, sample })) => {
                if expected.contains(&index) {
                    collected.insert(index, sample);
                } else {
                    log::warn!("[DeviceLink] 收到期望之外的板位采样: {}", index);
                }
            }
            Ok(Ok(_)) => continue,
            Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                log::warn!("[DeviceLink] 事件流滞后，丢弃了 {} 条事件", skipped);
                continue;
            }
            Ok(Err(broadcast::error::RecvError::Closed)) => {
                return Err(AppError::device_communication_error(
                    "事件流已关闭，链路可能已断开",
                ));
            }
        }
    }

    Ok(collected)
}
