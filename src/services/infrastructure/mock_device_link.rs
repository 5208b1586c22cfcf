//! Mock夹具链路实现
//!
//! 供单元测试、集成测试与演示二进制使用：预置每个通道的电气读数、
//! 记录全部已下发指令、支持按指令前缀注入失败、手动注入异步事件。
//! 参考真实夹具的行为：批量测量一次返回全部通道记录，单通道测量
//! 返回单条记录，缺失预置读数的通道不合成数据。

use async_trait::async_trait;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;

use super::device_link::{check_device_response, cmd, DeviceEvent, IDeviceLink, RgbwSample};
use crate::utils::error::AppResult;

/// 事件广播通道容量
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Mock夹具链路
pub struct MockDeviceLink {
    /// 夹具通道总数
    channel_count: u8,
    /// 每个通道的预置读数 (电压V, 电流A)；未预置的通道测不出数据
    readings: Mutex<HashMap<u8, (f64, f64)>>,
    /// 已下发指令日志
    command_log: Mutex<Vec<String>>,
    /// 注入失败的指令前缀：匹配的指令返回ERROR响应
    fail_prefixes: Mutex<HashSet<String>>,
    /// 读数抖动幅度（模拟测量噪声），None表示读数完全确定
    jitter: Option<f64>,
    /// 链路连接状态
    connected: AtomicBool,
    /// 事件广播发送端
    event_tx: broadcast::Sender<DeviceEvent>,
}

impl MockDeviceLink {
    /// 创建测试用Mock链路
    pub fn new_for_testing(channel_count: u8) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            channel_count,
            readings: Mutex::new(HashMap::new()),
            command_log: Mutex::new(Vec::new()),
            fail_prefixes: Mutex::new(HashSet::new()),
            jitter: None,
            connected: AtomicBool::new(true),
            event_tx,
        }
    }

    /// 设置链路连接状态（模拟夹具离线）
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// 创建带测量噪声的Mock链路（演示二进制使用）
    pub fn with_jitter(channel_count: u8, jitter: f64) -> Self {
        let mut link = Self::new_for_testing(channel_count);
        link.jitter = Some(jitter);
        link
    }

    /// 预置单个通道的读数
    pub fn set_reading(&self, relay: u8, voltage: f64, current: f64) {
        self.readings.lock().unwrap().insert(relay, (voltage, current));
    }

    /// 为全部通道预置相同读数
    pub fn set_all_readings(&self, voltage: f64, current: f64) {
        let mut readings = self.readings.lock().unwrap();
        for relay in 1..=self.channel_count {
            readings.insert(relay, (voltage, current));
        }
    }

    /// 移除某个通道的预置读数（模拟测不出数据的通道）
    pub fn clear_reading(&self, relay: u8) {
        self.readings.lock().unwrap().remove(&relay);
    }

    /// 注入失败：匹配该前缀的指令将收到ERROR响应
    pub fn fail_on_prefix(&self, prefix: impl Into<String>) {
        self.fail_prefixes.lock().unwrap().insert(prefix.into());
    }

    /// 清除全部注入的失败
    pub fn clear_failures(&self) {
        self.fail_prefixes.lock().unwrap().clear();
    }

    /// 获取指令日志副本
    pub fn command_log(&self) -> Vec<String> {
        self.command_log.lock().unwrap().clone()
    }

    /// 统计匹配前缀的指令条数
    pub fn commands_matching(&self, prefix: &str) -> usize {
        self.command_log
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    /// 是否下发过指定指令
    pub fn was_command_sent(&self, command: &str) -> bool {
        self.command_log
            .lock()
            .unwrap()
            .iter()
            .any(|c| c == command)
    }

    /// 手动注入一条事件
    pub fn emit_event(&self, event: DeviceEvent) {
        // 没有订阅者时发送失败是正常情况
        let _ = self.event_tx.send(event);
    }

    /// 注入一组板位的颜色采样事件
    pub fn emit_samples_for_boards(&self, boards: &[u32]) {
        for &index in boards {
            self.emit_event(DeviceEvent::Sample {
                index,
                sample: RgbwSample {
                    red: 120.0,
                    green: 110.0,
                    blue: 95.0,
                    white: 230.0,
                    lux: 450.0,
                },
            });
        }
    }

    /// 施加抖动后的读数
    fn jittered(&self, value: f64) -> f64 {
        match self.jitter {
            Some(j) if j > 0.0 => {
                let delta = rand::thread_rng().gen_range(-j..=j);
                value + delta
            }
            _ => value,
        }
    }

    /// 合成单通道测量记录
    fn measurement_record(&self, relay: u8) -> Option<String> {
        let readings = self.readings.lock().unwrap();
        readings.get(&relay).map(|(voltage, current)| {
            format!(
                "MEAS:{}:{:.3}:{:.3}",
                relay,
                self.jittered(*voltage),
                self.jittered(*current)
            )
        })
    }

    /// 按指令内容合成响应
    fn build_response(&self, command: &str) -> String {
        if command == cmd::measure_panel() {
            let records: Vec<String> = (1..=self.channel_count)
                .filter_map(|relay| self.measurement_record(relay))
                .collect();
            return records.join(";");
        }

        if let Some(rest) = command.strip_prefix("MEASURE:") {
            if let Ok(relay) = rest.parse::<u8>() {
                // 未预置读数的通道返回空响应，协议层按缺失读数处理
                return self.measurement_record(relay).unwrap_or_default();
            }
        }

        "OK".to_string()
    }
}

#[async_trait]
impl IDeviceLink for MockDeviceLink {
    async fn send(&self, command: &str, _timeout: Duration) -> AppResult<String> {
        self.command_log.lock().unwrap().push(command.to_string());

        let injected_failure = {
            let prefixes = self.fail_prefixes.lock().unwrap();
            prefixes.iter().any(|p| command.starts_with(p.as_str()))
        };
        let raw = if injected_failure {
            "ERROR:INJECTED".to_string()
        } else {
            self.build_response(command)
        };

        check_device_response(command, &raw)
    }

    fn subscribe_events(&self) -> broadcast::Receiver<DeviceEvent> {
        self.event_tx.subscribe()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
