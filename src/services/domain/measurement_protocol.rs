//! 面板测量协议
//!
//! 负责把继电器集合变成电气读数：
//! - 请求的继电器集合恰好是夹具全通道集合时，下发一次批量"整板测量"
//!   指令（摊薄单指令延迟）
//! - 否则对请求的每个继电器单独下发寻址测量指令（不浪费时间采样
//!   未被测的通道）
//! - 原始按继电器编号键控的读数可进一步转换为按板卡标签键控

use log::{debug, warn};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crate::models::{board_label, ChannelReading};
use crate::services::domain::relay_mapper::RelayMapper;
use crate::services::infrastructure::device_link::{
    cmd, collect_samples_covering, IDeviceLink, RgbwSample,
};
use crate::utils::config::FixtureConfig;
use crate::utils::error::{AppError, AppResult};

/// 测量协议执行器
pub struct MeasurementProtocol {
    device_link: Arc<dyn IDeviceLink>,
    mapper: Arc<RelayMapper>,
    /// 单通道测量指令超时
    command_timeout: Duration,
    /// 整板批量测量指令超时
    heavy_command_timeout: Duration,
    /// 颜色采样事件等待超时
    sample_timeout: Duration,
}

impl MeasurementProtocol {
    pub fn new(
        device_link: Arc<dyn IDeviceLink>,
        mapper: Arc<RelayMapper>,
        fixture_config: &FixtureConfig,
    ) -> Self {
        Self {
            device_link,
            mapper,
            command_timeout: Duration::from_millis(fixture_config.command_timeout_ms),
            heavy_command_timeout: Duration::from_millis(fixture_config.heavy_command_timeout_ms),
            sample_timeout: Duration::from_millis(fixture_config.event_timeout_ms),
        }
    }

    /// 测量一组继电器，返回 继电器编号 → 读数
    ///
    /// 任何请求了但测不出读数的继电器记录警告并从结果中剔除（绝不合成
    /// 数据）；若一条读数都没有，按夹具通信失败处理而非测量失败
    pub async fn measure(&self, relays: &BTreeSet<u8>) -> AppResult<HashMap<u8, ChannelReading>> {
        if relays.is_empty() {
            return Err(AppError::validation_error("测量请求的继电器集合为空"));
        }

        let readings = if *relays == self.mapper.full_channel_set() {
            self.measure_panel().await?
        } else {
            self.measure_individually(relays).await?
        };

        let mut result: HashMap<u8, ChannelReading> = HashMap::new();
        for relay in relays {
            match readings.get(relay) {
                Some(reading) => {
                    result.insert(*relay, *reading);
                }
                None => {
                    warn!("[MeasureProto] 继电器 {} 无读数，从结果中剔除", relay);
                }
            }
        }

        if result.is_empty() {
            return Err(AppError::device_communication_error(format!(
                "请求测量 {} 个继电器但没有得到任何读数",
                relays.len()
            )));
        }

        Ok(result)
    }

    /// 测量一组继电器并转换为 板卡标签 → 读数
    ///
    /// 无板卡归属的继电器读数被丢弃并记录警告（绝不无声混入）
    pub async fn measure_by_board(
        &self,
        relays: &BTreeSet<u8>,
    ) -> AppResult<BTreeMap<String, ChannelReading>> {
        let by_relay = self.measure(relays).await?;

        let mut by_board: BTreeMap<String, ChannelReading> = BTreeMap::new();
        // BTreeMap迭代保证板卡键控结果的确定性
        let ordered: BTreeMap<u8, ChannelReading> = by_relay.into_iter().collect();
        for (relay, reading) in ordered {
            match self.mapper.board_for_relay(relay) {
                Some(board) => {
                    let label = board_label(board);
                    if by_board.insert(label.clone(), reading).is_some() {
                        warn!(
                            "[MeasureProto] 板卡 {} 有多条读数，保留继电器 {} 的读数",
                            label, relay
                        );
                    }
                }
                None => {
                    warn!(
                        "[MeasureProto] 继电器 {} 没有板卡归属，读数被丢弃",
                        relay
                    );
                }
            }
        }

        Ok(by_board)
    }

    /// 采集覆盖全部指定板位的RGBW颜色样本
    ///
    /// 先订阅事件流再启动色彩循环，保证不丢失早到的采样事件
    pub async fn collect_panel_color_samples(
        &self,
        boards: &BTreeSet<u32>,
    ) -> AppResult<HashMap<u32, RgbwSample>> {
        let mut rx = self.device_link.subscribe_events();
        self.device_link
            .send(&cmd::test_color_cycle(), self.command_timeout)
            .await?;

        collect_samples_covering(&mut rx, boards, self.sample_timeout).await
    }

    /// 一次批量整板测量
    async fn measure_panel(&self) -> AppResult<HashMap<u8, ChannelReading>> {
        debug!("[MeasureProto] 全通道请求，使用整板批量测量");
        let response = self
            .device_link
            .send(&cmd::measure_panel(), self.heavy_command_timeout)
            .await?;
        Ok(Self::parse_records(&response))
    }

    /// 对每个请求的继电器单独寻址测量
    async fn measure_individually(
        &self,
        relays: &BTreeSet<u8>,
    ) -> AppResult<HashMap<u8, ChannelReading>> {
        debug!(
            "[MeasureProto] 部分通道请求 {:?}，使用单通道寻址测量",
            relays
        );
        let mut readings: HashMap<u8, ChannelReading> = HashMap::new();
        for relay in relays {
            let response = self
                .device_link
                .send(&cmd::measure_relay(*relay), self.command_timeout)
                .await?;
            readings.extend(Self::parse_records(&response));
        }
        Ok(readings)
    }

    /// 解析测量响应中的记录（`MEAS:{relay}:{voltage}:{current}`，分号分隔）
    ///
    /// 无法解析的记录记录警告后跳过，不中断整条响应的处理
    fn parse_records(response: &str) -> HashMap<u8, ChannelReading> {
        let mut readings = HashMap::new();
        for record in response.split(';') {
            let record = record.trim();
            if record.is_empty() {
                continue;
            }
            match Self::parse_record(record) {
                Some(reading) => {
                    readings.insert(reading.relay, reading);
                }
                None => {
                    warn!("[MeasureProto] 无法解析的测量记录: \"{}\"", record);
                }
            }
        }
        readings
    }

    fn parse_record(record: &str) -> Option<ChannelReading> {
        let mut parts = record.split(':');
        if parts.next()? != "MEAS" {
            return None;
        }
        let relay: u8 = parts.next()?.parse().ok()?;
        let voltage: f64 = parts.next()?.parse().ok()?;
        let current: f64 = parts.next()?.parse().ok()?;
        Some(ChannelReading::new(relay, voltage, current))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RelayGroupConfig;
    use crate::services::infrastructure::mock_device_link::MockDeviceLink;

    fn build_protocol(
        channel_count: u8,
        table: &[(&str, u32, &str)],
    ) -> (Arc<MockDeviceLink>, MeasurementProtocol) {
        let relay_table: HashMap<String, RelayGroupConfig> = table
            .iter()
            .map(|(key, board, function)| {
                (
                    key.to_string(),
                    RelayGroupConfig {
                        board: *board,
                        function: function.to_string(),
                    },
                )
            })
            .collect();
        let mapper = Arc::new(RelayMapper::from_config(&relay_table, channel_count).unwrap());
        let link = Arc::new(MockDeviceLink::new_for_testing(channel_count));
        let protocol =
            MeasurementProtocol::new(link.clone(), mapper, &FixtureConfig::default());
        (link, protocol)
    }

    /// 测试请求全通道集合时只下发一条批量测量指令
    #[tokio::test]
    async fn test_full_set_uses_single_panel_command() {
        let (link, protocol) = build_protocol(
            8,
            &[("1,2,3,4", 1, "mainbeam"), ("5,6,7,8", 2, "mainbeam")],
        );
        link.set_all_readings(12.0, 0.3);

        let relays: BTreeSet<u8> = (1..=8).collect();
        let readings = protocol.measure(&relays).await.unwrap();

        assert_eq!(readings.len(), 8);
        assert_eq!(link.commands_matching("MEASURE:PANEL"), 1);
        // 未下发任何单通道寻址测量
        assert_eq!(link.commands_matching("MEASURE:"), 1);
    }

    /// 测试部分通道请求走单通道寻址路径
    #[tokio::test]
    async fn test_partial_set_uses_individual_commands() {
        let (link, protocol) = build_protocol(8, &[("1,3", 1, "mainbeam")]);
        link.set_reading(1, 12.0, 0.3);
        link.set_reading(3, 11.9, 0.31);

        let relays: BTreeSet<u8> = [1, 3].into_iter().collect();
        let readings = protocol.measure(&relays).await.unwrap();

        assert_eq!(readings.len(), 2);
        assert_eq!(link.commands_matching("MEASURE:PANEL"), 0);
        assert!(link.was_command_sent("MEASURE:1"));
        assert!(link.was_command_sent("MEASURE:3"));
    }

    /// 测试缺失读数的继电器被剔除而不是合成数据
    #[tokio::test]
    async fn test_missing_reading_excluded() {
        let (link, protocol) = build_protocol(8, &[("1,3", 1, "mainbeam")]);
        link.set_reading(1, 12.0, 0.3);
        // 继电器3不预置读数

        let relays: BTreeSet<u8> = [1, 3].into_iter().collect();
        let readings = protocol.measure(&relays).await.unwrap();

        assert_eq!(readings.len(), 1);
        assert!(readings.contains_key(&1));
        assert!(!readings.contains_key(&3));
    }

    /// 测试零读数按夹具通信失败上报
    #[tokio::test]
    async fn test_zero_readings_is_communication_failure() {
        let (_link, protocol) = build_protocol(8, &[("1,3", 1, "mainbeam")]);

        let relays: BTreeSet<u8> = [1, 3].into_iter().collect();
        let err = protocol.measure(&relays).await.unwrap_err();
        assert!(matches!(err, AppError::DeviceCommunicationError { .. }));
    }

    /// 测试按板卡键控转换与无归属读数的丢弃
    #[tokio::test]
    async fn test_board_keyed_conversion() {
        let (link, protocol) = build_protocol(8, &[("1", 1, "mainbeam"), ("2", 2, "mainbeam")]);
        link.set_reading(1, 12.0, 0.3);
        link.set_reading(2, 11.8, 0.29);

        let relays: BTreeSet<u8> = [1, 2].into_iter().collect();
        let by_board = protocol.measure_by_board(&relays).await.unwrap();

        assert_eq!(by_board.len(), 2);
        assert!(by_board.contains_key("Board 1"));
        assert!(by_board.contains_key("Board 2"));
        assert!((by_board["Board 1"].voltage - 12.0).abs() < 1e-9);
    }

    /// 测试颜色采样采集在覆盖全部板位后返回
    #[tokio::test]
    async fn test_collect_color_samples() {
        let (link, protocol) = build_protocol(8, &[("1", 1, "mainbeam")]);
        let boards: BTreeSet<u32> = [1, 2, 3, 4].into_iter().collect();

        let link_clone = link.clone();
        let emitter = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            link_clone.emit_samples_for_boards(&[1, 2, 3, 4]);
        });

        let samples = protocol.collect_panel_color_samples(&boards).await.unwrap();
        emitter.await.unwrap();

        assert_eq!(samples.len(), 4);
        assert!(link.was_command_sent("TEST:COLOR_CYCLE"));
    }
}
