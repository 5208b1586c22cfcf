//! 继电器映射层
//!
//! 纯映射逻辑，无任何硬件I/O：
//! - 解析并校验配置下发的继电器表（逗号分隔的继电器编号集合 → 板卡/功能）
//! - 逻辑功能 → 物理继电器编号集合（用于构造批量测量请求）
//! - 物理继电器编号 → 所属板卡序号
//! - 面板板位的逆时针水平蛇形编号

use log::debug;
use std::collections::{BTreeSet, HashMap};

use crate::models::{BoardPosition, RelayGroupConfig};
use crate::utils::error::{AppError, AppResult};

/// 一组共享逻辑功能与板卡归属的物理继电器
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayGroup {
    pub relays: BTreeSet<u8>,
    pub board: u32,
    pub function: String,
}

/// 继电器映射器
///
/// 构造时完成全部校验：任何继电器只能属于一个 `(板卡, 功能)` 组，
/// 编号必须落在夹具通道数范围内。违规配置在任何硬件I/O之前被拒绝
#[derive(Debug, Clone)]
pub struct RelayMapper {
    channel_count: u8,
    groups: Vec<RelayGroup>,
    relay_to_board: HashMap<u8, u32>,
}

impl RelayMapper {
    /// 从配置表构建映射器
    ///
    /// 解析规则：按逗号拆分、去除空白、解析为整数；
    /// 每个元素必须在 [1, channel_count] 内
    pub fn from_config(
        relay_table: &HashMap<String, RelayGroupConfig>,
        channel_count: u8,
    ) -> AppResult<Self> {
        if channel_count == 0 {
            return Err(AppError::configuration_error("夹具通道数不能为0"));
        }

        let mut groups: Vec<RelayGroup> = Vec::new();
        let mut relay_to_board: HashMap<u8, u32> = HashMap::new();
        let mut relay_owner: HashMap<u8, (u32, String)> = HashMap::new();

        for (key, group_config) in relay_table {
            let relays = Self::parse_relay_set(key, channel_count)?;

            for relay in &relays {
                if let Some((board, function)) = relay_owner.get(relay) {
                    return Err(AppError::configuration_error(format!(
                        "继电器 {} 同时属于 (Board {}, {}) 和 (Board {}, {})，继电器组必须互斥",
                        relay, board, function, group_config.board, group_config.function
                    )));
                }
                relay_owner.insert(*relay, (group_config.board, group_config.function.clone()));
                relay_to_board.insert(*relay, group_config.board);
            }

            groups.push(RelayGroup {
                relays,
                board: group_config.board,
                function: group_config.function.clone(),
            });
        }

        debug!(
            "[RelayMapper] 继电器表校验通过: {} 组, {} 个继电器",
            groups.len(),
            relay_to_board.len()
        );

        Ok(Self {
            channel_count,
            groups,
            relay_to_board,
        })
    }

    /// 解析一个继电器集合字符串（如 "1, 2,3"）
    fn parse_relay_set(key: &str, channel_count: u8) -> AppResult<BTreeSet<u8>> {
        let mut relays = BTreeSet::new();
        for part in key.split(',') {
            let trimmed = part.trim();
            if trimmed.is_empty() {
                return Err(AppError::configuration_error(format!(
                    "继电器集合 \"{}\" 含有空元素",
                    key
                )));
            }
            let relay: u8 = trimmed.parse().map_err(|_| {
                AppError::configuration_error(format!(
                    "继电器集合 \"{}\" 中的 \"{}\" 不是有效整数",
                    key, trimmed
                ))
            })?;
            if relay == 0 || relay > channel_count {
                return Err(AppError::configuration_error(format!(
                    "继电器编号 {} 超出夹具通道范围 [1, {}]",
                    relay, channel_count
                )));
            }
            relays.insert(relay);
        }
        Ok(relays)
    }

    /// 夹具通道总数
    pub fn channel_count(&self) -> u8 {
        self.channel_count
    }

    /// 夹具的完整通道集合
    pub fn full_channel_set(&self) -> BTreeSet<u8> {
        (1..=self.channel_count).collect()
    }

    /// 返回某逻辑功能对应的全部继电器编号（跨板卡求并，有序）
    pub fn relays_for_function(&self, function: &str) -> BTreeSet<u8> {
        self.groups
            .iter()
            .filter(|g| g.function == function)
            .flat_map(|g| g.relays.iter().copied())
            .collect()
    }

    /// 返回某继电器所属的板卡序号
    pub fn board_for_relay(&self, relay: u8) -> Option<u32> {
        self.relay_to_board.get(&relay).copied()
    }

    /// 映射中出现的全部板卡序号（有序）
    pub fn boards(&self) -> BTreeSet<u32> {
        self.relay_to_board.values().copied().collect()
    }

    /// 板位的逆时针水平蛇形编号
    ///
    /// 1基序号 `i`：行 = (i-1) / cols（第0行为底行），原始列 = (i-1) % cols；
    /// 偶数行（0,2,4,…）从左到右编号，奇数行从右到左
    pub fn board_position(index: u32, cols: u32) -> BoardPosition {
        debug_assert!(index >= 1 && cols >= 1);
        let row = (index - 1) / cols;
        let raw_col = (index - 1) % cols;
        let col = if row % 2 == 0 { raw_col } else { cols - 1 - raw_col };
        BoardPosition { row, col }
    }

    /// 根据运行期观察到的板卡序号集合推断板位布局
    ///
    /// 用于测量标签中出现的板卡集合未预先配置几何布局的情况
    pub fn infer_positions(
        seen_boards: &BTreeSet<u32>,
        cols: u32,
    ) -> HashMap<u32, BoardPosition> {
        seen_boards
            .iter()
            .map(|&board| (board, Self::board_position(board, cols)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(entries: &[(&str, u32, &str)]) -> HashMap<String, RelayGroupConfig> {
        entries
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
            .collect()
    }

    /// 测试继电器表解析：空白容忍与排序输出
    #[test]
    fn test_parse_and_sorted_lookup() {
        let mapper = RelayMapper::from_config(
            &table(&[("3, 1,2", 1, "mainbeam"), ("5,7", 2, "mainbeam"), ("4", 1, "backlight")]),
            8,
        )
        .unwrap();

        let relays: Vec<u8> = mapper.relays_for_function("mainbeam").into_iter().collect();
        assert_eq!(relays, vec![1, 2, 3, 5, 7]);
        assert_eq!(mapper.board_for_relay(4), Some(1));
        assert_eq!(mapper.board_for_relay(5), Some(2));
        assert_eq!(mapper.board_for_relay(8), None);
    }

    /// 测试继电器被两个功能组共用的配置被拒绝
    #[test]
    fn test_overlapping_groups_rejected() {
        let result = RelayMapper::from_config(
            &table(&[("1,2", 1, "mainbeam"), ("2,3", 1, "backlight")]),
            8,
        );
        assert!(matches!(result, Err(AppError::ConfigurationError { .. })));
    }

    /// 测试超出通道范围的继电器编号被拒绝
    #[test]
    fn test_out_of_range_rejected() {
        let result = RelayMapper::from_config(&table(&[("1,9", 1, "mainbeam")]), 8);
        assert!(result.is_err());

        let result = RelayMapper::from_config(&table(&[("0", 1, "mainbeam")]), 8);
        assert!(result.is_err());
    }

    /// 测试非整数元素被拒绝
    #[test]
    fn test_non_integer_rejected() {
        let result = RelayMapper::from_config(&table(&[("1,x", 1, "mainbeam")]), 8);
        assert!(result.is_err());
    }

    /// 测试2×2面板的蛇形板位编号
    #[test]
    fn test_snake_2x2() {
        let expected = [(1, 0, 0), (2, 0, 1), (3, 1, 1), (4, 1, 0)];
        for (index, row, col) in expected {
            assert_eq!(
                RelayMapper::board_position(index, 2),
                BoardPosition { row, col },
                "板位 {} 编号错误",
                index
            );
        }
    }

    /// 测试4×3面板的完整12项蛇形编号表
    #[test]
    fn test_snake_4x3_full_table() {
        let expected = [
            (1, 0, 0),
            (2, 0, 1),
            (3, 0, 2),
            (4, 1, 2),
            (5, 1, 1),
            (6, 1, 0),
            (7, 2, 0),
            (8, 2, 1),
            (9, 2, 2),
            (10, 3, 2),
            (11, 3, 1),
            (12, 3, 0),
        ];
        for (index, row, col) in expected {
            assert_eq!(
                RelayMapper::board_position(index, 3),
                BoardPosition { row, col },
                "板位 {} 编号错误",
                index
            );
        }
    }

    /// 测试从观察到的板卡集合推断布局
    #[test]
    fn test_infer_positions() {
        let seen: BTreeSet<u32> = [1, 2, 4].into_iter().collect();
        let positions = RelayMapper::infer_positions(&seen, 2);
        assert_eq!(positions.len(), 3);
        assert_eq!(positions[&4], BoardPosition { row: 1, col: 0 });
    }
}
