//! 板卡烧录流水线
//!
//! 按配置顺序驱动一个或多个外部编程器，每个编程器负责互斥的一组板卡。
//! 单块板的流程：解析固件文件 → 夹具选板 → 使能编程接口 → 施加编程
//! 电压 → 调用外部编程器。任一步骤失败只影响当前板卡，流水线总是推进
//! 到下一块板；全部板卡处理完毕后无条件恢复夹具安全状态（断电、关闭
//! 接口、取消选板），与各板结果无关。

use async_trait::async_trait;
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::models::{
    BoardProgrammingState, ProgrammerConfig, ProgrammerType, ProgrammingConfig, ProgrammingResult,
};
use crate::services::infrastructure::device_link::{cmd, IDeviceLink};
use crate::utils::config::FixtureConfig;
use crate::utils::error::{AppError, AppResult};

/// 外部编程器单次调用的结果
#[derive(Debug, Clone, PartialEq)]
pub struct ProgrammerOutcome {
    pub success: bool,
    /// 编程器的原始输出，失败时原样进入失败描述
    pub message: String,
}

/// 外部固件编程器trait
///
/// 每个实现封装一个具体的烧录工具进程
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IFirmwareProgrammer: Send + Sync {
    /// 编程器家族类型
    fn programmer_type(&self) -> ProgrammerType;

    /// 针对指定固件文件调用编程器
    ///
    /// `device_hint` 为器件型号提示；缺省时由编程器自动识别器件
    async fn program(
        &self,
        artifact: &Path,
        device_hint: Option<String>,
    ) -> AppResult<ProgrammerOutcome>;
}

/// 命令行编程器：通过子进程调用外部烧录工具
pub struct CliFirmwareProgrammer {
    programmer_type: ProgrammerType,
    tool_path: PathBuf,
}

impl CliFirmwareProgrammer {
    pub fn new(programmer_type: ProgrammerType, tool_path: PathBuf) -> Self {
        Self {
            programmer_type,
            tool_path,
        }
    }

    /// 按编程器家族构造命令行参数
    fn build_args(&self, artifact: &Path, device_hint: Option<&str>) -> Vec<String> {
        match self.programmer_type {
            ProgrammerType::Icsp => {
                let device = device_hint.unwrap_or("AUTO");
                // pk2cmd风格: -P器件 -F固件 -M(烧录)
                vec![
                    format!("-P{}", device),
                    format!("-F{}", artifact.display()),
                    "-M".to_string(),
                ]
            }
            ProgrammerType::Swd => {
                // SWD工具按器件自动识别，提示型号仅用于日志
                vec![
                    "write".to_string(),
                    artifact.display().to_string(),
                    "0x08000000".to_string(),
                ]
            }
        }
    }
}

#[async_trait]
impl IFirmwareProgrammer for CliFirmwareProgrammer {
    fn programmer_type(&self) -> ProgrammerType {
        self.programmer_type
    }

    async fn program(
        &self,
        artifact: &Path,
        device_hint: Option<String>,
    ) -> AppResult<ProgrammerOutcome> {
        let args = self.build_args(artifact, device_hint.as_deref());
        debug!(
            "[ProgPipeline] 调用编程器: {} {:?}",
            self.tool_path.display(),
            args
        );

        let output = tokio::process::Command::new(&self.tool_path)
            .args(&args)
            .output()
            .await
            .map_err(|e| {
                AppError::device_communication_error(format!(
                    "启动编程器进程失败: {} - {}",
                    self.tool_path.display(),
                    e
                ))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let message = format!("{}{}", stdout, stderr).trim().to_string();

        Ok(ProgrammerOutcome {
            success: output.status.success(),
            message,
        })
    }
}

/// 一个编程器槽位：配置 + 初始化结果
///
/// `programmer` 为 None 表示该编程器初始化失败，其负责的板卡不可达
pub struct ProgrammerSlot {
    pub config: ProgrammerConfig,
    pub programmer: Option<Arc<dyn IFirmwareProgrammer>>,
}

/// 烧录阶段的汇总数据
#[derive(Debug, Clone, PartialEq)]
pub struct ProgrammingSummary {
    /// 配置中应烧录的板卡总数
    pub total: usize,
    /// 烧录成功的板卡数
    pub successful: usize,
    /// 良率百分比 successful/total*100
    pub yield_percent: f64,
    /// 人类可读的失败描述（包含编程器原始错误输出）
    pub failures: Vec<String>,
}

/// 板卡烧录流水线
pub struct ProgrammingPipeline {
    device_link: Arc<dyn IDeviceLink>,
    command_timeout: Duration,
    heavy_command_timeout: Duration,
    slots: Vec<ProgrammerSlot>,
    /// 跨整个烧录阶段累积，测试完成后对调用方只读
    results: Vec<ProgrammingResult>,
    states: BTreeMap<u32, BoardProgrammingState>,
}

impl ProgrammingPipeline {
    /// 从槽位列表构建（测试注入Mock编程器的入口）
    pub fn new(
        device_link: Arc<dyn IDeviceLink>,
        fixture_config: &FixtureConfig,
        slots: Vec<ProgrammerSlot>,
    ) -> Self {
        let mut states = BTreeMap::new();
        for slot in &slots {
            for board in &slot.config.boards {
                states.insert(*board, BoardProgrammingState::Pending);
            }
        }
        Self {
            device_link,
            command_timeout: Duration::from_millis(fixture_config.command_timeout_ms),
            heavy_command_timeout: Duration::from_millis(fixture_config.heavy_command_timeout_ms),
            slots,
            results: Vec::new(),
            states,
        }
    }

    /// 从配置构建，使用命令行编程器
    ///
    /// 工具路径不存在视为初始化失败：该编程器不可用，但其余编程器照常工作
    pub fn from_config(
        device_link: Arc<dyn IDeviceLink>,
        fixture_config: &FixtureConfig,
        programming: &ProgrammingConfig,
    ) -> Self {
        let slots = programming
            .programmers
            .iter()
            .map(|config| {
                let programmer: Option<Arc<dyn IFirmwareProgrammer>> = if config.path.exists() {
                    Some(Arc::new(CliFirmwareProgrammer::new(
                        config.programmer_type,
                        config.path.clone(),
                    )))
                } else {
                    warn!(
                        "[ProgPipeline] 编程器 {} 初始化失败: 工具路径不存在 {}",
                        config.programmer_type,
                        config.path.display()
                    );
                    None
                };
                ProgrammerSlot {
                    config: config.clone(),
                    programmer,
                }
            })
            .collect();

        Self::new(device_link, fixture_config, slots)
    }

    /// 是否至少有一个编程器初始化成功
    pub fn has_available_programmer(&self) -> bool {
        self.slots.iter().any(|s| s.programmer.is_some())
    }

    /// 历次烧录结果的只读视图
    pub fn results(&self) -> &[ProgrammingResult] {
        &self.results
    }

    /// 查询某块板的烧录状态
    pub fn board_state(&self, board: u32) -> Option<BoardProgrammingState> {
        self.states.get(&board).copied()
    }

    /// 执行整个烧录阶段
    ///
    /// 单板失败不中止流水线；返回的汇总中 total 覆盖配置的全部板卡，
    /// 包括因编程器初始化失败而不可达的板卡（它们计入失败）
    pub async fn run(&mut self) -> ProgrammingSummary {
        let total: usize = self.slots.iter().map(|s| s.config.boards.len()).sum();
        info!("[ProgPipeline] 烧录阶段开始: {} 块板", total);

        let mut failures: Vec<String> = Vec::new();
        let slot_count = self.slots.len();

        for slot_index in 0..slot_count {
            let (programmer_type, boards) = {
                let slot = &self.slots[slot_index];
                (slot.config.programmer_type, slot.config.boards.clone())
            };

            for board in boards {
                let (success, message) = self.program_board(slot_index, board).await;

                if success {
                    info!("[ProgPipeline] Board {} 烧录成功", board);
                } else {
                    warn!("[ProgPipeline] Board {} 烧录失败: {}", board, message);
                    failures.push(format!(
                        "Board {} 烧录失败 ({}): {}",
                        board, programmer_type, message
                    ));
                }

                self.results.push(ProgrammingResult {
                    board,
                    success,
                    message,
                });
            }
        }

        // 无论各板结果如何，夹具都回到安全状态
        self.safe_state().await;

        let successful = self.results.iter().filter(|r| r.success).count();
        let yield_percent = if total > 0 {
            successful as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        info!(
            "[ProgPipeline] 烧录阶段结束: {}/{} 成功, 良率 {:.1}%",
            successful, total, yield_percent
        );

        ProgrammingSummary {
            total,
            successful,
            yield_percent,
            failures,
        }
    }

    /// 处理单块板，返回 (是否成功, 消息)
    ///
    /// 失败只标记当前板并返回，不向外传播错误
    async fn program_board(&mut self, slot_index: usize, board: u32) -> (bool, String) {
        let programmer = match &self.slots[slot_index].programmer {
            Some(p) => p.clone(),
            None => {
                let programmer_type = self.slots[slot_index].config.programmer_type;
                self.transition(board, BoardProgrammingState::Failed);
                return (
                    false,
                    format!("编程器 {} 初始化失败，板卡不可达", programmer_type),
                );
            }
        };

        // 1. 解析固件文件
        let artifact = {
            let config = &self.slots[slot_index].config;
            match config.hex_files.get(&board) {
                Some(path) if path.exists() => path.clone(),
                Some(path) => {
                    let msg = format!("固件文件不存在: {}", path.display());
                    self.transition(board, BoardProgrammingState::Failed);
                    return (false, msg);
                }
                None => {
                    self.transition(board, BoardProgrammingState::Failed);
                    return (false, "缺少固件文件配置".to_string());
                }
            }
        };

        // 2. 夹具选板
        if let Err(e) = self
            .device_link
            .send(&cmd::select_board(board), self.heavy_command_timeout)
            .await
        {
            self.transition(board, BoardProgrammingState::Failed);
            return (false, format!("选板失败: {}", e));
        }
        self.transition(board, BoardProgrammingState::Selected);

        // 3. 使能编程接口
        let programmer_type = programmer.programmer_type();
        if let Err(e) = self
            .device_link
            .send(
                &cmd::prog_interface(programmer_type.interface_token(), true),
                self.command_timeout,
            )
            .await
        {
            self.transition(board, BoardProgrammingState::Failed);
            return (false, format!("使能编程接口失败: {}", e));
        }
        self.transition(board, BoardProgrammingState::InterfaceEnabled);

        // 4. 施加接口对应的编程电压
        if let Err(e) = self
            .device_link
            .send(
                &cmd::prog_vdd_on(programmer_type.vdd_millivolts()),
                self.command_timeout,
            )
            .await
        {
            self.transition(board, BoardProgrammingState::Failed);
            return (false, format!("施加编程电压失败: {}", e));
        }
        self.transition(board, BoardProgrammingState::Powered);

        // 5. 调用外部编程器
        let device_hint = self.slots[slot_index]
            .config
            .device_hints
            .get(&board)
            .cloned();
        match programmer.program(&artifact, device_hint).await {
            Ok(outcome) if outcome.success => {
                self.transition(board, BoardProgrammingState::Programmed);
                (true, outcome.message)
            }
            Ok(outcome) => {
                self.transition(board, BoardProgrammingState::Failed);
                (false, outcome.message)
            }
            Err(e) => {
                self.transition(board, BoardProgrammingState::Failed);
                (false, e.to_string())
            }
        }
    }

    /// 恢复夹具安全状态：断编程电、关闭接口、取消选板
    ///
    /// 幂等操作，失败只记录警告，绝不上抛
    pub async fn safe_state(&self) {
        let mut commands = vec![cmd::prog_power_off()];
        for slot in &self.slots {
            commands.push(cmd::prog_interface(
                slot.config.programmer_type.interface_token(),
                false,
            ));
        }
        commands.push(cmd::select_none());

        for command in commands {
            if let Err(e) = self.device_link.send(&command, self.command_timeout).await {
                warn!("[ProgPipeline] 恢复安全状态时指令失败: {} - {}", command, e);
            }
        }
    }

    fn transition(&mut self, board: u32, to: BoardProgrammingState) {
        let from = self
            .states
            .insert(board, to)
            .unwrap_or(BoardProgrammingState::Pending);
        debug!("[ProgPipeline] Board {} 状态: {} → {}", board, from, to);
    }
}
