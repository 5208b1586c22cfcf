//! 测试阶段执行器
//!
//! 从配置构建有序的阶段计划（可选烧录阶段、一个上电稳定阶段、N个功能
//! 测试阶段），严格按序执行并把测量结果对照限值评估。单个阶段失败只产
//! 生一条指向该阶段的失败描述，不会中止后续阶段——面板上一个功能失败
//! 时其余功能仍然给出完整结果（刻意的局部失败策略）。

use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::models::{
    board_label, ChannelReading, FunctionTestStep, ProductConfig, ProgrammingResult, TestPhase,
    TestResult,
};
use crate::services::domain::measurement_protocol::MeasurementProtocol;
use crate::services::domain::programming_pipeline::ProgrammingPipeline;
use crate::services::domain::relay_mapper::RelayMapper;
use crate::services::infrastructure::device_link::{cmd, IDeviceLink};
use crate::services::traits::ProgressSinkRef;
use crate::utils::config::FixtureConfig;

/// 阶段进度区间：阶段执行占整体进度的 [PROGRESS_BASE, PROGRESS_BASE+PROGRESS_SPAN]
const PROGRESS_BASE: u8 = 10;
const PROGRESS_SPAN: u8 = 80;

/// 测试阶段执行器
pub struct TestPhaseExecutor {
    device_link: Arc<dyn IDeviceLink>,
    mapper: Arc<RelayMapper>,
    protocol: MeasurementProtocol,
    pipeline: Option<ProgrammingPipeline>,
    progress: ProgressSinkRef,
    config: ProductConfig,
    command_timeout: Duration,
}

impl TestPhaseExecutor {
    pub fn new(
        device_link: Arc<dyn IDeviceLink>,
        mapper: Arc<RelayMapper>,
        pipeline: Option<ProgrammingPipeline>,
        progress: ProgressSinkRef,
        config: ProductConfig,
        fixture_config: &FixtureConfig,
    ) -> Self {
        let protocol = MeasurementProtocol::new(device_link.clone(), mapper.clone(), fixture_config);
        Self {
            device_link,
            mapper,
            protocol,
            pipeline,
            progress,
            config,
            command_timeout: Duration::from_millis(fixture_config.command_timeout_ms),
        }
    }

    /// 构建阶段计划（纯函数，无任何I/O）
    ///
    /// 烧录阶段仅当启用且至少一个编程器初始化成功时加入；上电稳定阶段
    /// 恒定存在；其后每个配置的测试步骤对应一个功能测试阶段
    pub fn build_phase_plan(config: &ProductConfig, programming_available: bool) -> Vec<TestPhase> {
        let mut phases = Vec::with_capacity(config.test_sequence.len() + 2);

        if config.programming_enabled() && programming_available {
            phases.push(TestPhase::Programming);
        }

        phases.push(TestPhase::PowerStabilization {
            duration_ms: config.power_stabilization_ms,
        });

        for step in &config.test_sequence {
            phases.push(TestPhase::FunctionTest { step: step.clone() });
        }

        phases
    }

    /// 按序执行全部阶段，测量与失败写入 `result`
    pub async fn run(&mut self, result: &mut TestResult) {
        let programming_available = self
            .pipeline
            .as_ref()
            .map(|p| p.has_available_programmer())
            .unwrap_or(false);
        let phases = Self::build_phase_plan(&self.config, programming_available);
        let phase_count = phases.len();

        info!("[PhaseExecutor] 阶段计划: {} 个阶段", phase_count);

        for (index, phase) in phases.iter().enumerate() {
            let percent = PROGRESS_BASE
                + (index as u32 * PROGRESS_SPAN as u32 / phase_count as u32) as u8;
            self.progress
                .report(&format!("执行阶段: {}", phase.name()), percent);

            let ok = match phase {
                TestPhase::Programming => self.run_programming(result).await,
                TestPhase::PowerStabilization { duration_ms } => {
                    debug!("[PhaseExecutor] 上电稳定 {} ms", duration_ms);
                    tokio::time::sleep(Duration::from_millis(*duration_ms)).await;
                    true
                }
                TestPhase::FunctionTest { step } => self.run_function_test(step, result).await,
            };

            // 局部失败策略：记录失败但继续后续阶段
            if !ok {
                warn!("[PhaseExecutor] 阶段 {} 失败，继续后续阶段", phase.name());
                result.add_failure(format!("测试阶段失败: {}", phase.name()));
            }
        }
    }

    /// 烧录阶段累积结果的只读视图
    pub fn programming_results(&self) -> Vec<ProgrammingResult> {
        self.pipeline
            .as_ref()
            .map(|p| p.results().to_vec())
            .unwrap_or_default()
    }

    /// 执行烧录阶段：良率以通过目标100%记为一条测量
    async fn run_programming(&mut self, result: &mut TestResult) -> bool {
        let pipeline = match self.pipeline.as_mut() {
            Some(p) => p,
            // 计划构建已排除此情况
            None => return false,
        };

        let summary = pipeline.run().await;

        result.add_measurement(
            "programming_yield",
            summary.yield_percent,
            100.0,
            100.0,
            "%",
        );
        for failure in &summary.failures {
            result.add_failure(failure.clone());
        }

        summary.failures.is_empty()
    }

    /// 执行一个功能测试阶段
    async fn run_function_test(&mut self, step: &FunctionTestStep, result: &mut TestResult) -> bool {
        let relays = self.mapper.relays_for_function(&step.function);
        if relays.is_empty() {
            result.add_failure(format!(
                "配置错误: 功能 {} 在继电器表中没有对应的继电器",
                step.function
            ));
            return false;
        }

        info!(
            "[PhaseExecutor] 功能测试 {}: 继电器 {:?}",
            step.function, relays
        );

        if let Err(e) = self.switch_relays(&relays, true).await {
            result.add_failure(format!("功能 {} 继电器接通失败: {}", step.function, e));
            // 尽力关断已接通的继电器
            let _ = self.switch_relays(&relays, false).await;
            return false;
        }

        // 功能点亮后的稳定/观察窗口
        tokio::time::sleep(Duration::from_millis(step.duration_ms)).await;

        let mut phase_ok = true;

        match self.protocol.measure_by_board(&relays).await {
            Ok(by_board) => {
                for (label, reading) in &by_board {
                    if !Self::evaluate_board(step, label, reading, result) {
                        phase_ok = false;
                    }
                }
            }
            Err(e) => {
                result.add_failure(format!("功能 {} 测量失败: {}", step.function, e));
                phase_ok = false;
            }
        }

        if step.collect_color_samples && phase_ok {
            phase_ok &= self.collect_color_samples(step, &relays, result).await;
        }

        if let Err(e) = self.switch_relays(&relays, false).await {
            result.add_failure(format!("功能 {} 继电器关断失败: {}", step.function, e));
            phase_ok = false;
        }

        phase_ok
    }

    /// 采集并记录该功能覆盖板位的颜色样本
    async fn collect_color_samples(
        &self,
        step: &FunctionTestStep,
        relays: &BTreeSet<u8>,
        result: &mut TestResult,
    ) -> bool {
        let boards: BTreeSet<u32> = relays
            .iter()
            .filter_map(|relay| self.mapper.board_for_relay(*relay))
            .collect();

        match self.protocol.collect_panel_color_samples(&boards).await {
            Ok(samples) => {
                for (board, sample) in samples {
                    // 照度作为信息性测量记录，仅要求非负
                    result.add_measurement(
                        format!("{}_{}_lux", step.function, board_label(board)),
                        sample.lux,
                        0.0,
                        f64::INFINITY,
                        "lx",
                    );
                }
                true
            }
            Err(e) => {
                result.add_failure(format!("功能 {} 颜色采样失败: {}", step.function, e));
                false
            }
        }
    }

    /// 对单块板的读数做独立的电流/电压限值评估
    ///
    /// 每个量各产生一条命名测量；超限时追加包含板名、功能、实测值与
    /// 被违反区间的失败描述。通过/失败以板为单位，不跨面板聚合
    fn evaluate_board(
        step: &FunctionTestStep,
        label: &str,
        reading: &ChannelReading,
        result: &mut TestResult,
    ) -> bool {
        let current_ok = result.add_measurement(
            format!("{}_{}_current", step.function, label),
            reading.current,
            step.limits.current_a.min,
            step.limits.current_a.max,
            "A",
        );
        if !current_ok {
            result.add_failure(format!(
                "{} 功能 {} 电流超限: {:.3} A (限值 {:.3}–{:.3} A)",
                label,
                step.function,
                reading.current,
                step.limits.current_a.min,
                step.limits.current_a.max
            ));
        }

        let voltage_ok = result.add_measurement(
            format!("{}_{}_voltage", step.function, label),
            reading.voltage,
            step.limits.voltage_v.min,
            step.limits.voltage_v.max,
            "V",
        );
        if !voltage_ok {
            result.add_failure(format!(
                "{} 功能 {} 电压超限: {:.3} V (限值 {:.3}–{:.3} V)",
                label,
                step.function,
                reading.voltage,
                step.limits.voltage_v.min,
                step.limits.voltage_v.max
            ));
        }

        current_ok && voltage_ok
    }

    /// 批量驱动一组继电器
    async fn switch_relays(
        &self,
        relays: &BTreeSet<u8>,
        on: bool,
    ) -> crate::utils::error::AppResult<()> {
        for relay in relays {
            self.device_link
                .send(&cmd::relay(*relay, on), self.command_timeout)
                .await?;
        }
        Ok(())
    }
}
