//! 测试生命周期模板
//!
//! `ITestLifecycle::execute()` 固定四步流程：硬件准备 → 测试序列 →
//! 总体判定 → 硬件清理。清理在任何路径上都恰好执行一次（包括准备
//! 失败和序列panic），`execute()` 本身绝不向调用方抛出错误——所有
//! 异常都折算为结果中的失败描述。

use async_trait::async_trait;
use futures::FutureExt;
use log::{error, info, warn};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::models::{DeviceSession, ProductConfig, ProgrammingResult, TestResult};
use crate::services::domain::programming_pipeline::ProgrammingPipeline;
use crate::services::domain::relay_mapper::RelayMapper;
use crate::services::domain::test_phase_executor::TestPhaseExecutor;
use crate::services::infrastructure::device_link::{cmd, IDeviceLink};
use crate::services::traits::ProgressSinkRef;
use crate::utils::config::FixtureConfig;
use crate::utils::error::AppResult;

/// 测试生命周期接口
///
/// 实现者提供三个钩子；`execute()` 是模板方法，每个实例只应调用一次
#[async_trait]
pub trait ITestLifecycle: Send {
    /// 测试名称
    fn test_name(&self) -> &str;

    /// 进度汇报通道
    fn progress_sink(&self) -> ProgressSinkRef;

    /// 硬件准备；返回 Ok(false) 表示准备失败，测试序列不执行
    async fn setup_hardware(&mut self) -> AppResult<bool>;

    /// 执行测试序列，测量与失败写入 `result`
    async fn run_test_sequence(&mut self, result: &mut TestResult) -> AppResult<()>;

    /// 硬件清理；要求幂等，重复调用是安全空操作
    async fn cleanup_hardware(&mut self) -> AppResult<()>;

    /// 模板方法：完整执行一次测试
    ///
    /// 准备/序列中的错误与panic都被截获并折算为失败描述；总体判定在
    /// 清理之前完成；清理随后无条件执行，其错误只记录日志。返回的
    /// 耗时为含清理在内的墙钟时间
    async fn execute(&mut self) -> TestResult {
        let started = Instant::now();
        let mut result = TestResult::new(self.test_name());
        let sink = self.progress_sink();

        info!("[Lifecycle] 测试开始: {}", result.test_name);
        sink.report("测试开始", 0);

        let setup = AssertUnwindSafe(self.setup_hardware()).catch_unwind().await;
        match setup {
            Ok(Ok(true)) => {
                sink.report("硬件准备完成", 10);
                let sequence = AssertUnwindSafe(self.run_test_sequence(&mut result))
                    .catch_unwind()
                    .await;
                match sequence {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        error!("[Lifecycle] 测试序列错误: {}", e);
                        result.add_failure(format!("测试序列错误: {}", e));
                    }
                    Err(_) => {
                        error!("[Lifecycle] 测试序列发生panic");
                        result.add_failure("测试序列发生panic，已中止".to_string());
                    }
                }
            }
            Ok(Ok(false)) => {
                warn!("[Lifecycle] 硬件准备失败，测试序列未执行");
                result.add_failure("硬件准备失败，测试序列未执行".to_string());
            }
            Ok(Err(e)) => {
                error!("[Lifecycle] 硬件准备错误: {}", e);
                result.add_failure(format!("硬件准备错误: {}", e));
            }
            Err(_) => {
                error!("[Lifecycle] 硬件准备发生panic");
                result.add_failure("硬件准备发生panic".to_string());
            }
        }

        result.calculate_overall_result();

        sink.report("硬件清理", 95);
        if let Err(e) = self.cleanup_hardware().await {
            // 清理失败不改变已判定的结果，只记录
            error!("[Lifecycle] 硬件清理错误: {}", e);
        }

        result.duration_ms = started.elapsed().as_millis() as u64;
        sink.report("测试完成", 100);
        info!(
            "[Lifecycle] 测试完成: {} 结果={} 耗时={}ms",
            result.test_name,
            if result.passed { "通过" } else { "失败" },
            result.duration_ms
        );

        result
    }
}

/// SMT面板测试生命周期
///
/// 把夹具会话、继电器映射、测量协议、烧录流水线装配成一次完整的
/// 面板验收测试
pub struct PanelTestLifecycle {
    device_link: Arc<dyn IDeviceLink>,
    fixture_config: FixtureConfig,
    config: ProductConfig,
    session: DeviceSession,
    progress: ProgressSinkRef,
    executor: Option<TestPhaseExecutor>,
    programming_results: Vec<ProgrammingResult>,
    command_timeout: Duration,
}

impl PanelTestLifecycle {
    pub fn new(
        device_link: Arc<dyn IDeviceLink>,
        fixture_config: FixtureConfig,
        config: ProductConfig,
        progress: ProgressSinkRef,
    ) -> Self {
        let session = DeviceSession::new(config.channel_count);
        let command_timeout = Duration::from_millis(fixture_config.command_timeout_ms);
        Self {
            device_link,
            fixture_config,
            config,
            session,
            progress,
            executor: None,
            programming_results: Vec::new(),
            command_timeout,
        }
    }

    /// 烧录阶段逐板结果（测试执行完成后可读）
    pub fn programming_results(&self) -> &[ProgrammingResult] {
        &self.programming_results
    }
}

#[async_trait]
impl ITestLifecycle for PanelTestLifecycle {
    fn test_name(&self) -> &str {
        &self.config.product_id
    }

    fn progress_sink(&self) -> ProgressSinkRef {
        self.progress.clone()
    }

    /// 配置验证 → 继电器映射构建 → 通道数下发 → 阶段执行器装配
    ///
    /// 验证与映射构建先于任何夹具指令，配置损坏时不触发硬件I/O
    async fn setup_hardware(&mut self) -> AppResult<bool> {
        if !self.device_link.is_connected() {
            warn!("[PanelTest] 夹具链路未连接");
            return Ok(false);
        }

        self.config.validate()?;
        let mapper = Arc::new(RelayMapper::from_config(
            &self.config.relay_table,
            self.config.channel_count,
        )?);

        // 通道数每个会话只下发一次
        if !self.session.configured {
            self.device_link
                .send(
                    &cmd::config_channels(self.session.channel_count),
                    self.command_timeout,
                )
                .await?;
            self.session.configured = true;
        }

        let pipeline = if self.config.programming_enabled() {
            self.config.programming.as_ref().map(|programming| {
                ProgrammingPipeline::from_config(
                    self.device_link.clone(),
                    &self.fixture_config,
                    programming,
                )
            })
        } else {
            None
        };

        self.executor = Some(TestPhaseExecutor::new(
            self.device_link.clone(),
            mapper,
            pipeline,
            self.progress.clone(),
            self.config.clone(),
            &self.fixture_config,
        ));

        Ok(true)
    }

    async fn run_test_sequence(&mut self, result: &mut TestResult) -> AppResult<()> {
        let executor = match self.executor.as_mut() {
            Some(e) => e,
            // setup_hardware 返回true后必然已装配
            None => {
                return Err(crate::utils::error::AppError::test_execution_error(
                    "panel",
                    "阶段执行器未装配",
                ))
            }
        };

        executor.run(result).await;
        self.programming_results = executor.programming_results();
        Ok(())
    }

    /// 把面板带回安全状态：所有输出关断、板卡取消选择、编程电源关断
    ///
    /// 幂等：各指令独立尽力执行，单条失败只记录不中断后续
    async fn cleanup_hardware(&mut self) -> AppResult<()> {
        for command in [cmd::outputs_off(), cmd::select_none(), cmd::prog_power_off()] {
            if let Err(e) = self.device_link.send(&command, self.command_timeout).await {
                warn!("[PanelTest] 清理指令 {} 失败: {}", command, e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::traits::IProgressSink;
    use crate::utils::error::AppError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullSink;

    impl IProgressSink for NullSink {
        fn report(&self, _message: &str, _percent: u8) {}
    }

    fn null_sink() -> ProgressSinkRef {
        Arc::new(NullSink)
    }

    /// 可编排的生命周期测试替身
    struct ScriptedLifecycle {
        setup_ok: bool,
        setup_err: bool,
        sequence_err: bool,
        sequence_panics: bool,
        sequence_runs: Arc<AtomicUsize>,
        cleanup_runs: Arc<AtomicUsize>,
    }

    impl ScriptedLifecycle {
        fn new() -> Self {
            Self {
                setup_ok: true,
                setup_err: false,
                sequence_err: false,
                sequence_panics: false,
                sequence_runs: Arc::new(AtomicUsize::new(0)),
                cleanup_runs: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl ITestLifecycle for ScriptedLifecycle {
        fn test_name(&self) -> &str {
            "scripted"
        }

        fn progress_sink(&self) -> ProgressSinkRef {
            null_sink()
        }

        async fn setup_hardware(&mut self) -> AppResult<bool> {
            if self.setup_err {
                return Err(AppError::device_communication_error("夹具无响应"));
            }
            Ok(self.setup_ok)
        }

        async fn run_test_sequence(&mut self, result: &mut TestResult) -> AppResult<()> {
            self.sequence_runs.fetch_add(1, Ordering::SeqCst);
            if self.sequence_panics {
                panic!("测试替身故意panic");
            }
            if self.sequence_err {
                return Err(AppError::test_execution_error("seq", "序列故障"));
            }
            result.add_measurement("probe", 1.0, 0.0, 2.0, "V");
            Ok(())
        }

        async fn cleanup_hardware(&mut self) -> AppResult<()> {
            self.cleanup_runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// 测试正常路径：通过且清理恰好一次
    #[tokio::test]
    async fn test_execute_happy_path() {
        let mut lifecycle = ScriptedLifecycle::new();
        let cleanup_runs = lifecycle.cleanup_runs.clone();

        let result = lifecycle.execute().await;

        assert!(result.passed);
        assert!(result.failures.is_empty());
        assert_eq!(cleanup_runs.load(Ordering::SeqCst), 1);
    }

    /// 测试准备失败：序列不执行、失败被记录、清理仍执行一次
    #[tokio::test]
    async fn test_setup_false_skips_sequence_but_cleans_up() {
        let mut lifecycle = ScriptedLifecycle::new();
        lifecycle.setup_ok = false;
        let sequence_runs = lifecycle.sequence_runs.clone();
        let cleanup_runs = lifecycle.cleanup_runs.clone();

        let result = lifecycle.execute().await;

        assert!(!result.passed);
        assert!(result.failures.iter().any(|f| f.contains("硬件准备失败")));
        assert_eq!(sequence_runs.load(Ordering::SeqCst), 0);
        assert_eq!(cleanup_runs.load(Ordering::SeqCst), 1);
    }

    /// 测试准备抛错：错误折算为失败描述，清理仍执行一次
    #[tokio::test]
    async fn test_setup_error_contained() {
        let mut lifecycle = ScriptedLifecycle::new();
        lifecycle.setup_err = true;
        let cleanup_runs = lifecycle.cleanup_runs.clone();

        let result = lifecycle.execute().await;

        assert!(!result.passed);
        assert!(result.failures.iter().any(|f| f.contains("夹具无响应")));
        assert_eq!(cleanup_runs.load(Ordering::SeqCst), 1);
    }

    /// 测试序列错误：折算为失败描述，清理仍执行一次
    #[tokio::test]
    async fn test_sequence_error_contained() {
        let mut lifecycle = ScriptedLifecycle::new();
        lifecycle.sequence_err = true;
        let cleanup_runs = lifecycle.cleanup_runs.clone();

        let result = lifecycle.execute().await;

        assert!(!result.passed);
        assert!(result.failures.iter().any(|f| f.contains("序列故障")));
        assert_eq!(cleanup_runs.load(Ordering::SeqCst), 1);
    }

    /// 测试序列panic被截获：execute不扩散panic，清理仍执行一次
    #[tokio::test]
    async fn test_sequence_panic_contained() {
        let mut lifecycle = ScriptedLifecycle::new();
        lifecycle.sequence_panics = true;
        let cleanup_runs = lifecycle.cleanup_runs.clone();

        let result = lifecycle.execute().await;

        assert!(!result.passed);
        assert!(result.failures.iter().any(|f| f.contains("panic")));
        assert_eq!(cleanup_runs.load(Ordering::SeqCst), 1);
    }

    /// 测试无任何测量时不判通过（空结果不是通过）
    #[tokio::test]
    async fn test_no_measurements_is_not_a_pass() {
        struct EmptySequence;

        #[async_trait]
        impl ITestLifecycle for EmptySequence {
            fn test_name(&self) -> &str {
                "empty"
            }
            fn progress_sink(&self) -> ProgressSinkRef {
                Arc::new(NullSink)
            }
            async fn setup_hardware(&mut self) -> AppResult<bool> {
                Ok(true)
            }
            async fn run_test_sequence(&mut self, _result: &mut TestResult) -> AppResult<()> {
                Ok(())
            }
            async fn cleanup_hardware(&mut self) -> AppResult<()> {
                Ok(())
            }
        }

        let result = EmptySequence.execute().await;
        assert!(!result.passed);
    }
}
