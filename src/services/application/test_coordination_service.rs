//! 测试协调服务
//!
//! 应用层的测试入口：每个夹具同一时刻只允许一次面板测试在飞。
//! 启动请求在已有测试运行时被拒绝而不是排队；测试在独立的tokio
//! 任务中执行，调用方通过 `wait_for_result` 取回结果。

use log::{info, warn};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::models::{ProductConfig, ProgrammingResult, TestResult};
use async_trait::async_trait;

use crate::services::domain::test_lifecycle::{ITestLifecycle, PanelTestLifecycle};
use crate::services::infrastructure::device_link::IDeviceLink;
use crate::services::traits::{BaseService, ProgressSinkRef};
use crate::utils::config::FixtureConfig;
use crate::utils::error::{AppError, AppResult};

/// 一次面板测试的完整产出
#[derive(Debug, Clone)]
pub struct PanelTestOutcome {
    pub result: TestResult,
    pub programming_results: Vec<ProgrammingResult>,
}

/// 测试协调服务
///
/// 持有夹具链路与进度通道，保证单飞语义
pub struct TestCoordinationService {
    device_link: Arc<dyn IDeviceLink>,
    fixture_config: FixtureConfig,
    progress: ProgressSinkRef,
    active: Mutex<Option<JoinHandle<PanelTestOutcome>>>,
}

impl TestCoordinationService {
    pub fn new(
        device_link: Arc<dyn IDeviceLink>,
        fixture_config: FixtureConfig,
        progress: ProgressSinkRef,
    ) -> Self {
        Self {
            device_link,
            fixture_config,
            progress,
            active: Mutex::new(None),
        }
    }

    /// 是否有测试在运行
    pub async fn is_test_running(&self) -> bool {
        let active = self.active.lock().await;
        match active.as_ref() {
            Some(handle) => !handle.is_finished(),
            None => false,
        }
    }

    /// 启动一次面板测试
    ///
    /// 已有测试在飞时返回并发错误；上一次已完成但未取回的结果会被
    /// 丢弃并记录警告
    pub async fn start_panel_test(&self, config: ProductConfig) -> AppResult<()> {
        let mut active = self.active.lock().await;

        if let Some(handle) = active.as_ref() {
            if !handle.is_finished() {
                return Err(AppError::concurrency_error(format!(
                    "夹具正在执行测试，拒绝产品 {} 的启动请求",
                    config.product_id
                )));
            }
            warn!("[TestCoordination] 上一次测试结果未被取回，已丢弃");
        }

        info!("[TestCoordination] 启动面板测试: {}", config.product_id);

        let mut lifecycle = PanelTestLifecycle::new(
            self.device_link.clone(),
            self.fixture_config.clone(),
            config,
            self.progress.clone(),
        );

        *active = Some(tokio::spawn(async move {
            let result = lifecycle.execute().await;
            let programming_results = lifecycle.programming_results().to_vec();
            PanelTestOutcome {
                result,
                programming_results,
            }
        }));

        Ok(())
    }

    /// 等待当前测试完成并取回结果
    pub async fn wait_for_result(&self) -> AppResult<PanelTestOutcome> {
        let handle = {
            let mut active = self.active.lock().await;
            active.take().ok_or_else(|| {
                AppError::test_execution_error("panel", "当前没有已启动的测试")
            })?
        };

        handle.await.map_err(|e| {
            AppError::test_execution_error("panel", format!("测试任务异常终止: {}", e))
        })
    }
}

#[async_trait]
impl BaseService for TestCoordinationService {
    fn service_name(&self) -> &'static str {
        "TestCoordinationService"
    }

    async fn initialize(&mut self) -> AppResult<()> {
        info!("[TestCoordination] 服务初始化");
        Ok(())
    }

    /// 关闭服务前中止仍在飞的测试任务
    async fn shutdown(&mut self) -> AppResult<()> {
        let mut active = self.active.lock().await;
        if let Some(handle) = active.take() {
            if !handle.is_finished() {
                warn!("[TestCoordination] 服务关闭时中止在飞的测试任务");
                handle.abort();
            }
        }
        Ok(())
    }

    async fn health_check(&self) -> AppResult<()> {
        if !self.device_link.is_connected() {
            return Err(AppError::device_communication_error("夹具链路未连接"));
        }
        Ok(())
    }
}
